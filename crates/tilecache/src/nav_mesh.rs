//! Navigation mesh publishing interface
//!
//! The tile cache hands every rebuilt tile to a [`TileMeshTarget`]. The target
//! is the consuming navigation mesh; [`TiledNavMesh`] is a simple in-memory
//! target keyed by tile location.

use std::collections::HashMap;

use glam::Vec3;
use tilecache_builder::{count_poly_verts, TileCachePolyMesh, TileLayerHeader, EXT_LINK, MESH_NULL_IDX};
use tilecache_common::{Error, Result};

/// Who drops the data once it leaves its container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum TileOwnership {
    /// The container owns the data and drops it on removal
    #[default]
    Owned,
    /// The data is handed back to the caller on removal
    External,
}

/// Polygon data of one navmesh tile
#[derive(Debug, Clone, PartialEq)]
pub struct NavMeshTileData {
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    /// Maximum vertices per polygon
    pub nvp: usize,
    /// Grid-space vertices `[x, y, z]`
    pub verts: Vec<u16>,
    /// Per polygon: `nvp` vertex indices followed by `nvp` neighbour slots
    pub polys: Vec<u16>,
    pub areas: Vec<u8>,
    pub flags: Vec<u16>,
}

impl NavMeshTileData {
    /// Wraps a rebuilt layer mesh with the placement of its layer
    pub fn from_poly_mesh(
        header: &TileLayerHeader,
        mesh: TileCachePolyMesh,
        walkable_height: f32,
        walkable_radius: f32,
        walkable_climb: f32,
        cs: f32,
        ch: f32,
    ) -> Result<Self> {
        if mesh.nverts() >= MESH_NULL_IDX as usize {
            return Err(Error::InvalidMesh(format!(
                "tile ({}, {}, {}) has {} vertices",
                header.tx,
                header.ty,
                header.tlayer,
                mesh.nverts()
            )));
        }
        for i in 0..mesh.npolys() {
            let p = mesh.poly(i);
            let nv = count_poly_verts(p, mesh.nvp);
            if nv < 3 || p[..nv].iter().any(|&v| v as usize >= mesh.nverts()) {
                return Err(Error::InvalidMesh(format!(
                    "polygon {} of tile ({}, {}, {}) is malformed",
                    i, header.tx, header.ty, header.tlayer
                )));
            }
        }

        Ok(Self {
            x: header.tx,
            y: header.ty,
            layer: header.tlayer,
            bmin: Vec3::from(header.bmin),
            bmax: Vec3::from(header.bmax),
            cs,
            ch,
            walkable_height,
            walkable_radius,
            walkable_climb,
            nvp: mesh.nvp,
            verts: mesh.verts,
            polys: mesh.polys,
            areas: mesh.areas,
            flags: mesh.flags,
        })
    }

    pub fn poly_count(&self) -> usize {
        self.areas.len()
    }

    pub fn vert_count(&self) -> usize {
        self.verts.len() / 3
    }

    /// World-space position of vertex `i`
    pub fn world_vertex(&self, i: usize) -> Vec3 {
        let v = &self.verts[i * 3..i * 3 + 3];
        self.bmin + Vec3::new(v[0] as f32 * self.cs, v[1] as f32 * self.ch, v[2] as f32 * self.cs)
    }

    /// Vertex indices of polygon `i`
    pub fn poly_verts(&self, i: usize) -> &[u16] {
        let p = &self.polys[i * self.nvp * 2..];
        &p[..count_poly_verts(p, self.nvp)]
    }

    /// Number of polygon edges that lead into a neighbouring tile
    pub fn portal_edge_count(&self) -> usize {
        (0..self.poly_count())
            .map(|i| {
                let p = &self.polys[i * self.nvp * 2..(i + 1) * self.nvp * 2];
                p[self.nvp..]
                    .iter()
                    .filter(|&&n| n != MESH_NULL_IDX && n & EXT_LINK != 0)
                    .count()
            })
            .sum()
    }
}

/// Consumer of rebuilt navmesh tiles
pub trait TileMeshTarget {
    /// Adds a tile; fails if a tile already exists at its location
    fn add_tile(&mut self, data: NavMeshTileData, ownership: TileOwnership) -> Result<()>;

    /// Removes the tile at (x, y, layer) if present.
    ///
    /// Returns the tile data when it was added with [`TileOwnership::External`].
    fn remove_tile(&mut self, x: i32, y: i32, layer: i32) -> Result<Option<NavMeshTileData>>;

    /// Puts `data` in place of whatever tile occupies its location.
    ///
    /// On error the previous tile must stay in place. Returns the previous tile
    /// data when it was added with [`TileOwnership::External`].
    fn replace_tile(&mut self, data: NavMeshTileData, ownership: TileOwnership) -> Result<Option<NavMeshTileData>>;
}

#[derive(Debug, Clone)]
struct NavMeshTile {
    data: NavMeshTileData,
    ownership: TileOwnership,
}

/// In-memory navigation mesh made of independently replaceable tiles
#[derive(Debug, Clone)]
pub struct TiledNavMesh {
    max_tiles: usize,
    tiles: HashMap<(i32, i32, i32), NavMeshTile>,
}

impl TiledNavMesh {
    pub fn new(max_tiles: usize) -> Self {
        Self {
            max_tiles,
            tiles: HashMap::with_capacity(max_tiles),
        }
    }

    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&NavMeshTileData> {
        self.tiles.get(&(x, y, layer)).map(|t| &t.data)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn max_tiles(&self) -> usize {
        self.max_tiles
    }

    pub fn poly_count(&self) -> usize {
        self.tiles.values().map(|t| t.data.poly_count()).sum()
    }

    /// All tiles, in no particular order
    pub fn tiles(&self) -> impl Iterator<Item = &NavMeshTileData> {
        self.tiles.values().map(|t| &t.data)
    }
}

impl TileMeshTarget for TiledNavMesh {
    fn add_tile(&mut self, data: NavMeshTileData, ownership: TileOwnership) -> Result<()> {
        let key = (data.x, data.y, data.layer);
        if self.tiles.contains_key(&key) {
            return Err(Error::AlreadyOccupied {
                x: data.x,
                y: data.y,
                layer: data.layer,
            });
        }
        if self.tiles.len() >= self.max_tiles {
            return Err(Error::OutOfMemory(format!(
                "navmesh holds the maximum of {} tiles",
                self.max_tiles
            )));
        }

        log::trace!(
            "Navmesh tile ({}, {}, {}) added with {} polygons",
            data.x,
            data.y,
            data.layer,
            data.poly_count()
        );
        self.tiles.insert(key, NavMeshTile { data, ownership });
        Ok(())
    }

    fn remove_tile(&mut self, x: i32, y: i32, layer: i32) -> Result<Option<NavMeshTileData>> {
        Ok(self
            .tiles
            .remove(&(x, y, layer))
            .and_then(|tile| match tile.ownership {
                TileOwnership::Owned => None,
                TileOwnership::External => Some(tile.data),
            }))
    }

    fn replace_tile(&mut self, data: NavMeshTileData, ownership: TileOwnership) -> Result<Option<NavMeshTileData>> {
        let key = (data.x, data.y, data.layer);
        if !self.tiles.contains_key(&key) {
            self.add_tile(data, ownership)?;
            return Ok(None);
        }

        log::trace!(
            "Navmesh tile ({}, {}, {}) replaced with {} polygons",
            data.x,
            data.y,
            data.layer,
            data.poly_count()
        );
        let old = self.tiles.insert(key, NavMeshTile { data, ownership });
        Ok(old.and_then(|tile| match tile.ownership {
            TileOwnership::Owned => None,
            TileOwnership::External => Some(tile.data),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(x: i32, y: i32) -> NavMeshTileData {
        NavMeshTileData {
            x,
            y,
            layer: 0,
            bmin: Vec3::new(10.0, 1.0, 20.0),
            bmax: Vec3::new(12.0, 2.0, 22.0),
            cs: 0.5,
            ch: 0.25,
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
            nvp: 3,
            verts: vec![0, 0, 0, 0, 4, 4, 4, 0, 4],
            polys: vec![0, 1, 2, MESH_NULL_IDX, EXT_LINK | 1, MESH_NULL_IDX],
            areas: vec![63],
            flags: vec![1],
        }
    }

    #[test]
    fn test_world_vertex() {
        let t = tile(0, 0);
        assert_eq!(t.world_vertex(1), Vec3::new(10.0, 2.0, 22.0));
        assert_eq!(t.poly_verts(0), &[0, 1, 2]);
        assert_eq!(t.portal_edge_count(), 1);
    }

    #[test]
    fn test_add_remove_ownership() {
        let mut navmesh = TiledNavMesh::new(4);
        navmesh.add_tile(tile(0, 0), TileOwnership::Owned).unwrap();
        navmesh.add_tile(tile(1, 0), TileOwnership::External).unwrap();
        assert_eq!(navmesh.tile_count(), 2);
        assert_eq!(navmesh.poly_count(), 2);

        assert!(matches!(
            navmesh.add_tile(tile(0, 0), TileOwnership::Owned),
            Err(Error::AlreadyOccupied { x: 0, y: 0, layer: 0 })
        ));

        assert_eq!(navmesh.remove_tile(0, 0, 0).unwrap(), None);
        assert_eq!(navmesh.remove_tile(1, 0, 0).unwrap(), Some(tile(1, 0)));
        assert_eq!(navmesh.remove_tile(5, 5, 0).unwrap(), None);
        assert_eq!(navmesh.tile_count(), 0);
    }

    #[test]
    fn test_capacity() {
        let mut navmesh = TiledNavMesh::new(1);
        navmesh.add_tile(tile(0, 0), TileOwnership::Owned).unwrap();
        let err = navmesh.add_tile(tile(1, 0), TileOwnership::Owned).unwrap_err();
        assert!(err.is_capacity());
    }

    #[test]
    fn test_replace_tile() {
        let mut navmesh = TiledNavMesh::new(1);
        navmesh.add_tile(tile(0, 0), TileOwnership::External).unwrap();

        let mut rebuilt = tile(0, 0);
        rebuilt.flags = vec![7];
        assert_eq!(navmesh.replace_tile(rebuilt, TileOwnership::Owned).unwrap(), Some(tile(0, 0)));
        assert_eq!(navmesh.tile_count(), 1);
        assert_eq!(navmesh.get_tile_at(0, 0, 0).map(|t| t.flags[0]), Some(7));

        // Replacing an owned tile hands nothing back.
        assert_eq!(navmesh.replace_tile(tile(0, 0), TileOwnership::Owned).unwrap(), None);

        // A new location still counts against capacity and leaves the mesh untouched.
        let err = navmesh.replace_tile(tile(1, 0), TileOwnership::Owned).unwrap_err();
        assert!(err.is_capacity());
        assert!(navmesh.get_tile_at(1, 0, 0).is_none());
        assert!(navmesh.get_tile_at(0, 0, 0).is_some());
    }
}
