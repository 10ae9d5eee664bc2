//! Tile cache implementation
//!
//! The [`TileCache`] stores compressed tile layers in a fixed-capacity slot
//! table, tracks temporary obstacles in a second slot table and rebuilds
//! navmesh tiles incrementally when obstacles are added or removed.
//!
//! Tiles are found by location through a hash table whose buckets are chained
//! through the slots themselves. The same `next` link threads the free list of
//! unused slots.

use std::collections::VecDeque;
use std::fmt;

use glam::Vec3;
use tilecache_builder::TileLayerHeader;
use tilecache_common::{next_pow2, overlap_bounds, Error, Result};

use super::nav_mesh::{NavMeshTileData, TileMeshTarget, TileOwnership};
use super::obstacle::{Obstacle, ObstacleAction, ObstacleRequest, ObstacleShape, ObstacleState, MAX_TOUCHED_TILES};
use super::params::{OccupiedPolicy, TileCacheParams};
use super::refs::{CompressedTileRef, ObstacleRef, RefCodec};
use super::tile_cache_builder::{TileMeshProcess, TileRebuild};
use super::tile_cache_data::{Lz4Compressor, TileCompressor};

/// Maximum number of queued obstacle requests
pub const MAX_REQUESTS: usize = 64;

/// Maximum number of tiles queued for rebuild
pub const MAX_UPDATE: usize = 64;

/// Maximum number of layers gathered per tile column by a bounds query
const MAX_TILES_PER_COLUMN: usize = 32;

const TILE_HASH_H1: u32 = 0x8da6_b343;
const TILE_HASH_H2: u32 = 0xd816_3841;

fn compute_tile_hash(x: i32, y: i32, mask: usize) -> usize {
    let n = TILE_HASH_H1
        .wrapping_mul(x as u32)
        .wrapping_add(TILE_HASH_H2.wrapping_mul(y as u32));
    n as usize & mask
}

/// Compressed tile slot
#[derive(Debug, Clone)]
pub struct CompressedTile {
    salt: u32,
    header: Option<TileLayerHeader>,
    data: Vec<u8>,
    ownership: TileOwnership,
    /// Next slot in the location bucket, or in the free list
    next: Option<usize>,
}

impl CompressedTile {
    fn empty(next: Option<usize>) -> Self {
        Self {
            salt: 1,
            header: None,
            data: Vec::new(),
            ownership: TileOwnership::Owned,
            next,
        }
    }

    pub fn salt(&self) -> u32 {
        self.salt
    }

    /// Header of the stored layer, `None` for a free slot
    pub fn header(&self) -> Option<&TileLayerHeader> {
        self.header.as_ref()
    }

    /// Full payload: header followed by the compressed grids
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn ownership(&self) -> TileOwnership {
        self.ownership
    }
}

/// Tile cache managing compressed tiles and temporary obstacles
pub struct TileCache {
    params: TileCacheParams,
    tile_codec: RefCodec,
    obstacle_codec: RefCodec,

    tile_lut_mask: usize,
    pos_lut: Vec<Option<usize>>,
    tiles: Vec<CompressedTile>,
    next_free_tile: Option<usize>,

    obstacles: Vec<Obstacle>,
    next_free_obstacle: Option<usize>,

    requests: VecDeque<ObstacleRequest>,
    update: VecDeque<CompressedTileRef>,

    compressor: Box<dyn TileCompressor>,
    mesh_process: Option<Box<dyn TileMeshProcess>>,
}

impl fmt::Debug for TileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileCache")
            .field("params", &self.params)
            .field("tiles", &self.tile_count())
            .field("obstacles", &self.active_obstacle_count())
            .field("requests", &self.requests.len())
            .field("update", &self.update.len())
            .field("mesh_process", &self.mesh_process.is_some())
            .finish()
    }
}

impl TileCache {
    /// Creates a tile cache using LZ4 compression
    pub fn new(params: TileCacheParams) -> Result<Self> {
        Self::with_compressor(params, Box::new(Lz4Compressor))
    }

    /// Creates a tile cache with a custom compressor
    pub fn with_compressor(params: TileCacheParams, compressor: Box<dyn TileCompressor>) -> Result<Self> {
        params.validate()?;
        let tile_codec = RefCodec::new(params.max_tiles)?;
        let obstacle_codec = RefCodec::new(params.max_obstacles)?;

        let max_tiles = params.max_tiles as usize;
        let max_obstacles = params.max_obstacles as usize;

        // Free lists are threaded so the first allocation takes slot 0.
        let tiles = (0..max_tiles)
            .map(|i| CompressedTile::empty((i + 1 < max_tiles).then_some(i + 1)))
            .collect();
        let obstacles = (0..max_obstacles)
            .map(|i| Obstacle::empty((i + 1 < max_obstacles).then_some(i + 1)))
            .collect();

        let lut_size = next_pow2((params.max_tiles / 4).max(1)) as usize;

        log::debug!(
            "Tile cache created: {} tile slots ({} index bits), {} obstacle slots, {} buckets",
            max_tiles,
            tile_codec.index_bits(),
            max_obstacles,
            lut_size
        );

        Ok(Self {
            params,
            tile_codec,
            obstacle_codec,
            tile_lut_mask: lut_size - 1,
            pos_lut: vec![None; lut_size],
            tiles,
            next_free_tile: Some(0),
            obstacles,
            next_free_obstacle: Some(0),
            requests: VecDeque::with_capacity(MAX_REQUESTS),
            update: VecDeque::with_capacity(MAX_UPDATE),
            compressor,
            mesh_process: None,
        })
    }

    /// Installs the hook applied to every rebuilt tile before publication
    pub fn set_mesh_process(&mut self, process: Box<dyn TileMeshProcess>) {
        self.mesh_process = Some(process);
    }

    pub fn params(&self) -> &TileCacheParams {
        &self.params
    }

    pub fn compressor(&self) -> &dyn TileCompressor {
        self.compressor.as_ref()
    }

    // Tiles

    /// Number of occupied tile slots
    pub fn tile_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.header.is_some()).count()
    }

    pub fn tile_capacity(&self) -> usize {
        self.tiles.len()
    }

    /// Tile slot by index, including free slots
    pub fn get_tile(&self, index: usize) -> Option<&CompressedTile> {
        self.tiles.get(index)
    }

    /// Reference to the tile in slot `index`, `None` for a free slot
    pub fn get_tile_ref(&self, index: usize) -> Option<CompressedTileRef> {
        let tile = self.tiles.get(index)?;
        tile.header.as_ref()?;
        Some(CompressedTileRef(self.tile_codec.encode(tile.salt, index)))
    }

    /// Resolves a tile reference, rejecting stale and out-of-range references
    pub fn get_tile_by_ref(&self, r: CompressedTileRef) -> Option<&CompressedTile> {
        self.resolve_tile(r).map(|i| &self.tiles[i])
    }

    fn resolve_tile(&self, r: CompressedTileRef) -> Option<usize> {
        if r.is_null() {
            return None;
        }
        let index = self.tile_codec.decode_index(r.0);
        let tile = self.tiles.get(index)?;
        (tile.salt == self.tile_codec.decode_salt(r.0) && tile.header.is_some()).then_some(index)
    }

    fn bucket(&self, x: i32, y: i32) -> impl Iterator<Item = usize> + '_ {
        let mut cur = self.pos_lut[compute_tile_hash(x, y, self.tile_lut_mask)];
        std::iter::from_fn(move || {
            let i = cur?;
            cur = self.tiles[i].next;
            Some(i)
        })
    }

    fn find_tile(&self, x: i32, y: i32, layer: i32) -> Option<usize> {
        self.bucket(x, y).find(|&i| {
            self.tiles[i]
                .header
                .is_some_and(|h| h.tx == x && h.ty == y && h.tlayer == layer)
        })
    }

    /// Tile stored at (x, y, layer)
    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&CompressedTile> {
        self.find_tile(x, y, layer).map(|i| &self.tiles[i])
    }

    /// References of all layers stored at tile column (x, y)
    pub fn get_tiles_at(&self, x: i32, y: i32) -> Vec<CompressedTileRef> {
        self.bucket(x, y)
            .filter(|&i| self.tiles[i].header.is_some_and(|h| h.tx == x && h.ty == y))
            .filter_map(|i| self.get_tile_ref(i))
            .collect()
    }

    /// Inserts a compressed tile payload.
    ///
    /// The header is validated before anything is stored. An occupied location
    /// either fails or, with [`OccupiedPolicy::Ignore`], keeps the existing tile
    /// and returns its reference.
    pub fn add_tile(&mut self, data: Vec<u8>, ownership: TileOwnership) -> Result<CompressedTileRef> {
        let header = TileLayerHeader::parse(&data)?;

        if let Some(existing) = self.find_tile(header.tx, header.ty, header.tlayer) {
            return match self.params.occupied_policy {
                OccupiedPolicy::Fail => Err(Error::AlreadyOccupied {
                    x: header.tx,
                    y: header.ty,
                    layer: header.tlayer,
                }),
                OccupiedPolicy::Ignore => {
                    log::debug!(
                        "Tile ({}, {}, {}) already present, new data ignored",
                        header.tx,
                        header.ty,
                        header.tlayer
                    );
                    Ok(CompressedTileRef(
                        self.tile_codec.encode(self.tiles[existing].salt, existing),
                    ))
                }
            };
        }

        let index = self.next_free_tile.ok_or_else(|| {
            Error::OutOfMemory(format!("all {} tile slots are in use", self.tiles.len()))
        })?;

        let h = compute_tile_hash(header.tx, header.ty, self.tile_lut_mask);
        let tile = &mut self.tiles[index];
        self.next_free_tile = tile.next;
        tile.next = self.pos_lut[h];
        tile.header = Some(header);
        tile.data = data;
        tile.ownership = ownership;
        self.pos_lut[h] = Some(index);

        log::trace!(
            "Tile ({}, {}, {}) stored in slot {}",
            header.tx,
            header.ty,
            header.tlayer,
            index
        );

        Ok(CompressedTileRef(self.tile_codec.encode(self.tiles[index].salt, index)))
    }

    /// Removes a tile and recycles its slot.
    ///
    /// Returns the payload if the tile was added with
    /// [`TileOwnership::External`]. Stale references yield [`Error::NotFound`].
    pub fn remove_tile(&mut self, r: CompressedTileRef) -> Result<Option<Vec<u8>>> {
        let index = self.resolve_tile(r).ok_or(Error::NotFound)?;
        let header = self.tiles[index].header.ok_or(Error::NotFound)?;

        // Unlink from the location bucket.
        let h = compute_tile_hash(header.tx, header.ty, self.tile_lut_mask);
        let next = self.tiles[index].next;
        if self.pos_lut[h] == Some(index) {
            self.pos_lut[h] = next;
        } else {
            let mut cur = self.pos_lut[h];
            while let Some(i) = cur {
                if self.tiles[i].next == Some(index) {
                    self.tiles[i].next = next;
                    break;
                }
                cur = self.tiles[i].next;
            }
        }

        let codec = self.tile_codec;
        let tile = &mut self.tiles[index];
        let data = std::mem::take(&mut tile.data);
        tile.header = None;
        tile.salt = codec.next_salt(tile.salt);
        tile.next = self.next_free_tile;
        self.next_free_tile = Some(index);

        Ok(match std::mem::take(&mut tile.ownership) {
            TileOwnership::Owned => None,
            TileOwnership::External => Some(data),
        })
    }

    /// World-space bounds of the usable part of a tile layer
    pub fn calc_tight_tile_bounds(&self, header: &TileLayerHeader) -> (Vec3, Vec3) {
        let cs = self.params.cs;
        let bmin = Vec3::new(
            header.bmin[0] + header.minx as f32 * cs,
            header.bmin[1],
            header.bmin[2] + header.miny as f32 * cs,
        );
        let bmax = Vec3::new(
            header.bmin[0] + (header.maxx as f32 + 1.0) * cs,
            header.bmax[1],
            header.bmin[2] + (header.maxy as f32 + 1.0) * cs,
        );
        (bmin, bmax)
    }

    /// Tiles whose tight bounds overlap the query box, at most `max_results`
    pub fn query_tiles(&self, bmin: Vec3, bmax: Vec3, max_results: usize) -> Vec<CompressedTileRef> {
        let tw = self.params.tile_world_width();
        let th = self.params.tile_world_height();
        let orig = self.params.origin;

        let tx0 = ((bmin.x - orig.x) / tw).floor() as i32;
        let tx1 = ((bmax.x - orig.x) / tw).floor() as i32;
        let ty0 = ((bmin.z - orig.z) / th).floor() as i32;
        let ty1 = ((bmax.z - orig.z) / th).floor() as i32;

        let mut results = Vec::new();
        for ty in ty0..=ty1 {
            for tx in tx0..=tx1 {
                for r in self.get_tiles_at(tx, ty).into_iter().take(MAX_TILES_PER_COLUMN) {
                    if results.len() >= max_results {
                        return results;
                    }
                    let Some(header) = self.get_tile_by_ref(r).and_then(CompressedTile::header) else {
                        continue;
                    };
                    let (tbmin, tbmax) = self.calc_tight_tile_bounds(header);
                    if overlap_bounds(&bmin, &bmax, &tbmin, &tbmax) {
                        results.push(r);
                    }
                }
            }
        }
        results
    }

    // Obstacles

    pub fn obstacle_capacity(&self) -> usize {
        self.obstacles.len()
    }

    /// Number of obstacles that are not free
    pub fn active_obstacle_count(&self) -> usize {
        self.obstacles
            .iter()
            .filter(|o| o.state != ObstacleState::Empty)
            .count()
    }

    /// Obstacle slot by index, including free slots
    pub fn get_obstacle(&self, index: usize) -> Option<&Obstacle> {
        self.obstacles.get(index)
    }

    /// Reference to the obstacle in slot `index`, `None` for a free slot
    pub fn get_obstacle_ref(&self, index: usize) -> Option<ObstacleRef> {
        let ob = self.obstacles.get(index)?;
        (ob.state != ObstacleState::Empty).then(|| ObstacleRef(self.obstacle_codec.encode(ob.salt, index)))
    }

    /// Resolves an obstacle reference, rejecting stale and out-of-range references
    pub fn get_obstacle_by_ref(&self, r: ObstacleRef) -> Option<&Obstacle> {
        self.resolve_obstacle(r).map(|i| &self.obstacles[i])
    }

    fn resolve_obstacle(&self, r: ObstacleRef) -> Option<usize> {
        if r.is_null() {
            return None;
        }
        let index = self.obstacle_codec.decode_index(r.0);
        let ob = self.obstacles.get(index)?;
        (ob.salt == self.obstacle_codec.decode_salt(r.0) && ob.state != ObstacleState::Empty).then_some(index)
    }

    pub fn get_obstacle_bounds(&self, obstacle: &Obstacle) -> (Vec3, Vec3) {
        obstacle.shape.bounds()
    }

    /// Adds an upright cylinder obstacle standing on `pos`
    pub fn add_obstacle(&mut self, pos: Vec3, radius: f32, height: f32) -> Result<ObstacleRef> {
        self.add_obstacle_shape(ObstacleShape::Cylinder { pos, radius, height })
    }

    /// Adds an axis-aligned box obstacle
    pub fn add_box_obstacle(&mut self, bmin: Vec3, bmax: Vec3) -> Result<ObstacleRef> {
        self.add_obstacle_shape(ObstacleShape::Box { bmin, bmax })
    }

    /// Adds a box obstacle rotated by `y_radians` about the y axis
    pub fn add_oriented_box_obstacle(&mut self, center: Vec3, half_extents: Vec3, y_radians: f32) -> Result<ObstacleRef> {
        self.add_obstacle_shape(ObstacleShape::oriented_box(center, half_extents, y_radians))
    }

    /// Allocates an obstacle slot and queues its add request.
    ///
    /// The obstacle takes effect during later [`update`](Self::update) calls.
    pub fn add_obstacle_shape(&mut self, shape: ObstacleShape) -> Result<ObstacleRef> {
        if self.requests.len() >= MAX_REQUESTS {
            return Err(Error::BufferTooSmall(format!(
                "obstacle request queue holds {} requests",
                MAX_REQUESTS
            )));
        }

        let index = self.next_free_obstacle.ok_or_else(|| {
            Error::OutOfMemory(format!("all {} obstacle slots are in use", self.obstacles.len()))
        })?;

        let ob = &mut self.obstacles[index];
        self.next_free_obstacle = ob.next.take();
        ob.shape = shape;
        ob.state = ObstacleState::Processing;
        ob.touched.clear();
        ob.pending.clear();

        let r = ObstacleRef(self.obstacle_codec.encode(ob.salt, index));
        self.requests.push_back(ObstacleRequest {
            action: ObstacleAction::Add,
            obstacle: r,
        });
        log::trace!("Obstacle {:#x} queued for addition in slot {}", r.0, index);
        Ok(r)
    }

    /// Queues removal of an obstacle. A null reference is a no-op.
    pub fn remove_obstacle(&mut self, r: ObstacleRef) -> Result<()> {
        if r.is_null() {
            return Ok(());
        }
        if self.requests.len() >= MAX_REQUESTS {
            return Err(Error::BufferTooSmall(format!(
                "obstacle request queue holds {} requests",
                MAX_REQUESTS
            )));
        }
        self.requests.push_back(ObstacleRequest {
            action: ObstacleAction::Remove,
            obstacle: r,
        });
        log::trace!("Obstacle {:#x} queued for removal", r.0);
        Ok(())
    }

    /// Number of obstacle requests waiting for the next update
    pub fn pending_request_count(&self) -> usize {
        self.requests.len()
    }

    /// Number of tiles waiting for a rebuild
    pub fn pending_update_count(&self) -> usize {
        self.update.len()
    }

    // Update

    /// Admits all queued obstacle requests, then rebuilds at most one tile.
    ///
    /// Returns `true` once there is nothing left to do. A failed rebuild still
    /// advances the obstacles waiting for that tile before the error is returned.
    pub fn update(&mut self, navmesh: &mut dyn TileMeshTarget) -> Result<bool> {
        self.process_requests();

        if let Some(r) = self.update.pop_front() {
            let status = match self.build_nav_mesh_tile(r, navmesh) {
                Err(Error::NotFound) => {
                    log::debug!("Skipping rebuild of removed tile {:#x}", r.0);
                    Ok(None)
                }
                other => other,
            };
            self.finish_tile_update(r);
            status?;
        }

        Ok(self.update.is_empty() && self.requests.is_empty())
    }

    fn process_requests(&mut self) {
        while let Some(req) = self.requests.pop_front() {
            let Some(index) = self.resolve_obstacle(req.obstacle) else {
                log::debug!("Dropping request for stale obstacle {:#x}", req.obstacle.0);
                continue;
            };

            if req.action == ObstacleAction::Add {
                let (bmin, bmax) = self.obstacles[index].shape.bounds();
                let touched = self.query_tiles(bmin, bmax, MAX_TOUCHED_TILES);
                self.obstacles[index].touched = touched;
            } else {
                self.obstacles[index].state = ObstacleState::Removing;
            }

            let touched = self.obstacles[index].touched.clone();
            let mut pending = Vec::with_capacity(touched.len());
            for r in touched {
                if self.update.contains(&r) {
                    pending.push(r);
                } else if self.update.len() < MAX_UPDATE {
                    self.update.push_back(r);
                    pending.push(r);
                } else {
                    log::warn!(
                        "Rebuild queue full ({} tiles), tile {:#x} dropped",
                        MAX_UPDATE,
                        r.0
                    );
                }
            }
            self.obstacles[index].pending = pending;

            if self.obstacles[index].pending.is_empty() {
                self.advance_obstacle(index);
            }
        }
    }

    fn finish_tile_update(&mut self, r: CompressedTileRef) {
        for index in 0..self.obstacles.len() {
            let ob = &mut self.obstacles[index];
            if !matches!(ob.state, ObstacleState::Processing | ObstacleState::Removing) {
                continue;
            }
            if let Some(pos) = ob.pending.iter().position(|&p| p == r) {
                ob.pending.swap_remove(pos);
                if ob.pending.is_empty() {
                    self.advance_obstacle(index);
                }
            }
        }
    }

    fn advance_obstacle(&mut self, index: usize) {
        let codec = self.obstacle_codec;
        let ob = &mut self.obstacles[index];
        match ob.state {
            ObstacleState::Processing => {
                ob.state = ObstacleState::Processed;
                log::trace!("Obstacle in slot {} processed", index);
            }
            ObstacleState::Removing => {
                ob.state = ObstacleState::Empty;
                ob.salt = codec.next_salt(ob.salt);
                ob.touched.clear();
                ob.pending.clear();
                ob.next = self.next_free_obstacle;
                self.next_free_obstacle = Some(index);
                log::trace!("Obstacle slot {} recycled", index);
            }
            ObstacleState::Empty | ObstacleState::Processed => {}
        }
    }

    /// Builds every layer of tile column (tx, ty) into the navmesh
    pub fn build_nav_mesh_tiles_at(&mut self, tx: i32, ty: i32, navmesh: &mut dyn TileMeshTarget) -> Result<()> {
        for r in self.get_tiles_at(tx, ty) {
            self.build_nav_mesh_tile(r, navmesh)?;
        }
        Ok(())
    }

    /// Rebuilds one tile with the obstacles currently carving it and publishes
    /// the result. A tile left without polygons is removed from the navmesh.
    ///
    /// The previous navmesh tile stays in place when the build or the publish
    /// fails. Returns the previous tile data if the navmesh held it as
    /// [`TileOwnership::External`].
    pub fn build_nav_mesh_tile(
        &mut self,
        r: CompressedTileRef,
        navmesh: &mut dyn TileMeshTarget,
    ) -> Result<Option<NavMeshTileData>> {
        let index = self.resolve_tile(r).ok_or(Error::NotFound)?;
        let tile = &self.tiles[index];
        let header = tile.header.ok_or(Error::NotFound)?;

        let built = TileRebuild::decompress(&self.params, self.compressor.as_ref(), &tile.data).and_then(|mut rebuild| {
            for ob in self.obstacles.iter().filter(|o| o.is_carving() && o.touched.contains(&r)) {
                rebuild.carve(&ob.shape);
            }
            rebuild.build(self.mesh_process.as_deref_mut().map(|p| p as &mut dyn TileMeshProcess))
        });

        let built = match built {
            Ok(built) => built,
            Err(e) => {
                log::error!(
                    "Rebuild of tile ({}, {}, {}) failed: {}",
                    header.tx,
                    header.ty,
                    header.tlayer,
                    e
                );
                return Err(e);
            }
        };

        let released = match built {
            Some(data) => navmesh.replace_tile(data, TileOwnership::Owned)?,
            None => navmesh.remove_tile(header.tx, header.ty, header.tlayer)?,
        };
        if released.is_some() {
            log::debug!(
                "Navmesh tile ({}, {}, {}) handed back its external data",
                header.tx,
                header.ty,
                header.tlayer
            );
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nav_mesh::TiledNavMesh;
    use crate::test_helpers::{flat_layer_data, flat_layer_data_at, test_params};

    fn settle(cache: &mut TileCache, navmesh: &mut TiledNavMesh) -> usize {
        let mut ticks = 0;
        while !cache.update(navmesh).unwrap() {
            ticks += 1;
            assert!(ticks < 1000, "tile cache never settled");
        }
        ticks + 1
    }

    #[test]
    fn test_create_tile_cache() {
        let cache = TileCache::new(test_params()).unwrap();
        assert_eq!(cache.tile_capacity(), 16);
        assert_eq!(cache.obstacle_capacity(), 128);
        assert_eq!(cache.tile_count(), 0);
        assert_eq!(cache.active_obstacle_count(), 0);
        assert_eq!(cache.pos_lut.len(), 4);
    }

    #[test]
    fn test_invalid_params() {
        let params = test_params().with_max_verts_per_poly(8);
        assert!(matches!(TileCache::new(params), Err(Error::InvalidParam(_))));
    }

    #[test]
    fn test_tile_hash_spreads_neighbours() {
        let mask = 63;
        assert_ne!(compute_tile_hash(0, 0, mask), compute_tile_hash(1, 0, mask));
        assert_eq!(compute_tile_hash(-3, 7, mask), compute_tile_hash(-3, 7, mask));
        assert!(compute_tile_hash(-1000, 1000, mask) <= mask);
    }

    #[test]
    fn test_add_remove_round_trip() {
        let params = test_params();
        let mut cache = TileCache::new(params.clone()).unwrap();

        let r = cache.add_tile(flat_layer_data(&params, 0, 0), TileOwnership::Owned).unwrap();
        let tile = cache.get_tile_by_ref(r).unwrap();
        assert_eq!(tile.salt(), 1);
        assert_eq!(tile.header().map(|h| (h.tx, h.ty, h.tlayer)), Some((0, 0, 0)));
        assert_eq!(cache.get_tile_ref(0), Some(r));

        assert_eq!(cache.remove_tile(r).unwrap(), None);
        assert!(cache.get_tile_by_ref(r).is_none());
        assert!(cache.get_tile_at(0, 0, 0).is_none());
        assert_eq!(cache.get_tile(0).map(CompressedTile::salt), Some(2));
        assert!(matches!(cache.remove_tile(r), Err(Error::NotFound)));

        // The slot is reused with the new salt.
        let r2 = cache.add_tile(flat_layer_data(&params, 0, 0), TileOwnership::Owned).unwrap();
        assert_ne!(r, r2);
        assert_eq!(cache.tile_codec.decode_index(r2.0), 0);
        assert_eq!(cache.tile_codec.decode_salt(r2.0), 2);
    }

    #[test]
    fn test_remove_external_tile_returns_data() {
        let params = test_params();
        let mut cache = TileCache::new(params.clone()).unwrap();
        let data = flat_layer_data(&params, 2, 3);
        let r = cache.add_tile(data.clone(), TileOwnership::External).unwrap();
        assert_eq!(cache.get_tile_by_ref(r).map(CompressedTile::ownership), Some(TileOwnership::External));
        assert_eq!(cache.remove_tile(r).unwrap(), Some(data));
    }

    #[test]
    fn test_add_tile_rejects_bad_header() {
        let params = test_params();
        let mut cache = TileCache::new(params.clone()).unwrap();

        let mut data = flat_layer_data(&params, 0, 0);
        data[0] ^= 0xff;
        assert!(matches!(cache.add_tile(data, TileOwnership::Owned), Err(Error::WrongMagic { .. })));

        let mut data = flat_layer_data(&params, 0, 0);
        data[4] = 7;
        assert!(matches!(cache.add_tile(data, TileOwnership::Owned), Err(Error::WrongVersion { .. })));

        assert!(cache.add_tile(vec![0; 10], TileOwnership::Owned).is_err());
        assert_eq!(cache.tile_count(), 0);
    }

    #[test]
    fn test_occupied_policy() {
        let params = test_params();
        let mut cache = TileCache::new(params.clone()).unwrap();
        let r = cache.add_tile(flat_layer_data(&params, 1, 1), TileOwnership::Owned).unwrap();
        assert!(matches!(
            cache.add_tile(flat_layer_data(&params, 1, 1), TileOwnership::Owned),
            Err(Error::AlreadyOccupied { x: 1, y: 1, layer: 0 })
        ));

        let params = params.with_occupied_policy(OccupiedPolicy::Ignore);
        let mut cache = TileCache::new(params.clone()).unwrap();
        let first = cache.add_tile(flat_layer_data(&params, 1, 1), TileOwnership::Owned).unwrap();
        let second = cache.add_tile(flat_layer_data(&params, 1, 1), TileOwnership::Owned).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, r);
        assert_eq!(cache.tile_count(), 1);
    }

    #[test]
    fn test_tile_slots_exhausted() {
        let params = test_params().with_capacity(2, 16);
        let mut cache = TileCache::new(params.clone()).unwrap();
        cache.add_tile(flat_layer_data(&params, 0, 0), TileOwnership::Owned).unwrap();
        cache.add_tile(flat_layer_data(&params, 1, 0), TileOwnership::Owned).unwrap();
        let err = cache
            .add_tile(flat_layer_data(&params, 2, 0), TileOwnership::Owned)
            .unwrap_err();
        assert!(err.is_capacity());
    }

    #[test]
    fn test_tiles_at_location() {
        let params = test_params();
        let mut cache = TileCache::new(params.clone()).unwrap();
        let a = cache.add_tile(flat_layer_data_at(&params, 3, 4, 0), TileOwnership::Owned).unwrap();
        let b = cache.add_tile(flat_layer_data_at(&params, 3, 4, 1), TileOwnership::Owned).unwrap();
        let c = cache.add_tile(flat_layer_data_at(&params, 4, 3, 0), TileOwnership::Owned).unwrap();

        let mut at = cache.get_tiles_at(3, 4);
        at.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(at, expected);
        assert_eq!(cache.get_tiles_at(4, 3), vec![c]);
        assert!(cache.get_tiles_at(5, 5).is_empty());

        // Removing from the middle of a bucket keeps the chain intact.
        cache.remove_tile(a).unwrap();
        assert_eq!(cache.get_tiles_at(3, 4), vec![b]);
        assert!(cache.get_tile_at(3, 4, 1).is_some());
        assert!(cache.get_tile_at(4, 3, 0).is_some());
    }

    #[test]
    fn test_query_tiles() {
        let params = test_params();
        let mut cache = TileCache::new(params.clone()).unwrap();
        let mut refs = Vec::new();
        for ty in 0..2 {
            for tx in 0..2 {
                refs.push(cache.add_tile(flat_layer_data(&params, tx, ty), TileOwnership::Owned).unwrap());
            }
        }

        let header = *cache.get_tile_by_ref(refs[3]).and_then(CompressedTile::header).unwrap();
        let (bmin, bmax) = cache.calc_tight_tile_bounds(&header);
        assert_eq!(bmin, Vec3::new(8.0, 0.0, 8.0));
        assert_eq!(bmax, Vec3::new(16.0, 0.0, 16.0));

        let hits = cache.query_tiles(Vec3::new(2.0, -1.0, 2.0), Vec3::new(4.0, 1.0, 4.0), 8);
        assert_eq!(hits, vec![refs[0]]);

        let mut hits = cache.query_tiles(Vec3::new(6.0, -1.0, 6.0), Vec3::new(10.0, 1.0, 10.0), 8);
        hits.sort();
        assert_eq!(hits, refs);

        assert_eq!(cache.query_tiles(Vec3::new(6.0, -1.0, 6.0), Vec3::new(10.0, 1.0, 10.0), 2).len(), 2);

        // Above the layer.
        assert!(cache.query_tiles(Vec3::new(2.0, 3.0, 2.0), Vec3::new(4.0, 5.0, 4.0), 8).is_empty());
    }

    #[test]
    fn test_obstacle_lifecycle() {
        let params = test_params();
        let mut cache = TileCache::new(params.clone()).unwrap();
        let mut navmesh = TiledNavMesh::new(16);

        cache.add_tile(flat_layer_data(&params, 0, 0), TileOwnership::Owned).unwrap();
        cache.build_nav_mesh_tiles_at(0, 0, &mut navmesh).unwrap();
        assert_eq!(navmesh.get_tile_at(0, 0, 0).map(|t| t.poly_count()), Some(1));

        let ob = cache
            .add_box_obstacle(Vec3::new(2.0, -1.0, 2.0), Vec3::new(4.0, 1.0, 4.0))
            .unwrap();
        assert_eq!(cache.get_obstacle_by_ref(ob).map(|o| o.state), Some(ObstacleState::Processing));
        assert_eq!(cache.get_obstacle_ref(0), Some(ob));

        // One rebuild of the single touched tile finishes the obstacle.
        assert!(cache.update(&mut navmesh).unwrap());
        let obstacle = cache.get_obstacle_by_ref(ob).unwrap();
        assert_eq!(obstacle.state, ObstacleState::Processed);
        assert_eq!(obstacle.touched.len(), 1);
        assert!(obstacle.pending.is_empty());
        assert!(navmesh.get_tile_at(0, 0, 0).unwrap().poly_count() > 1);

        cache.remove_obstacle(ob).unwrap();
        assert_eq!(cache.pending_request_count(), 1);
        assert!(cache.update(&mut navmesh).unwrap());
        assert!(cache.get_obstacle_by_ref(ob).is_none());
        assert_eq!(cache.get_obstacle(0).map(|o| (o.state, o.salt)), Some((ObstacleState::Empty, 2)));
        assert_eq!(cache.active_obstacle_count(), 0);
        assert_eq!(navmesh.get_tile_at(0, 0, 0).map(|t| t.poly_count()), Some(1));

        // Removing a stale reference is harmless.
        cache.remove_obstacle(ob).unwrap();
        assert!(cache.update(&mut navmesh).unwrap());
    }

    #[test]
    fn test_full_width_obstacle_removes_navmesh_tile() {
        let params = test_params();
        let mut cache = TileCache::new(params.clone()).unwrap();
        let mut navmesh = TiledNavMesh::new(16);

        cache.add_tile(flat_layer_data(&params, 0, 0), TileOwnership::Owned).unwrap();
        cache.build_nav_mesh_tiles_at(0, 0, &mut navmesh).unwrap();
        assert_eq!(navmesh.tile_count(), 1);

        let ob = cache
            .add_box_obstacle(Vec3::new(0.0, -1.0, 0.0), Vec3::new(7.9, 1.0, 7.9))
            .unwrap();
        settle(&mut cache, &mut navmesh);
        assert_eq!(cache.get_obstacle_by_ref(ob).map(|o| o.state), Some(ObstacleState::Processed));
        assert_eq!(navmesh.tile_count(), 0);

        cache.remove_obstacle(ob).unwrap();
        settle(&mut cache, &mut navmesh);
        assert_eq!(navmesh.tile_count(), 1);
    }

    #[test]
    fn test_obstacle_spanning_tiles() {
        let params = test_params();
        let mut cache = TileCache::new(params.clone()).unwrap();
        let mut navmesh = TiledNavMesh::new(16);
        for tx in 0..2 {
            cache.add_tile(flat_layer_data(&params, tx, 0), TileOwnership::Owned).unwrap();
            cache.build_nav_mesh_tiles_at(tx, 0, &mut navmesh).unwrap();
        }

        let ob = cache.add_obstacle(Vec3::new(8.0, 0.0, 4.0), 1.0, 2.0).unwrap();
        assert!(!cache.update(&mut navmesh).unwrap());
        let obstacle = cache.get_obstacle_by_ref(ob).unwrap();
        assert_eq!(obstacle.touched.len(), 2);
        assert_eq!(obstacle.state, ObstacleState::Processing);
        assert_eq!(obstacle.pending.len(), 1);

        assert!(cache.update(&mut navmesh).unwrap());
        assert_eq!(cache.get_obstacle_by_ref(ob).map(|o| o.state), Some(ObstacleState::Processed));
        assert_eq!(navmesh.tile_count(), 2);
    }

    #[test]
    fn test_obstacle_without_tiles_settles_immediately() {
        let mut cache = TileCache::new(test_params()).unwrap();
        let mut navmesh = TiledNavMesh::new(16);

        let ob = cache
            .add_oriented_box_obstacle(Vec3::new(100.0, 0.0, 100.0), Vec3::new(1.0, 1.0, 2.0), 0.5)
            .unwrap();
        assert!(cache.update(&mut navmesh).unwrap());
        assert_eq!(cache.get_obstacle_by_ref(ob).map(|o| o.state), Some(ObstacleState::Processed));

        cache.remove_obstacle(ob).unwrap();
        assert!(cache.update(&mut navmesh).unwrap());
        assert!(cache.get_obstacle_by_ref(ob).is_none());
    }

    #[test]
    fn test_request_queue_capacity() {
        let mut cache = TileCache::new(test_params()).unwrap();
        let mut refs = Vec::new();
        for i in 0..MAX_REQUESTS {
            refs.push(cache.add_obstacle(Vec3::new(i as f32, 0.0, 0.0), 0.5, 1.0).unwrap());
        }

        let err = cache.add_obstacle(Vec3::ZERO, 0.5, 1.0).unwrap_err();
        assert!(matches!(err, Error::BufferTooSmall(_)));
        assert!(matches!(cache.remove_obstacle(refs[0]), Err(Error::BufferTooSmall(_))));

        // The rejected request did not consume a slot and the queued ones survive.
        assert_eq!(cache.active_obstacle_count(), MAX_REQUESTS);
        assert_eq!(cache.pending_request_count(), MAX_REQUESTS);
        for r in &refs {
            assert!(cache.get_obstacle_by_ref(*r).is_some());
        }

        let mut navmesh = TiledNavMesh::new(1);
        assert!(cache.update(&mut navmesh).unwrap());
        assert_eq!(cache.pending_request_count(), 0);
        assert!(refs
            .iter()
            .all(|r| cache.get_obstacle_by_ref(*r).map(|o| o.state) == Some(ObstacleState::Processed)));
    }

    #[test]
    fn test_obstacle_slots_exhausted() {
        let mut cache = TileCache::new(test_params().with_capacity(16, 2)).unwrap();
        cache.add_obstacle(Vec3::ZERO, 0.5, 1.0).unwrap();
        cache.add_obstacle(Vec3::ZERO, 0.5, 1.0).unwrap();
        assert!(matches!(cache.add_obstacle(Vec3::ZERO, 0.5, 1.0), Err(Error::OutOfMemory(_))));
    }

    #[test]
    fn test_removed_tile_drains_pending() {
        let params = test_params();
        let mut cache = TileCache::new(params.clone()).unwrap();
        let mut navmesh = TiledNavMesh::new(16);
        let r = cache.add_tile(flat_layer_data(&params, 0, 0), TileOwnership::Owned).unwrap();

        let ob = cache
            .add_box_obstacle(Vec3::new(2.0, -1.0, 2.0), Vec3::new(4.0, 1.0, 4.0))
            .unwrap();
        cache.process_requests();
        assert_eq!(cache.pending_update_count(), 1);

        cache.remove_tile(r).unwrap();
        assert!(cache.update(&mut navmesh).unwrap());
        assert_eq!(cache.get_obstacle_by_ref(ob).map(|o| o.state), Some(ObstacleState::Processed));
        assert_eq!(navmesh.tile_count(), 0);
    }

    #[test]
    fn test_mesh_process_hook() {
        let params = test_params();
        let mut cache = TileCache::new(params.clone()).unwrap();
        cache.set_mesh_process(Box::new(crate::AreaFlagsProcess::new(0x07)));
        let mut navmesh = TiledNavMesh::new(16);

        cache.add_tile(flat_layer_data(&params, 0, 0), TileOwnership::Owned).unwrap();
        cache.build_nav_mesh_tiles_at(0, 0, &mut navmesh).unwrap();
        assert_eq!(navmesh.get_tile_at(0, 0, 0).map(|t| t.flags.clone()), Some(vec![0x07]));
    }

    /// Navmesh that refuses every tile handed to it while `reject` is set
    struct RejectingNavMesh {
        inner: TiledNavMesh,
        reject: bool,
    }

    impl TileMeshTarget for RejectingNavMesh {
        fn add_tile(&mut self, data: NavMeshTileData, ownership: TileOwnership) -> Result<()> {
            if self.reject {
                return Err(Error::InvalidMesh("tile rejected".into()));
            }
            self.inner.add_tile(data, ownership)
        }

        fn remove_tile(&mut self, x: i32, y: i32, layer: i32) -> Result<Option<NavMeshTileData>> {
            self.inner.remove_tile(x, y, layer)
        }

        fn replace_tile(&mut self, data: NavMeshTileData, ownership: TileOwnership) -> Result<Option<NavMeshTileData>> {
            if self.reject {
                return Err(Error::InvalidMesh("tile rejected".into()));
            }
            self.inner.replace_tile(data, ownership)
        }
    }

    #[test]
    fn test_rejected_tile_keeps_previous_mesh() {
        let params = test_params();
        let mut cache = TileCache::new(params.clone()).unwrap();
        let mut navmesh = RejectingNavMesh {
            inner: TiledNavMesh::new(16),
            reject: false,
        };
        cache.add_tile(flat_layer_data(&params, 0, 0), TileOwnership::Owned).unwrap();
        cache.build_nav_mesh_tiles_at(0, 0, &mut navmesh).unwrap();
        assert_eq!(navmesh.inner.get_tile_at(0, 0, 0).map(|t| t.poly_count()), Some(1));

        navmesh.reject = true;
        let ob = cache
            .add_box_obstacle(Vec3::new(2.0, -1.0, 2.0), Vec3::new(4.0, 1.0, 4.0))
            .unwrap();
        assert!(matches!(cache.update(&mut navmesh), Err(Error::InvalidMesh(_))));

        // The uncarved tile is still published and the obstacle moved on.
        assert_eq!(navmesh.inner.get_tile_at(0, 0, 0).map(|t| t.poly_count()), Some(1));
        assert_eq!(cache.get_obstacle_by_ref(ob).map(|o| o.state), Some(ObstacleState::Processed));
        assert_eq!(cache.pending_update_count(), 0);
    }

    #[test]
    fn test_rebuild_hands_back_external_tile() {
        let params = test_params();
        let mut cache = TileCache::new(params.clone()).unwrap();
        let r = cache.add_tile(flat_layer_data(&params, 0, 0), TileOwnership::Owned).unwrap();

        let mut scratch = TiledNavMesh::new(16);
        cache.build_nav_mesh_tile(r, &mut scratch).unwrap();
        let external = scratch.get_tile_at(0, 0, 0).cloned().unwrap();

        let mut navmesh = TiledNavMesh::new(16);
        navmesh.add_tile(external.clone(), TileOwnership::External).unwrap();
        assert_eq!(cache.build_nav_mesh_tile(r, &mut navmesh).unwrap(), Some(external));
        assert_eq!(navmesh.tile_count(), 1);

        // The rebuilt tile is owned by the navmesh now.
        assert_eq!(cache.build_nav_mesh_tile(r, &mut navmesh).unwrap(), None);
    }

    #[test]
    fn test_build_stale_tile_ref() {
        let mut cache = TileCache::new(test_params()).unwrap();
        let mut navmesh = TiledNavMesh::new(16);
        assert!(matches!(
            cache.build_nav_mesh_tile(CompressedTileRef::NULL, &mut navmesh),
            Err(Error::NotFound)
        ));
    }
}
