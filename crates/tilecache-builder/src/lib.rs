//! Tile layer construction and polygon mesh generation for the tile cache
//!
//! A compact heightfield is split into heightfield layers, each of which is
//! stored as a tile layer. Rebuilding a navmesh tile runs a layer through
//! region partitioning, contour tracing and polygon mesh generation after
//! obstacles have been marked into it.

mod area;
mod compact_heightfield;
mod contour;
mod heightfield_layers;
mod polymesh;
mod regions;
mod tile_layer;

pub use area::{mark_box_area, mark_cylinder_area, mark_oriented_box_area, oriented_box_rot_aux};
pub use compact_heightfield::{
    CompactCell, CompactHeightfield, CompactHeightfieldDesc, CompactSpan, WalkableSpan, NOT_CONNECTED,
};
pub use contour::{
    build_tile_cache_contours, simplify_contour, ContourVertex, TileCacheContour, TileCacheContourSet,
    CONTOUR_NO_PORTAL, CONTOUR_REMOVE_VERTEX,
};
pub use heightfield_layers::{build_heightfield_layers, HeightfieldLayer, HeightfieldLayerSet};
pub use polymesh::{build_tile_cache_poly_mesh, can_remove_vertex, count_poly_verts, TileCachePolyMesh, EXT_LINK};
pub use regions::build_tile_cache_regions;
pub use tile_layer::{TileLayer, TileLayerHeader, TILECACHE_MAGIC, TILECACHE_VERSION, TILE_LAYER_HEADER_SIZE};

use tilecache_common::{Error, Result};

/// Area id of cells that cannot be walked on
pub const NULL_AREA: u8 = 0;

/// Default area id of walkable cells
pub const WALKABLE_AREA: u8 = 63;

/// Null index for polygon vertices and neighbours
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Maximum number of vertices per polygon supported by the mesh builder
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Runs the per-layer mesh pipeline: regions, contours and polygon mesh
#[derive(Debug, Clone, Copy)]
pub struct LayerMeshBuilder {
    /// Maximum step between neighbouring cells in voxels
    pub walkable_climb: i32,
    /// Maximum distance a simplified contour may deviate from the raw outline, in cells
    pub max_simplification_error: f32,
    /// Maximum vertices per polygon
    pub max_verts_per_poly: usize,
}

impl LayerMeshBuilder {
    pub fn new(walkable_climb: i32, max_simplification_error: f32, max_verts_per_poly: usize) -> Self {
        Self {
            walkable_climb,
            max_simplification_error,
            max_verts_per_poly,
        }
    }

    /// Builds the polygon mesh of a decoded layer.
    ///
    /// The layer's region grid is overwritten.
    pub fn build(&self, layer: &mut TileLayer) -> Result<TileCachePolyMesh> {
        if self.max_simplification_error < 0.0 {
            return Err(Error::InvalidParam(format!(
                "max simplification error must not be negative, got {}",
                self.max_simplification_error
            )));
        }

        build_tile_cache_regions(layer, self.walkable_climb)?;
        let lcset = build_tile_cache_contours(layer, self.walkable_climb, self.max_simplification_error)?;
        build_tile_cache_poly_mesh(&lcset, self.max_verts_per_poly)
    }
}

/// Splits a compact heightfield into the tile layers stored at tile (tx, ty).
///
/// Layer indices follow the order produced by [`build_heightfield_layers`].
pub fn build_tile_layers(chf: &CompactHeightfield, tx: i32, ty: i32) -> Result<Vec<TileLayer>> {
    let set = build_heightfield_layers(chf, chf.border_size, chf.walkable_height)?;
    set.layers
        .iter()
        .enumerate()
        .map(|(i, layer)| TileLayer::from_heightfield_layer(layer, tx, ty, i as i32))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::compact_heightfield::tests::flat_desc;

    #[test]
    fn test_flat_tile_pipeline() {
        // 2x2 walkable patch in the middle of a 4x4 tile.
        let desc = flat_desc(4, 4);
        let columns: Vec<_> = (0..16)
            .map(|i| {
                let (x, z) = (i % 4, i / 4);
                if (1..3).contains(&x) && (1..3).contains(&z) {
                    vec![WalkableSpan::new(0, WALKABLE_AREA)]
                } else {
                    Vec::new()
                }
            })
            .collect();
        let chf = CompactHeightfield::from_columns(&desc, &columns).unwrap();

        let mut layers = build_tile_layers(&chf, 5, 7).unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!((layers[0].header.tx, layers[0].header.ty, layers[0].header.tlayer), (5, 7, 0));

        let mesh = LayerMeshBuilder::new(2, 1.3, 6).build(&mut layers[0]).unwrap();
        assert_eq!(mesh.npolys(), 1);
        assert_eq!(mesh.nverts(), 4);
        assert_eq!(layers[0].reg_count, 1);
    }

    #[test]
    fn test_blocked_layer_yields_no_polygons() {
        let desc = flat_desc(3, 3);
        let columns = vec![vec![WalkableSpan::new(0, WALKABLE_AREA)]; 9];
        let chf = CompactHeightfield::from_columns(&desc, &columns).unwrap();
        let mut layer = build_tile_layers(&chf, 0, 0).unwrap().remove(0);

        let bmin = glam::Vec3::from(layer.header.bmin);
        mark_box_area(
            &mut layer,
            bmin,
            desc.cs,
            desc.ch,
            bmin - glam::Vec3::ONE,
            bmin + glam::Vec3::new(3.0, 1.0, 3.0),
            NULL_AREA,
        );

        let mesh = LayerMeshBuilder::new(2, 1.3, 6).build(&mut layer).unwrap();
        assert_eq!(mesh.npolys(), 0);
        assert_eq!(layer.reg_count, 0);
    }

    /// Checks that every edge is shared by at most two polygons, that polygon
    /// links are mutual and that no edge collapses to a point.
    fn assert_mesh_consistent(mesh: &TileCachePolyMesh) {
        let nvp = mesh.nvp;
        let mut edge_use: HashMap<(u16, u16), usize> = HashMap::new();

        for i in 0..mesh.npolys() {
            let p = mesh.poly(i);
            let verts = mesh.poly_verts(i);
            let nv = verts.len();
            assert!(nv >= 3, "polygon {} has {} vertices", i, nv);

            for j in 0..nv {
                let (va, vb) = (verts[j], verts[(j + 1) % nv]);
                assert!((va as usize) < mesh.nverts() && (vb as usize) < mesh.nverts());
                let (a, b) = (mesh.vert(va as usize), mesh.vert(vb as usize));
                assert!(va != vb && (a[0], a[2]) != (b[0], b[2]), "degenerate edge in polygon {}", i);

                *edge_use.entry((va.min(vb), va.max(vb))).or_default() += 1;

                let nei = p[nvp + j];
                if nei & EXT_LINK != 0 {
                    continue;
                }
                let q = nei as usize;
                assert!(q < mesh.npolys(), "polygon {} links to missing polygon {}", i, q);
                let qv = mesh.poly_verts(q);
                let back = (0..qv.len()).find(|&k| qv[k] == vb && qv[(k + 1) % qv.len()] == va);
                let back = back.unwrap_or_else(|| panic!("polygon {} does not share edge {}-{}", q, vb, va));
                assert_eq!(mesh.poly(q)[nvp + back] as usize, i, "link {} -> {} is one-way", i, q);
            }
        }

        assert!(edge_use.values().all(|&n| n <= 2), "edge used by more than two polygons");
    }

    #[test]
    fn test_carved_meshes_stay_consistent() {
        // 12x12 tile with a 2 cell border, flat or rising one voxel every other column.
        let mut desc = flat_desc(16, 16);
        desc.border_size = 2;
        let cylinders: [&[(f32, f32, f32)]; 4] = [
            &[],
            &[(6.0, 6.0, 1.5)],
            &[(2.0, 3.0, 1.0), (9.5, 8.0, 2.0)],
            &[(0.0, 6.0, 1.5), (6.0, 12.0, 1.0), (4.0, 4.0, 0.8), (8.5, 3.5, 1.2)],
        ];

        for slope in [false, true] {
            let columns: Vec<_> = (0..16 * 16)
                .map(|i| {
                    let y = if slope { (i % 16) as u16 / 2 } else { 0 };
                    vec![WalkableSpan::new(y, WALKABLE_AREA)]
                })
                .collect();
            let chf = CompactHeightfield::from_columns(&desc, &columns).unwrap();

            for obstacles in cylinders {
                let mut layer = build_tile_layers(&chf, 0, 0).unwrap().remove(0);
                let bmin = glam::Vec3::from(layer.header.bmin);
                for &(x, z, r) in obstacles {
                    let pos = bmin + glam::Vec3::new(x, 0.0, z);
                    mark_cylinder_area(&mut layer, bmin, desc.cs, desc.ch, pos, r, 10.0, NULL_AREA);
                }

                let mesh = LayerMeshBuilder::new(2, 1.3, 6).build(&mut layer).unwrap();
                assert!(mesh.npolys() > 0);
                assert_mesh_consistent(&mesh);
            }
        }
    }

    #[test]
    fn test_negative_error_rejected() {
        let desc = flat_desc(2, 2);
        let columns = vec![vec![WalkableSpan::new(0, WALKABLE_AREA)]; 4];
        let chf = CompactHeightfield::from_columns(&desc, &columns).unwrap();
        let mut layer = build_tile_layers(&chf, 0, 0).unwrap().remove(0);
        assert!(LayerMeshBuilder::new(2, -1.0, 6).build(&mut layer).is_err());
    }
}
