//! Shared fixtures for runtime tests

use glam::Vec3;
use tilecache_builder::{build_heightfield_layers, CompactHeightfield, CompactHeightfieldDesc, WalkableSpan, WALKABLE_AREA};

use crate::params::TileCacheParams;
use crate::tile_cache_data::{build_tile_cache_layer, Lz4Compressor};

/// 8x8 cell tiles of 1x1 world units, 10 voxels of clearance and 2 voxels of climb
pub(crate) fn test_params() -> TileCacheParams {
    TileCacheParams::default()
        .with_cell_size(1.0, 0.5)
        .with_tile_size(8, 8)
        .with_agent(5.0, 0.0, 1.0)
        .with_capacity(16, 128)
}

/// Compressed payload of a flat walkable tile at (tx, ty), layer 0
pub(crate) fn flat_layer_data(params: &TileCacheParams, tx: i32, ty: i32) -> Vec<u8> {
    flat_layer_data_at(params, tx, ty, 0)
}

/// Compressed payload of a flat walkable tile stored as layer `tlayer`
pub(crate) fn flat_layer_data_at(params: &TileCacheParams, tx: i32, ty: i32, tlayer: i32) -> Vec<u8> {
    let bmin = params.origin
        + Vec3::new(
            tx as f32 * params.tile_world_width(),
            0.0,
            ty as f32 * params.tile_world_height(),
        );
    let desc = CompactHeightfieldDesc {
        width: params.width,
        height: params.height,
        border_size: 0,
        walkable_height: (params.walkable_height / params.ch) as i32,
        walkable_climb: params.walkable_climb_voxels(),
        bmin,
        bmax: bmin
            + Vec3::new(
                params.tile_world_width(),
                params.walkable_height,
                params.tile_world_height(),
            ),
        cs: params.cs,
        ch: params.ch,
    };
    let columns = vec![vec![WalkableSpan::new(0, WALKABLE_AREA)]; (params.width * params.height) as usize];
    let chf = CompactHeightfield::from_columns(&desc, &columns).unwrap();
    let set = build_heightfield_layers(&chf, 0, desc.walkable_height).unwrap();
    build_tile_cache_layer(&Lz4Compressor, &set.layers[0], tx, ty, tlayer).unwrap()
}
