//! Synthetic scene used to produce tile layers
//!
//! The scene is a flat ground plane covering `tiles_x * tiles_y` tiles. A
//! shallow water strip runs along z, a wall with a doorway splits the world
//! along x, and an optional bridge crosses the middle rows high enough for the
//! ground below to stay walkable, which gives those tiles two layers.

use anyhow::{Context, Result};
use glam::Vec3;
use tilecache::{build_tile_cache_layer, TileCacheParams, TileCompressor};
use tilecache_builder::{build_heightfield_layers, CompactHeightfield, CompactHeightfieldDesc, WalkableSpan, WALKABLE_AREA};

/// Area id of the water strip
pub const WATER_AREA: u8 = 1;

/// Bridge deck height in voxels above the ground
const BRIDGE_HEIGHT: u16 = 24;

/// Cells outside the tile kept for portal detection
const BORDER_SIZE: i32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct Scene {
    pub tiles_x: i32,
    pub tiles_y: i32,
    pub bridge: bool,
}

impl Scene {
    /// Spans of the world column at global cell (gx, gz), bottom-up
    fn column(&self, params: &TileCacheParams, gx: i32, gz: i32) -> Vec<WalkableSpan> {
        let world_w = self.tiles_x * params.width;
        let world_h = self.tiles_y * params.height;
        if gx < 0 || gz < 0 || gx >= world_w || gz >= world_h {
            return Vec::new();
        }

        // Wall along the middle column with a doorway in the first tile row.
        let door = params.height / 3..params.height / 3 + 4;
        if gx == world_w / 2 && !door.contains(&gz) {
            return Vec::new();
        }

        let area = if (world_w / 4..world_w / 4 + 3).contains(&gx) {
            WATER_AREA
        } else {
            WALKABLE_AREA
        };
        let mut spans = vec![WalkableSpan::new(0, area)];

        let rows = world_h / 2 - 2..world_h / 2 + 2;
        if self.bridge && rows.contains(&gz) {
            spans.push(WalkableSpan::new(BRIDGE_HEIGHT, WALKABLE_AREA));
        }
        spans
    }

    /// Compact heightfield of tile (tx, ty) including its border
    pub fn tile_heightfield(&self, params: &TileCacheParams, tx: i32, ty: i32) -> Result<CompactHeightfield> {
        let width = params.width + BORDER_SIZE * 2;
        let height = params.height + BORDER_SIZE * 2;
        let border = BORDER_SIZE as f32 * params.cs;

        let bmin = params.origin
            + Vec3::new(
                tx as f32 * params.tile_world_width() - border,
                0.0,
                ty as f32 * params.tile_world_height() - border,
            );
        let bmax = bmin
            + Vec3::new(
                width as f32 * params.cs,
                (BRIDGE_HEIGHT as f32 + 2.0) * params.ch + params.walkable_height,
                height as f32 * params.cs,
            );

        let desc = CompactHeightfieldDesc {
            width,
            height,
            border_size: BORDER_SIZE,
            walkable_height: (params.walkable_height / params.ch).ceil() as i32,
            walkable_climb: params.walkable_climb_voxels(),
            bmin,
            bmax,
            cs: params.cs,
            ch: params.ch,
        };

        let x0 = tx * params.width - BORDER_SIZE;
        let z0 = ty * params.height - BORDER_SIZE;
        let mut columns = Vec::with_capacity((width * height) as usize);
        for z in 0..height {
            for x in 0..width {
                columns.push(self.column(params, x0 + x, z0 + z));
            }
        }

        CompactHeightfield::from_columns(&desc, &columns)
            .with_context(|| format!("failed to build heightfield of tile ({}, {})", tx, ty))
    }

    /// Compressed payloads of every layer of tile (tx, ty)
    pub fn tile_payloads(
        &self,
        params: &TileCacheParams,
        comp: &dyn TileCompressor,
        tx: i32,
        ty: i32,
    ) -> Result<Vec<Vec<u8>>> {
        let chf = self.tile_heightfield(params, tx, ty)?;
        let set = build_heightfield_layers(&chf, chf.border_size, chf.walkable_height)
            .with_context(|| format!("failed to build layers of tile ({}, {})", tx, ty))?;

        set.layers
            .iter()
            .enumerate()
            .map(|(i, layer)| {
                build_tile_cache_layer(comp, layer, tx, ty, i as i32)
                    .with_context(|| format!("failed to compress layer {} of tile ({}, {})", i, tx, ty))
            })
            .collect()
    }

    /// World-space bounds of the walkable ground
    pub fn bounds(&self, params: &TileCacheParams) -> (Vec3, Vec3) {
        let bmin = params.origin;
        let bmax = bmin
            + Vec3::new(
                self.tiles_x as f32 * params.tile_world_width(),
                params.walkable_height,
                self.tiles_y as f32 * params.tile_world_height(),
            );
        (bmin, bmax)
    }
}
