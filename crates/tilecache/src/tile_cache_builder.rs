//! Tile cache builder for real-time mesh rebuilding
//!
//! Every rebuild owns a [`TileRebuild`]: the decoded layer of one compressed
//! tile, into which obstacles are carved before the layer runs through the
//! region, contour and polygon mesh stages.

use std::collections::HashMap;

use glam::Vec3;
use tilecache_builder::{LayerMeshBuilder, TileLayer, NULL_AREA};
use tilecache_common::Result;

use super::nav_mesh::NavMeshTileData;
use super::obstacle::ObstacleShape;
use super::params::TileCacheParams;
use super::tile_cache_data::{decompress_tile_cache_layer, TileCompressor};

/// Post-process hook applied to each rebuilt tile before it is published.
///
/// Implementations typically assign per-polygon flags from area ids.
pub trait TileMeshProcess {
    fn process(&mut self, tile: &mut NavMeshTileData);
}

impl<F> TileMeshProcess for F
where
    F: FnMut(&mut NavMeshTileData),
{
    fn process(&mut self, tile: &mut NavMeshTileData) {
        self(tile)
    }
}

/// Assigns polygon flags from a per-area table
#[derive(Debug, Clone, Default)]
pub struct AreaFlagsProcess {
    default_flags: u16,
    area_flags: HashMap<u8, u16>,
}

impl AreaFlagsProcess {
    /// Polygons of areas without an explicit entry get `default_flags`
    pub fn new(default_flags: u16) -> Self {
        Self {
            default_flags,
            area_flags: HashMap::new(),
        }
    }

    pub fn with_area(mut self, area: u8, flags: u16) -> Self {
        self.area_flags.insert(area, flags);
        self
    }

    pub fn flags_for(&self, area: u8) -> u16 {
        self.area_flags.get(&area).copied().unwrap_or(self.default_flags)
    }
}

impl TileMeshProcess for AreaFlagsProcess {
    fn process(&mut self, tile: &mut NavMeshTileData) {
        for (flags, &area) in tile.flags.iter_mut().zip(&tile.areas) {
            *flags = self.flags_for(area);
        }
    }
}

/// Working state of a single tile rebuild
#[derive(Debug)]
pub struct TileRebuild<'a> {
    params: &'a TileCacheParams,
    layer: TileLayer,
    carved_cells: usize,
}

impl<'a> TileRebuild<'a> {
    /// Decodes the compressed payload of a tile
    pub fn decompress(params: &'a TileCacheParams, comp: &dyn TileCompressor, data: &[u8]) -> Result<Self> {
        Ok(Self::from_layer(params, decompress_tile_cache_layer(comp, data)?))
    }

    pub fn from_layer(params: &'a TileCacheParams, layer: TileLayer) -> Self {
        Self {
            params,
            layer,
            carved_cells: 0,
        }
    }

    pub fn layer(&self) -> &TileLayer {
        &self.layer
    }

    /// Number of cells marked unwalkable by carved obstacles so far
    pub fn carved_cells(&self) -> usize {
        self.carved_cells
    }

    /// Marks the cells covered by `shape` as unwalkable
    pub fn carve(&mut self, shape: &ObstacleShape) {
        let orig = Vec3::from(self.layer.header.bmin);
        self.carved_cells += shape.mark_area(&mut self.layer, orig, self.params.cs, self.params.ch, NULL_AREA);
    }

    /// Builds the navmesh tile of the layer.
    ///
    /// Returns `None` when nothing walkable is left, in which case the tile
    /// should be removed from the navmesh.
    pub fn build(mut self, process: Option<&mut dyn TileMeshProcess>) -> Result<Option<NavMeshTileData>> {
        let params = self.params;
        let builder = LayerMeshBuilder::new(
            params.walkable_climb_voxels(),
            params.max_simplification_error,
            params.max_verts_per_poly,
        );
        let mesh = builder.build(&mut self.layer)?;

        let header = &self.layer.header;
        log::debug!(
            "Rebuilt tile ({}, {}, {}): {} regions, {} polygons, {} vertices, {} carved cells",
            header.tx,
            header.ty,
            header.tlayer,
            self.layer.reg_count,
            mesh.npolys(),
            mesh.nverts(),
            self.carved_cells
        );

        if mesh.npolys() == 0 {
            return Ok(None);
        }

        let mut tile = NavMeshTileData::from_poly_mesh(
            header,
            mesh,
            params.walkable_height,
            params.walkable_radius,
            params.walkable_climb,
            params.cs,
            params.ch,
        )?;
        if let Some(process) = process {
            process.process(&mut tile);
        }
        Ok(Some(tile))
    }
}
