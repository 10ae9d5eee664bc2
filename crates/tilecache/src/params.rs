//! Tile cache configuration

use glam::Vec3;
use tilecache_builder::MAX_VERTS_PER_POLY;
use tilecache_common::{Error, Result};

use super::refs::RefCodec;

/// Behaviour of [`TileCache::add_tile`](crate::TileCache::add_tile) when a tile
/// already occupies the (x, y, layer) location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum OccupiedPolicy {
    /// Reject the new tile with [`Error::AlreadyOccupied`]
    #[default]
    Fail,
    /// Keep the existing tile and drop the new data
    Ignore,
}

impl OccupiedPolicy {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            OccupiedPolicy::Fail => 0,
            OccupiedPolicy::Ignore => 1,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(OccupiedPolicy::Fail),
            1 => Ok(OccupiedPolicy::Ignore),
            _ => Err(Error::InvalidParam(format!("unknown occupied policy {}", v))),
        }
    }
}

/// Tile cache parameters
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct TileCacheParams {
    /// World-space origin of tile (0, 0)
    pub origin: Vec3,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,
    /// Tile width in cells
    pub width: i32,
    /// Tile depth in cells
    pub height: i32,
    /// Minimum floor to ceiling height in world units
    pub walkable_height: f32,
    /// Agent radius in world units
    pub walkable_radius: f32,
    /// Maximum ledge height that is still traversable, in world units
    pub walkable_climb: f32,
    /// Maximum distance a simplified contour may deviate from the raw outline, in cells
    pub max_simplification_error: f32,
    /// Capacity of the compressed tile table
    pub max_tiles: u32,
    /// Capacity of the obstacle table
    pub max_obstacles: u32,
    /// Maximum vertices per polygon of rebuilt meshes
    pub max_verts_per_poly: usize,
    pub occupied_policy: OccupiedPolicy,
}

impl Default for TileCacheParams {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            cs: 0.3,
            ch: 0.2,
            width: 48,
            height: 48,
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
            max_simplification_error: 1.3,
            max_tiles: 128,
            max_obstacles: 128,
            max_verts_per_poly: MAX_VERTS_PER_POLY,
            occupied_policy: OccupiedPolicy::Fail,
        }
    }
}

impl TileCacheParams {
    pub fn with_origin(mut self, origin: Vec3) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_cell_size(mut self, cs: f32, ch: f32) -> Self {
        self.cs = cs;
        self.ch = ch;
        self
    }

    pub fn with_tile_size(mut self, width: i32, height: i32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_agent(mut self, walkable_height: f32, walkable_radius: f32, walkable_climb: f32) -> Self {
        self.walkable_height = walkable_height;
        self.walkable_radius = walkable_radius;
        self.walkable_climb = walkable_climb;
        self
    }

    pub fn with_max_simplification_error(mut self, max_error: f32) -> Self {
        self.max_simplification_error = max_error;
        self
    }

    pub fn with_capacity(mut self, max_tiles: u32, max_obstacles: u32) -> Self {
        self.max_tiles = max_tiles;
        self.max_obstacles = max_obstacles;
        self
    }

    pub fn with_max_verts_per_poly(mut self, nvp: usize) -> Self {
        self.max_verts_per_poly = nvp;
        self
    }

    pub fn with_occupied_policy(mut self, policy: OccupiedPolicy) -> Self {
        self.occupied_policy = policy;
        self
    }

    /// World-space width of a tile
    pub fn tile_world_width(&self) -> f32 {
        self.width as f32 * self.cs
    }

    /// World-space depth of a tile
    pub fn tile_world_height(&self) -> f32 {
        self.height as f32 * self.cs
    }

    /// Maximum climb converted to voxels, truncated
    pub fn walkable_climb_voxels(&self) -> i32 {
        (self.walkable_climb / self.ch) as i32
    }

    /// Checks the parameters for consistency
    pub fn validate(&self) -> Result<()> {
        if !(self.cs > 0.0) || !(self.ch > 0.0) {
            return Err(Error::InvalidParam(format!(
                "cell size must be positive (cs {}, ch {})",
                self.cs, self.ch
            )));
        }
        // Layer headers store tile dimensions in a byte.
        if !(1..=255).contains(&self.width) || !(1..=255).contains(&self.height) {
            return Err(Error::InvalidParam(format!(
                "tile size {}x{} must be within 1..=255 cells",
                self.width, self.height
            )));
        }
        if self.walkable_height < 0.0 || self.walkable_radius < 0.0 || self.walkable_climb < 0.0 {
            return Err(Error::InvalidParam(
                "walkable height, radius and climb must not be negative".into(),
            ));
        }
        if self.max_simplification_error < 0.0 {
            return Err(Error::InvalidParam(format!(
                "max simplification error must not be negative, got {}",
                self.max_simplification_error
            )));
        }
        if !(3..=MAX_VERTS_PER_POLY).contains(&self.max_verts_per_poly) {
            return Err(Error::InvalidParam(format!(
                "max verts per poly must be within 3..={}, got {}",
                MAX_VERTS_PER_POLY, self.max_verts_per_poly
            )));
        }
        RefCodec::new(self.max_tiles)?;
        RefCodec::new(self.max_obstacles)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        TileCacheParams::default().validate().unwrap();
    }

    #[test]
    fn test_builder_methods() {
        let params = TileCacheParams::default()
            .with_origin(Vec3::new(1.0, 2.0, 3.0))
            .with_cell_size(0.5, 0.25)
            .with_tile_size(32, 16)
            .with_agent(2.0, 0.5, 0.75)
            .with_capacity(64, 32)
            .with_max_verts_per_poly(3)
            .with_occupied_policy(OccupiedPolicy::Ignore);

        assert_eq!(params.tile_world_width(), 16.0);
        assert_eq!(params.tile_world_height(), 8.0);
        assert_eq!(params.walkable_climb_voxels(), 3);
        assert_eq!(params.occupied_policy, OccupiedPolicy::Ignore);
        params.validate().unwrap();
    }

    #[test]
    fn test_invalid_params() {
        let base = TileCacheParams::default();
        assert!(base.clone().with_cell_size(0.0, 0.2).validate().is_err());
        assert!(base.clone().with_tile_size(0, 48).validate().is_err());
        assert!(base.clone().with_tile_size(256, 48).validate().is_err());
        assert!(base.clone().with_max_verts_per_poly(7).validate().is_err());
        assert!(base.clone().with_max_verts_per_poly(2).validate().is_err());
        assert!(base.clone().with_capacity(0, 16).validate().is_err());
        assert!(base.clone().with_capacity(16, 1 << 23).validate().is_err());
        assert!(base.with_max_simplification_error(-0.5).validate().is_err());
    }

    #[test]
    fn test_occupied_policy_codes() {
        for policy in [OccupiedPolicy::Fail, OccupiedPolicy::Ignore] {
            assert_eq!(OccupiedPolicy::from_u8(policy.to_u8()).unwrap(), policy);
        }
        assert!(OccupiedPolicy::from_u8(9).is_err());
    }
}
