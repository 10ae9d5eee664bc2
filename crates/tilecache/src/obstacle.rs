//! Temporary obstacles
//!
//! Obstacles are stored in a slot table inside the tile cache. Their state
//! only changes inside [`TileCache::update`](crate::TileCache::update):
//!
//! ```text
//! Empty -> Processing -> Processed -> Removing -> Empty
//! ```

use glam::Vec3;
use tilecache_builder::{mark_box_area, mark_cylinder_area, mark_oriented_box_area, oriented_box_rot_aux, TileLayer};

use super::refs::{CompressedTileRef, ObstacleRef};

/// Maximum number of tiles an obstacle can touch
pub const MAX_TOUCHED_TILES: usize = 8;

/// Shape of an obstacle
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ObstacleShape {
    /// Upright cylinder standing on `pos`
    Cylinder { pos: Vec3, radius: f32, height: f32 },
    /// Axis-aligned box
    Box { bmin: Vec3, bmax: Vec3 },
    /// Box rotated about the y axis
    OrientedBox {
        center: Vec3,
        half_extents: Vec3,
        /// `[cos(a/2) * sin(-a/2), cos(a/2)^2 - 0.5]` for a yaw of `a`
        rot_aux: [f32; 2],
    },
}

impl ObstacleShape {
    /// Creates an oriented box from its yaw in radians
    pub fn oriented_box(center: Vec3, half_extents: Vec3, y_radians: f32) -> Self {
        ObstacleShape::OrientedBox {
            center,
            half_extents,
            rot_aux: oriented_box_rot_aux(y_radians),
        }
    }

    /// World-space bounding box of the shape
    pub fn bounds(&self) -> (Vec3, Vec3) {
        match *self {
            ObstacleShape::Cylinder { pos, radius, height } => (
                Vec3::new(pos.x - radius, pos.y, pos.z - radius),
                Vec3::new(pos.x + radius, pos.y + height, pos.z + radius),
            ),
            ObstacleShape::Box { bmin, bmax } => (bmin, bmax),
            ObstacleShape::OrientedBox {
                center, half_extents, ..
            } => {
                // Radius of the bounding circle of the rotated footprint.
                let max_r = 1.41 * half_extents.x.max(half_extents.z);
                (
                    Vec3::new(center.x - max_r, center.y - half_extents.y, center.z - max_r),
                    Vec3::new(center.x + max_r, center.y + half_extents.y, center.z + max_r),
                )
            }
        }
    }

    /// Rasterizes the shape into `layer`, writing `area_id` into covered cells.
    ///
    /// Returns the number of cells marked.
    pub fn mark_area(&self, layer: &mut TileLayer, orig: Vec3, cs: f32, ch: f32, area_id: u8) -> usize {
        match *self {
            ObstacleShape::Cylinder { pos, radius, height } => {
                mark_cylinder_area(layer, orig, cs, ch, pos, radius, height, area_id)
            }
            ObstacleShape::Box { bmin, bmax } => mark_box_area(layer, orig, cs, ch, bmin, bmax, area_id),
            ObstacleShape::OrientedBox {
                center,
                half_extents,
                rot_aux,
            } => mark_oriented_box_area(layer, orig, cs, ch, center, half_extents, rot_aux, area_id),
        }
    }
}

/// Lifecycle state of an obstacle slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ObstacleState {
    /// Slot is free
    #[default]
    Empty,
    /// Waiting for the touched tiles to rebuild with the obstacle
    Processing,
    /// Carved into every touched tile
    Processed,
    /// Waiting for the touched tiles to rebuild without the obstacle
    Removing,
}

/// Obstacle slot
#[derive(Debug, Clone)]
pub struct Obstacle {
    pub shape: ObstacleShape,
    pub state: ObstacleState,
    pub salt: u32,
    /// Tiles overlapped by the obstacle bounds, captured when the add request is admitted
    pub touched: Vec<CompressedTileRef>,
    /// Tiles that still need a rebuild before the state can advance
    pub pending: Vec<CompressedTileRef>,
    /// Next slot in the free list
    pub(crate) next: Option<usize>,
}

impl Obstacle {
    pub(crate) fn empty(next: Option<usize>) -> Self {
        Self {
            shape: ObstacleShape::Box {
                bmin: Vec3::ZERO,
                bmax: Vec3::ZERO,
            },
            state: ObstacleState::Empty,
            salt: 1,
            touched: Vec::with_capacity(MAX_TOUCHED_TILES),
            pending: Vec::with_capacity(MAX_TOUCHED_TILES),
            next,
        }
    }

    /// True while the obstacle should be carved into rebuilt tiles
    pub fn is_carving(&self) -> bool {
        matches!(self.state, ObstacleState::Processing | ObstacleState::Processed)
    }
}

/// Action carried by an [`ObstacleRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObstacleAction {
    Add,
    Remove,
}

/// Queued obstacle change, admitted on the next update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObstacleRequest {
    pub action: ObstacleAction,
    pub obstacle: ObstacleRef,
}
