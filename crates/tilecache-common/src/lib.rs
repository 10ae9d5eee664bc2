//! Shared error types and integer grid geometry used by the tile cache crates

mod geometry;
mod math;

pub use geometry::*;
pub use math::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
///
/// Variants are grouped by how a caller is expected to react: capacity failures
/// can be retried once work has drained, configuration and input errors cannot,
/// invariant violations abort the current tile build only, and `NotFound` is the
/// answer for stale or out-of-range references.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("buffer too small: {0}")]
    BufferTooSmall(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("region id overflow (more than 255 regions)")]
    RegionOverflow,

    #[error("layer overflow (too many overlapping walkable platforms)")]
    LayerOverflow,

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("wrong magic number: expected {expected:#010x}, found {found:#010x}")]
    WrongMagic { expected: u32, found: u32 },

    #[error("wrong version: expected {expected}, found {found}")]
    WrongVersion { expected: u32, found: u32 },

    #[error("tile location ({x}, {y}, {layer}) is already occupied")]
    AlreadyOccupied { x: i32, y: i32, layer: i32 },

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("invalid polygon mesh: {0}")]
    InvalidMesh(String),

    #[error("reference not found")]
    NotFound,

    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for failures caused by a bounded buffer or slot table
    /// running out of room.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            Error::BufferTooSmall(_)
                | Error::OutOfMemory(_)
                | Error::RegionOverflow
                | Error::LayerOverflow
        )
    }
}

/// Result type for tile cache operations
pub type Result<T> = std::result::Result<T, Error>;
