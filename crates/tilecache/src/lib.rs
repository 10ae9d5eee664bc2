//! Dynamic obstacle management and tile caching for navigation meshes
//!
//! This crate keeps compressed tile layers in memory and rebuilds navigation
//! mesh tiles incrementally when temporary obstacles are added or removed.
//!
//! # Features
//!
//! - **Tile Caching**: Compressed storage of tile layers in a salted slot table
//! - **Dynamic Obstacles**: Cylinder, box and oriented box obstacles
//! - **Incremental Updates**: At most one tile rebuild per [`TileCache::update`] call
//! - **Compression**: LZ4 compression through the [`TileCompressor`] seam
//! - **Persistence**: Tile sets saved and loaded as a single binary stream
//!
//! # Example
//!
//! ```rust,no_run
//! use glam::Vec3;
//! use tilecache::{TileCache, TileCacheParams, TiledNavMesh, TileOwnership};
//!
//! # fn run(payloads: Vec<Vec<u8>>) -> tilecache_common::Result<()> {
//! let params = TileCacheParams::default().with_tile_size(48, 48);
//! let mut cache = TileCache::new(params)?;
//! let mut navmesh = TiledNavMesh::new(128);
//!
//! for data in payloads {
//!     let r = cache.add_tile(data, TileOwnership::Owned)?;
//!     cache.build_nav_mesh_tile(r, &mut navmesh)?;
//! }
//!
//! let obstacle = cache.add_obstacle(Vec3::new(10.0, 0.0, 10.0), 1.0, 2.0)?;
//! while !cache.update(&mut navmesh)? {}
//!
//! cache.remove_obstacle(obstacle)?;
//! while !cache.update(&mut navmesh)? {}
//! # Ok(())
//! # }
//! ```

pub mod nav_mesh;
pub mod obstacle;
pub mod params;
pub mod refs;
pub mod tile_cache;
pub mod tile_cache_builder;
pub mod tile_cache_data;
pub mod tile_set;

#[cfg(test)]
mod test_helpers;

pub use nav_mesh::*;
pub use obstacle::*;
pub use params::*;
pub use refs::*;
pub use tile_cache::*;
pub use tile_cache_builder::*;
pub use tile_cache_data::*;
pub use tile_set::*;
