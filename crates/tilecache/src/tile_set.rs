//! Tile set persistence
//!
//! A tile set stores the cache parameters followed by the payload of every
//! live tile, little-endian:
//!
//! ```text
//! magic "TSET" | version | params | tile count | (payload length | payload)*
//! ```
//!
//! Obstacles are runtime state and are not saved.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use tilecache_common::{Error, Result};

use super::nav_mesh::TileOwnership;
use super::params::{OccupiedPolicy, TileCacheParams};
use super::tile_cache::TileCache;
use super::tile_cache_data::TileCompressor;

pub const TILESET_MAGIC: u32 = u32::from_be_bytes(*b"TSET");
pub const TILESET_VERSION: u32 = 1;

fn write_params<W: Write>(writer: &mut W, params: &TileCacheParams) -> Result<()> {
    for v in params.origin.to_array() {
        writer.write_f32::<LittleEndian>(v)?;
    }
    writer.write_f32::<LittleEndian>(params.cs)?;
    writer.write_f32::<LittleEndian>(params.ch)?;
    writer.write_i32::<LittleEndian>(params.width)?;
    writer.write_i32::<LittleEndian>(params.height)?;
    writer.write_f32::<LittleEndian>(params.walkable_height)?;
    writer.write_f32::<LittleEndian>(params.walkable_radius)?;
    writer.write_f32::<LittleEndian>(params.walkable_climb)?;
    writer.write_f32::<LittleEndian>(params.max_simplification_error)?;
    writer.write_u32::<LittleEndian>(params.max_tiles)?;
    writer.write_u32::<LittleEndian>(params.max_obstacles)?;
    writer.write_u32::<LittleEndian>(params.max_verts_per_poly as u32)?;
    writer.write_u8(params.occupied_policy.to_u8())?;
    Ok(())
}

fn read_params<R: Read>(reader: &mut R) -> Result<TileCacheParams> {
    let mut origin = [0.0f32; 3];
    for v in &mut origin {
        *v = reader.read_f32::<LittleEndian>()?;
    }
    Ok(TileCacheParams {
        origin: Vec3::from(origin),
        cs: reader.read_f32::<LittleEndian>()?,
        ch: reader.read_f32::<LittleEndian>()?,
        width: reader.read_i32::<LittleEndian>()?,
        height: reader.read_i32::<LittleEndian>()?,
        walkable_height: reader.read_f32::<LittleEndian>()?,
        walkable_radius: reader.read_f32::<LittleEndian>()?,
        walkable_climb: reader.read_f32::<LittleEndian>()?,
        max_simplification_error: reader.read_f32::<LittleEndian>()?,
        max_tiles: reader.read_u32::<LittleEndian>()?,
        max_obstacles: reader.read_u32::<LittleEndian>()?,
        max_verts_per_poly: reader.read_u32::<LittleEndian>()? as usize,
        occupied_policy: OccupiedPolicy::from_u8(reader.read_u8()?)?,
    })
}

impl TileCache {
    /// Writes the parameters and every live tile payload
    pub fn save_tile_set<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(TILESET_MAGIC)?;
        writer.write_u32::<LittleEndian>(TILESET_VERSION)?;
        write_params(writer, self.params())?;

        let tiles: Vec<&[u8]> = (0..self.tile_capacity())
            .filter_map(|i| self.get_tile(i))
            .filter(|t| t.header().is_some())
            .map(|t| t.data())
            .collect();

        writer.write_u32::<LittleEndian>(tiles.len() as u32)?;
        for data in &tiles {
            writer.write_u32::<LittleEndian>(data.len() as u32)?;
            writer.write_all(data)?;
        }

        log::debug!("Saved tile set with {} tiles", tiles.len());
        Ok(())
    }

    /// Reads a tile set written by [`save_tile_set`](Self::save_tile_set) into a new cache
    pub fn load_tile_set<R: Read>(reader: &mut R, compressor: Box<dyn TileCompressor>) -> Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != TILESET_MAGIC {
            return Err(Error::WrongMagic {
                expected: TILESET_MAGIC,
                found: magic,
            });
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != TILESET_VERSION {
            return Err(Error::WrongVersion {
                expected: TILESET_VERSION,
                found: version,
            });
        }

        let params = read_params(reader)?;
        let mut cache = TileCache::with_compressor(params, compressor)?;

        let count = reader.read_u32::<LittleEndian>()?;
        for _ in 0..count {
            let len = reader.read_u32::<LittleEndian>()? as usize;
            let mut data = vec![0u8; len];
            reader.read_exact(&mut data)?;
            cache.add_tile(data, TileOwnership::Owned)?;
        }

        log::debug!("Loaded tile set with {} tiles", count);
        Ok(cache)
    }
}
