//! Tile layer header and decoded layer grid
//!
//! A tile layer is the unit stored by the tile cache: a fixed-size header that
//! locates the layer in the world followed by its height, area and connection
//! grids. The region grid is scratch space filled in during a rebuild.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tilecache_common::{Error, Result};

use super::heightfield_layers::HeightfieldLayer;

/// Magic number for tile layer data ('DTLR')
pub const TILECACHE_MAGIC: u32 = u32::from_be_bytes(*b"DTLR");

/// Version number for tile layer data format
pub const TILECACHE_VERSION: u32 = 1;

/// Serialized size of [`TileLayerHeader`] in bytes
pub const TILE_LAYER_HEADER_SIZE: usize = 54;

/// Tile layer header
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileLayerHeader {
    /// Magic number for validation
    pub magic: u32,
    /// Version of the tile layer format
    pub version: u32,
    /// Tile position X
    pub tx: i32,
    /// Tile position Y
    pub ty: i32,
    /// Layer index at the tile position
    pub tlayer: i32,
    /// Bounding box minimum
    pub bmin: [f32; 3],
    /// Bounding box maximum
    pub bmax: [f32; 3],
    /// Height range of the layer in voxels
    pub hmin: u16,
    pub hmax: u16,
    /// Grid width in cells
    pub width: u8,
    /// Grid depth in cells
    pub height: u8,
    /// Usable sub-rectangle
    pub minx: u8,
    pub maxx: u8,
    pub miny: u8,
    pub maxy: u8,
}

impl Default for TileLayerHeader {
    fn default() -> Self {
        Self {
            magic: TILECACHE_MAGIC,
            version: TILECACHE_VERSION,
            tx: 0,
            ty: 0,
            tlayer: 0,
            bmin: [0.0; 3],
            bmax: [0.0; 3],
            hmin: 0,
            hmax: 0,
            width: 0,
            height: 0,
            minx: 0,
            maxx: 0,
            miny: 0,
            maxy: 0,
        }
    }
}

impl TileLayerHeader {
    /// Creates the header for a heightfield layer placed at tile (tx, ty, tlayer)
    pub fn from_heightfield_layer(layer: &HeightfieldLayer, tx: i32, ty: i32, tlayer: i32) -> Result<Self> {
        let fits_u8 = |v: i32| (0..=u8::MAX as i32).contains(&v);
        if !fits_u8(layer.width) || !fits_u8(layer.height) {
            return Err(Error::InvalidParam(format!(
                "layer grid {}x{} exceeds 255x255 cells",
                layer.width, layer.height
            )));
        }
        if !(0..=u16::MAX as i32).contains(&layer.hmin) || !(0..=u16::MAX as i32).contains(&layer.hmax) {
            return Err(Error::InvalidParam(format!(
                "layer height range {}..{} out of bounds",
                layer.hmin, layer.hmax
            )));
        }

        Ok(Self {
            tx,
            ty,
            tlayer,
            bmin: layer.bmin.to_array(),
            bmax: layer.bmax.to_array(),
            hmin: layer.hmin as u16,
            hmax: layer.hmax as u16,
            width: layer.width as u8,
            height: layer.height as u8,
            minx: layer.minx as u8,
            maxx: layer.maxx as u8,
            miny: layer.miny as u8,
            maxy: layer.maxy as u8,
            ..Self::default()
        })
    }

    /// Checks magic and version, the two fields that identify the format
    pub fn validate(&self) -> Result<()> {
        if self.magic != TILECACHE_MAGIC {
            return Err(Error::WrongMagic {
                expected: TILECACHE_MAGIC,
                found: self.magic,
            });
        }
        if self.version != TILECACHE_VERSION {
            return Err(Error::WrongVersion {
                expected: TILECACHE_VERSION,
                found: self.version,
            });
        }
        Ok(())
    }

    /// Number of cells in the layer grid
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Writes the header in little-endian order
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_i32::<LittleEndian>(self.tx)?;
        writer.write_i32::<LittleEndian>(self.ty)?;
        writer.write_i32::<LittleEndian>(self.tlayer)?;
        for v in self.bmin.iter().chain(self.bmax.iter()) {
            writer.write_f32::<LittleEndian>(*v)?;
        }
        writer.write_u16::<LittleEndian>(self.hmin)?;
        writer.write_u16::<LittleEndian>(self.hmax)?;
        writer.write_all(&[
            self.width,
            self.height,
            self.minx,
            self.maxx,
            self.miny,
            self.maxy,
        ])?;
        Ok(())
    }

    /// Reads a header without validating it
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        let version = reader.read_u32::<LittleEndian>()?;
        let tx = reader.read_i32::<LittleEndian>()?;
        let ty = reader.read_i32::<LittleEndian>()?;
        let tlayer = reader.read_i32::<LittleEndian>()?;
        let mut bmin = [0.0f32; 3];
        for v in &mut bmin {
            *v = reader.read_f32::<LittleEndian>()?;
        }
        let mut bmax = [0.0f32; 3];
        for v in &mut bmax {
            *v = reader.read_f32::<LittleEndian>()?;
        }
        let hmin = reader.read_u16::<LittleEndian>()?;
        let hmax = reader.read_u16::<LittleEndian>()?;
        let mut dims = [0u8; 6];
        reader.read_exact(&mut dims)?;

        Ok(Self {
            magic,
            version,
            tx,
            ty,
            tlayer,
            bmin,
            bmax,
            hmin,
            hmax,
            width: dims[0],
            height: dims[1],
            minx: dims[2],
            maxx: dims[3],
            miny: dims[4],
            maxy: dims[5],
        })
    }

    /// Parses and validates the header at the start of `data`
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < TILE_LAYER_HEADER_SIZE {
            return Err(Error::BufferTooSmall(format!(
                "tile data holds {} bytes, header needs {}",
                data.len(),
                TILE_LAYER_HEADER_SIZE
            )));
        }
        let header = Self::read_from(&mut &data[..TILE_LAYER_HEADER_SIZE])?;
        header.validate()?;
        Ok(header)
    }
}

/// Decoded tile layer used as the working state of a rebuild
#[derive(Debug, Clone)]
pub struct TileLayer {
    pub header: TileLayerHeader,
    /// Number of regions after partitioning
    pub reg_count: u8,
    pub heights: Vec<u8>,
    pub areas: Vec<u8>,
    pub cons: Vec<u8>,
    /// Region id per cell, 0xff for cells without a region
    pub regs: Vec<u8>,
}

impl TileLayer {
    /// Creates a layer from its grids; every grid must match the header size
    pub fn new(header: TileLayerHeader, heights: Vec<u8>, areas: Vec<u8>, cons: Vec<u8>) -> Result<Self> {
        let n = header.cell_count();
        if heights.len() != n || areas.len() != n || cons.len() != n {
            return Err(Error::InvalidParam(format!(
                "layer grids must hold {} cells (heights {}, areas {}, cons {})",
                n,
                heights.len(),
                areas.len(),
                cons.len()
            )));
        }
        Ok(Self {
            header,
            reg_count: 0,
            heights,
            areas,
            cons,
            regs: vec![0xff; n],
        })
    }

    /// Creates a layer for a heightfield layer produced by the layer builder
    pub fn from_heightfield_layer(layer: &HeightfieldLayer, tx: i32, ty: i32, tlayer: i32) -> Result<Self> {
        let header = TileLayerHeader::from_heightfield_layer(layer, tx, ty, tlayer)?;
        Self::new(
            header,
            layer.heights.clone(),
            layer.areas.clone(),
            layer.cons.clone(),
        )
    }

    #[inline]
    pub fn width(&self) -> i32 {
        self.header.width as i32
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.header.height as i32
    }
}
