//! Compressed tile layer payloads
//!
//! A payload is the little-endian [`TileLayerHeader`] followed by the
//! compressed `heights | areas | cons` grids of the layer. Only the grid part
//! goes through the [`TileCompressor`], so headers can be inspected without
//! decompressing.

use tilecache_builder::{HeightfieldLayer, TileLayer, TileLayerHeader, TILE_LAYER_HEADER_SIZE};
use tilecache_common::{Error, Result};

/// Compression seam used for tile layer grids
pub trait TileCompressor {
    /// Upper bound of the compressed size of `buffer_size` input bytes
    fn max_compressed_size(&self, buffer_size: usize) -> usize;

    /// Compresses the input data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompresses the input data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 compressor implementation using lz4_flex
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl TileCompressor for Lz4Compressor {
    fn max_compressed_size(&self, buffer_size: usize) -> usize {
        // Uncompressed size is prepended as a u32.
        lz4_flex::block::get_maximum_output_size(buffer_size) + 4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data).map_err(|e| Error::Compression(e.to_string()))
    }
}

/// Stores a heightfield layer as a compressed tile payload at tile (tx, ty, tlayer)
pub fn build_tile_cache_layer(
    comp: &dyn TileCompressor,
    layer: &HeightfieldLayer,
    tx: i32,
    ty: i32,
    tlayer: i32,
) -> Result<Vec<u8>> {
    let header = TileLayerHeader::from_heightfield_layer(layer, tx, ty, tlayer)?;
    encode_tile_layer(comp, &header, &layer.heights, &layer.areas, &layer.cons)
}

/// Encodes the header and grids of a layer into a payload
pub fn encode_tile_layer(
    comp: &dyn TileCompressor,
    header: &TileLayerHeader,
    heights: &[u8],
    areas: &[u8],
    cons: &[u8],
) -> Result<Vec<u8>> {
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

    let mut grids = Vec::with_capacity(n * 3);
    grids.extend_from_slice(heights);
    grids.extend_from_slice(areas);
    grids.extend_from_slice(cons);

    let compressed = comp.compress(&grids)?;
    if compressed.len() > comp.max_compressed_size(grids.len()) {
        return Err(Error::Compression(format!(
            "compressed {} bytes into {}, more than the declared bound",
            grids.len(),
            compressed.len()
        )));
    }

    let mut data = Vec::with_capacity(TILE_LAYER_HEADER_SIZE + compressed.len());
    header.write_to(&mut data)?;
    data.extend_from_slice(&compressed);
    Ok(data)
}

/// Decodes a payload back into a tile layer, validating magic and version first
pub fn decompress_tile_cache_layer(comp: &dyn TileCompressor, data: &[u8]) -> Result<TileLayer> {
    let header = TileLayerHeader::parse(data)?;
    let n = header.cell_count();

    let grids = comp.decompress(&data[TILE_LAYER_HEADER_SIZE..])?;
    if grids.len() != n * 3 {
        return Err(Error::Compression(format!(
            "tile ({}, {}, {}) decompressed to {} bytes, expected {}",
            header.tx,
            header.ty,
            header.tlayer,
            grids.len(),
            n * 3
        )));
    }

    TileLayer::new(
        header,
        grids[..n].to_vec(),
        grids[n..2 * n].to_vec(),
        grids[2 * n..].to_vec(),
    )
}
