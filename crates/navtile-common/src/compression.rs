//! Pluggable compression for tile layer payloads.

use crate::{Error, Result};

/// Trait for compressing and decompressing tile layer payloads.
///
/// The cache and the builder only ever see opaque byte buffers through this
/// trait, so alternative codecs can be swapped in without touching either.
/// Decompression must be exact: `decompress(compress(b)) == b`.
pub trait TileCompressor {
    /// Upper bound on the compressed size of `buffer_size` input bytes.
    fn max_compressed_size(&self, buffer_size: usize) -> usize;

    /// Compresses `data` into a fresh buffer.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompresses `data` into the original buffer.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 compressor, the default codec for cached tiles.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Compressor;

impl TileCompressor for Lz4Compressor {
    fn max_compressed_size(&self, buffer_size: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(buffer_size) + 4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| Error::Parse(format!("LZ4 decompression failed: {e}")))
    }
}
