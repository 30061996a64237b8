//! Compression and decompression of payload blobs.
//!
//! Supports gzip and zlib/deflate via `flate2` and Brotli via `brotli`.
//! The resolver uses [`decompress`] to hand the rasterizer plain bytes
//! whatever the origin delivered.
//!
//! ```
//! use tileforge_core::{Blob, utils::{compress_gzip, decompress_gzip}};
//!
//! let data = Blob::from(vec![1, 2, 3, 4, 5]);
//! let compressed = compress_gzip(&data)?;
//! assert_eq!(decompress_gzip(&compressed)?, data);
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::{Blob, TileCompression};
use anyhow::{Context, Result};
use flate2::read::{GzDecoder, GzEncoder, ZlibDecoder};
use std::io::Read;

/// Decompresses `blob` according to `compression`.
pub fn decompress(blob: Blob, compression: TileCompression) -> Result<Blob> {
	match compression {
		TileCompression::Uncompressed => Ok(blob),
		TileCompression::Gzip => decompress_gzip(&blob),
		TileCompression::Deflate => decompress_deflate(&blob),
		TileCompression::Brotli => decompress_brotli(&blob),
	}
}

/// Decompresses `blob` if its leading bytes carry a known magic prefix.
pub fn decompress_if_needed(blob: Blob) -> Result<Blob> {
	let compression = TileCompression::from_bytes(blob.as_slice());
	decompress(blob, compression)
}

pub fn compress_gzip(blob: &Blob) -> Result<Blob> {
	let mut result = Vec::new();
	GzEncoder::new(blob.as_slice(), flate2::Compression::default())
		.read_to_end(&mut result)
		.context("failed to compress with gzip")?;
	Ok(Blob::from(result))
}

pub fn decompress_gzip(blob: &Blob) -> Result<Blob> {
	let mut result = Vec::new();
	GzDecoder::new(blob.as_slice())
		.read_to_end(&mut result)
		.context("failed to decompress with gzip")?;
	Ok(Blob::from(result))
}

pub fn decompress_deflate(blob: &Blob) -> Result<Blob> {
	let mut result = Vec::new();
	ZlibDecoder::new(blob.as_slice())
		.read_to_end(&mut result)
		.context("failed to decompress with deflate")?;
	Ok(Blob::from(result))
}

pub fn compress_brotli(blob: &Blob) -> Result<Blob> {
	let params = brotli::enc::BrotliEncoderParams {
		quality: 10,
		..Default::default()
	};
	let mut input = blob.as_slice();
	let mut result = Vec::new();
	brotli::BrotliCompress(&mut input, &mut result, &params).context("failed to compress with brotli")?;
	Ok(Blob::from(result))
}

pub fn decompress_brotli(blob: &Blob) -> Result<Blob> {
	let mut input = blob.as_slice();
	let mut result = Vec::new();
	brotli::BrotliDecompress(&mut input, &mut result).context("failed to decompress with brotli")?;
	Ok(Blob::from(result))
}
