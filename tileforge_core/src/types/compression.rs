//! Compression identification for tile payloads.
//!
//! PBF tiles frequently arrive gzip- or zlib-compressed; the two magic
//! prefixes (`1F 8B` and `78 ..`) are the only reliable signal, since
//! upstream `Content-Encoding` headers are advisory.

use anyhow::{Result, bail};
use std::fmt::Display;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TileCompression {
	#[default]
	Uncompressed,
	Gzip,
	Deflate,
	Brotli,
}

impl Display for TileCompression {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			TileCompression::Uncompressed => "none",
			TileCompression::Gzip => "gzip",
			TileCompression::Deflate => "deflate",
			TileCompression::Brotli => "brotli",
		})
	}
}

impl TileCompression {
	/// Sniffs the compression from the payload's first bytes.
	///
	/// Brotli has no magic prefix and is never detected here; it only
	/// occurs where the caller already knows it from a filename.
	pub fn from_bytes(data: &[u8]) -> TileCompression {
		match data {
			[0x1F, 0x8B, ..] => TileCompression::Gzip,
			[0x78, second, ..] if matches!(second, 0x01 | 0x5E | 0x9C | 0xDA) => TileCompression::Deflate,
			_ => TileCompression::Uncompressed,
		}
	}

	/// The `Content-Encoding` header value, if any, for this compression.
	pub fn content_encoding(&self) -> Option<&str> {
		match self {
			TileCompression::Uncompressed => None,
			TileCompression::Gzip => Some("gzip"),
			TileCompression::Deflate => Some("deflate"),
			TileCompression::Brotli => Some("br"),
		}
	}

	pub fn extension(&self) -> &str {
		match self {
			TileCompression::Uncompressed | TileCompression::Deflate => "",
			TileCompression::Gzip => ".gz",
			TileCompression::Brotli => ".br",
		}
	}

	pub fn parse_str(value: &str) -> Result<Self> {
		Ok(match value.to_lowercase().trim() {
			"br" | "brotli" => TileCompression::Brotli,
			"deflate" => TileCompression::Deflate,
			"gz" | "gzip" => TileCompression::Gzip,
			"none" | "raw" => TileCompression::Uncompressed,
			_ => bail!("unknown tile compression {value:?}, expected brotli, deflate, gzip or none"),
		})
	}
}
