//! This module defines the [`TileFormat`] enum and the byte-prefix sniffer
//! that identifies tile payloads. The sniffer is authoritative: upstream
//! `Content-Type` headers are advisory only.
//!
//! # Examples
//!
//! ```
//! use tileforge_core::TileFormat;
//!
//! let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
//! assert_eq!(TileFormat::from_bytes(&png), TileFormat::PNG);
//!
//! assert_eq!(TileFormat::PNG.extension(), ".png");
//! assert_eq!(TileFormat::parse_str("jpeg").unwrap(), TileFormat::JPG);
//! ```

use crate::Blob;
use anyhow::{Result, bail};
use std::fmt::Display;

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TileFormat {
	GIF,
	JPG,
	PBF,
	PNG,
	WEBP,
}

impl Display for TileFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			TileFormat::GIF => "gif",
			TileFormat::JPG => "jpg",
			TileFormat::PBF => "pbf",
			TileFormat::PNG => "png",
			TileFormat::WEBP => "webp",
		})
	}
}

impl TileFormat {
	/// Identifies the format from the payload bytes.
	///
	/// Anything that is not a recognizable raster image is treated as `PBF`
	/// (possibly compressed, see [`crate::TileCompression::from_bytes`]).
	pub fn from_bytes(data: &[u8]) -> TileFormat {
		if data.starts_with(&PNG_SIGNATURE) {
			TileFormat::PNG
		} else if data.len() >= 4 && data.starts_with(&[0xFF, 0xD8]) && data.ends_with(&[0xFF, 0xD9]) {
			TileFormat::JPG
		} else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
			TileFormat::GIF
		} else if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
			TileFormat::WEBP
		} else {
			TileFormat::PBF
		}
	}

	pub fn extension(&self) -> &str {
		match self {
			TileFormat::GIF => ".gif",
			TileFormat::JPG => ".jpg",
			TileFormat::PBF => ".pbf",
			TileFormat::PNG => ".png",
			TileFormat::WEBP => ".webp",
		}
	}

	pub fn content_type(&self) -> &str {
		match self {
			TileFormat::GIF => "image/gif",
			TileFormat::JPG => "image/jpeg",
			TileFormat::PBF => "application/x-protobuf",
			TileFormat::PNG => "image/png",
			TileFormat::WEBP => "image/webp",
		}
	}

	pub fn parse_str(value: &str) -> Result<Self> {
		Ok(match value.to_lowercase().trim_matches([' ', '.']) {
			"gif" => TileFormat::GIF,
			"jpg" | "jpeg" => TileFormat::JPG,
			"pbf" | "mvt" => TileFormat::PBF,
			"png" => TileFormat::PNG,
			"webp" => TileFormat::WEBP,
			_ => bail!("unknown tile format {value:?}"),
		})
	}

	/// Extracts the format from a filename, removing the extension in place.
	pub fn from_filename(filename: &mut String) -> Option<TileFormat> {
		if let Some(index) = filename.rfind('.') {
			if let Ok(format) = TileFormat::parse_str(filename.get(index + 1..)?) {
				filename.truncate(index);
				return Some(format);
			}
		}
		None
	}
}

/// Returns `true` iff `data` is a PNG whose pixels are all fully transparent.
///
/// Anything that does not decode as PNG is not transparent.
pub fn is_fully_transparent_png(data: &Blob) -> bool {
	let Ok(img) = image::load_from_memory_with_format(data.as_slice(), image::ImageFormat::Png) else {
		return false;
	};
	let rgba = img.to_rgba8();
	rgba.pixels().all(|p| p.0[3] == 0)
}
