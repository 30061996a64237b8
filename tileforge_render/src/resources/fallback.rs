//! Fallback assets: stand-ins handed to the rasterizer when an origin
//! yields nothing, so a single dead upstream cannot abort a render run.
//!
//! The fallback tile is a minimal 1x1 image of the requested format (an
//! empty payload for `pbf`, which decodes as a vector tile without
//! layers). The fallback glyph range is a valid glyphs protobuf carrying
//! an empty fontstack, standing in for the bundled "Open Sans" face.

use crate::raster::RasterData;
use anyhow::Result;
use tileforge_core::{Blob, TileFormat};

/// Name of the font face the fallback glyph range claims to carry.
pub const FALLBACK_FONT_NAME: &str = "Open Sans Regular";

/// A minimal valid tile of `format`, used when an upstream tile request
/// fails and a placeholder is needed downstream.
pub fn fallback_tile(format: TileFormat) -> Result<Blob> {
	if format == TileFormat::PBF {
		// an empty buffer is a vector tile without layers
		return Ok(Blob::new_empty());
	}
	let color = if format == TileFormat::JPG {
		[255, 255, 255, 255]
	} else {
		[0, 0, 0, 0]
	};
	RasterData::uniform(1, 1, color).encode(format)
}

/// A valid glyphs protobuf with an empty fontstack covering `range`,
/// substituted when a glyph request fails.
pub fn fallback_glyphs(range: &str) -> Blob {
	// fontstack message: name = 1, range = 2
	let mut stack = Vec::new();
	write_string_field(&mut stack, 1, FALLBACK_FONT_NAME.as_bytes());
	write_string_field(&mut stack, 2, range.as_bytes());

	// glyphs message: stacks = 1
	let mut glyphs = Vec::new();
	write_string_field(&mut glyphs, 1, &stack);
	Blob::from(glyphs)
}

fn write_string_field(out: &mut Vec<u8>, field: u8, payload: &[u8]) {
	out.push((field << 3) | 2);
	write_varint(out, payload.len() as u64);
	out.extend_from_slice(payload);
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
	loop {
		let byte = (value & 0x7F) as u8;
		value >>= 7;
		if value == 0 {
			out.push(byte);
			return;
		}
		out.push(byte | 0x80);
	}
}
