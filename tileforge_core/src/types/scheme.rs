//! Tile addressing schemes.
//!
//! `XYZ` counts rows from the north (the web default), `TMS` from the south
//! (the MBTiles convention). They differ only in the direction of the y axis:
//! `y_tms = 2^z - 1 - y_xyz`. All computation inside this workspace uses
//! `XYZ`; `TMS` appears only at the MBTiles storage boundary.

use anyhow::{Result, bail};
use std::fmt::Display;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TileScheme {
	#[default]
	XYZ,
	TMS,
}

impl TileScheme {
	/// Mirrors a row index along the y axis of zoom level `z`.
	///
	/// Applying it twice is the identity, so the same function converts in
	/// both directions.
	///
	/// ```
	/// use tileforge_core::TileScheme;
	///
	/// assert_eq!(TileScheme::flip_y(3, 0), 7);
	/// assert_eq!(TileScheme::flip_y(3, 7), 0);
	/// ```
	pub fn flip_y(z: u8, y: u32) -> u32 {
		(1u32 << z) - 1 - y
	}

	/// Converts a row index from `self` to `other`.
	pub fn convert_y(self, other: TileScheme, z: u8, y: u32) -> u32 {
		if self == other { y } else { Self::flip_y(z, y) }
	}

	pub fn parse_str(value: &str) -> Result<Self> {
		Ok(match value.to_lowercase().trim() {
			"xyz" => TileScheme::XYZ,
			"tms" => TileScheme::TMS,
			_ => bail!("unknown tile scheme {value:?}, expected xyz or tms"),
		})
	}
}

impl Display for TileScheme {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			TileScheme::XYZ => "xyz",
			TileScheme::TMS => "tms",
		})
	}
}
