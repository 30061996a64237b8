//! Tile coordinates and the Web-Mercator projection.
//!
//! A [`TileCoord`] addresses one tile as `(z, x, y)`, always in the `XYZ`
//! scheme (rows counted from the north). Conversion to and from geographic
//! coordinates uses the spherical Web-Mercator projection; latitudes are
//! clamped to the Mercator-valid range before projecting. `TMS` row indices
//! enter and leave through [`TileCoord::from_scheme`] and
//! [`TileCoord::y_in_scheme`] at the storage boundary.
//!
//! # Examples
//!
//! ```
//! use tileforge_core::{TileCoord, TilePosition};
//!
//! let coord = TileCoord::from_lonlat(13.4, 52.5, 10).unwrap();
//! assert_eq!((coord.z, coord.x, coord.y), (10, 550, 335));
//!
//! let (lon, lat) = coord.to_lonlat(TilePosition::Center);
//! let back = TileCoord::from_lonlat(lon, lat, 10).unwrap();
//! assert_eq!(back, coord);
//! ```

use super::MAX_ZOOM_LEVEL;
use super::geo_bbox::{GeoBBox, MAX_MERCATOR_LAT, MAX_MERCATOR_LNG};
use crate::TileScheme;
use anyhow::{Result, ensure};
use std::f64::consts::PI;
use std::fmt::{self, Debug, Display};

/// Sub-tile reference point used when converting a tile back to lon/lat.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TilePosition {
	TopLeft,
	Center,
	BottomRight,
}

impl TilePosition {
	fn offset(self) -> f64 {
		match self {
			TilePosition::TopLeft => 0.0,
			TilePosition::Center => 0.5,
			TilePosition::BottomRight => 1.0,
		}
	}
}

/// A tile address `(z, x, y)`, always in the `XYZ` scheme.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct TileCoord {
	pub z: u8,
	pub x: u32,
	pub y: u32,
}

impl TileCoord {
	pub fn new(z: u8, x: u32, y: u32) -> Result<TileCoord> {
		ensure!(z <= MAX_ZOOM_LEVEL, "zoom level ({z}) must be <= {MAX_ZOOM_LEVEL}");
		let max = 1u32 << z;
		ensure!(x < max, "x ({x}) must be < {max} at zoom {z}");
		ensure!(y < max, "y ({y}) must be < {max} at zoom {z}");
		Ok(TileCoord { z, x, y })
	}

	/// Builds a coordinate from a `(z, x, y)` triple expressed in `scheme`.
	pub fn from_scheme(z: u8, x: u32, y: u32, scheme: TileScheme) -> Result<TileCoord> {
		ensure!(z <= MAX_ZOOM_LEVEL, "zoom level ({z}) must be <= {MAX_ZOOM_LEVEL}");
		let max = 1u32 << z;
		ensure!(y < max, "y ({y}) must be < {max} at zoom {z}");
		TileCoord::new(z, x, scheme.convert_y(TileScheme::XYZ, z, y))
	}

	/// Projects a geographic position onto the tile grid of zoom level `z`.
	///
	/// Longitude and latitude are clamped to the Mercator-valid box first;
	/// the resulting index is clamped to `[0, 2^z - 1]`, so any input maps
	/// to a valid tile.
	pub fn from_lonlat(lon: f64, lat: f64, z: u8) -> Result<TileCoord> {
		ensure!(z <= MAX_ZOOM_LEVEL, "zoom level ({z}) must be <= {MAX_ZOOM_LEVEL}");

		let lon = lon.clamp(-MAX_MERCATOR_LNG, MAX_MERCATOR_LNG);
		let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);

		let size = 2.0f64.powi(z as i32);
		let max = (1u32 << z) - 1;

		let x = ((lon / 360.0 + 0.5) * size).floor();
		let lat_rad = lat * PI / 180.0;
		let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * size).floor();

		let x = (x.max(0.0) as u32).min(max);
		let y = (y.max(0.0) as u32).min(max);

		TileCoord::new(z, x, y)
	}

	/// Returns the geographic position of `position` within this tile.
	pub fn to_lonlat(&self, position: TilePosition) -> (f64, f64) {
		let size = 2.0f64.powi(self.z as i32);
		let off = position.offset();

		let lon = ((self.x as f64 + off) / size - 0.5) * 360.0;
		let lat = ((PI * (1.0 - 2.0 * (self.y as f64 + off) / size)).exp().atan() / PI - 0.25) * 360.0;

		(lon, lat)
	}

	/// Returns the geographic extent of this tile.
	pub fn to_geo_bbox(&self) -> GeoBBox {
		let (x_min, y_max) = self.to_lonlat(TilePosition::TopLeft);
		let (x_max, y_min) = self.to_lonlat(TilePosition::BottomRight);
		GeoBBox::new_clamped(x_min, y_min, x_max, y_max)
	}

	/// The row index of this tile in `scheme`.
	pub fn y_in_scheme(&self, scheme: TileScheme) -> u32 {
		TileScheme::XYZ.convert_y(scheme, self.z, self.y)
	}

	pub fn is_valid(&self) -> bool {
		if self.z > MAX_ZOOM_LEVEL {
			return false;
		}
		let max = 1u32 << self.z;
		(self.x < max) && (self.y < max)
	}

	/// The `"z/x/y"` key used in coverage info maps.
	pub fn key(&self) -> String {
		format!("{}/{}/{}", self.z, self.x, self.y)
	}
}

impl Display for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!("{}/{}/{}", self.z, self.x, self.y))
	}
}

impl Debug for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!("TileCoord({}, [{}, {}])", self.z, self.x, self.y))
	}
}

impl PartialOrd for TileCoord {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for TileCoord {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self
			.z
			.cmp(&other.z)
			.then(self.y.cmp(&other.y))
			.then(self.x.cmp(&other.x))
	}
}
