//! Rectangular tile ranges at a single zoom level.
//!
//! A [`TileBBox`] is the tile-grid counterpart of a [`GeoBBox`]: an
//! inclusive range of columns and rows at one zoom level, always in `XYZ`
//! with `y_min <= y_max`. Coverage planning produces these; the stores
//! iterate them.
//!
//! # Examples
//!
//! ```
//! use tileforge_core::{GeoBBox, TileBBox};
//!
//! let bbox = TileBBox::from_geo_bbox(&GeoBBox::new_mercator_world(), 1);
//! assert_eq!(bbox.count_tiles(), 4);
//! assert_eq!(bbox.iter_coords().count(), 4);
//! ```

use super::MAX_ZOOM_LEVEL;
use crate::{GeoBBox, TileCoord, TilePosition};
use anyhow::{Result, ensure};
use std::fmt::{self, Debug};

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TileBBox {
	pub z: u8,
	pub x_min: u32,
	pub y_min: u32,
	pub x_max: u32,
	pub y_max: u32,
}

impl TileBBox {
	pub fn new(z: u8, x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Result<TileBBox> {
		ensure!(z <= MAX_ZOOM_LEVEL, "zoom level ({z}) must be <= {MAX_ZOOM_LEVEL}");
		let max = (1u32 << z) - 1;
		ensure!(x_max <= max, "x_max ({x_max}) must be <= {max} at zoom {z}");
		ensure!(y_max <= max, "y_max ({y_max}) must be <= {max} at zoom {z}");
		ensure!(x_min <= x_max, "x_min ({x_min}) must be <= x_max ({x_max})");
		ensure!(y_min <= y_max, "y_min ({y_min}) must be <= y_max ({y_max})");
		Ok(TileBBox {
			z,
			x_min,
			y_min,
			x_max,
			y_max,
		})
	}

	/// The full tile grid of zoom level `z`.
	pub fn new_full(z: u8) -> Result<TileBBox> {
		let max = (1u32 << z) - 1;
		TileBBox::new(z, 0, 0, max, max)
	}

	/// Projects a geographic box onto the tile grid of zoom level `z`.
	///
	/// The input is clamped to the Mercator-valid range first; every tile
	/// whose extent intersects the box is included.
	pub fn from_geo_bbox(bbox: &GeoBBox, z: u8) -> TileBBox {
		let mut bbox = *bbox;
		bbox.limit_to_mercator();

		// north-west corner maps to the smallest indices in XYZ
		let min = TileCoord::from_lonlat(bbox.x_min, bbox.y_max, z).unwrap();
		let max = TileCoord::from_lonlat(bbox.x_max, bbox.y_min, z).unwrap();

		TileBBox {
			z,
			x_min: min.x,
			y_min: min.y,
			x_max: max.x,
			y_max: max.y,
		}
	}

	/// Returns the outer geographic extent of the range, snapped to the grid.
	pub fn to_geo_bbox(&self) -> GeoBBox {
		let (x_min, y_max) = TileCoord {
			z: self.z,
			x: self.x_min,
			y: self.y_min,
		}
		.to_lonlat(TilePosition::TopLeft);
		let (x_max, y_min) = TileCoord {
			z: self.z,
			x: self.x_max,
			y: self.y_max,
		}
		.to_lonlat(TilePosition::BottomRight);
		GeoBBox::new_clamped(x_min, y_min, x_max, y_max)
	}

	pub fn width(&self) -> u32 {
		self.x_max - self.x_min + 1
	}

	pub fn height(&self) -> u32 {
		self.y_max - self.y_min + 1
	}

	pub fn count_tiles(&self) -> u64 {
		u64::from(self.width()) * u64::from(self.height())
	}

	pub fn contains_coord(&self, coord: &TileCoord) -> bool {
		coord.z == self.z
			&& coord.x >= self.x_min
			&& coord.x <= self.x_max
			&& coord.y >= self.y_min
			&& coord.y <= self.y_max
	}

	/// Grows the range in place so it also covers `coord`.
	pub fn include_coord(&mut self, coord: &TileCoord) {
		debug_assert_eq!(coord.z, self.z);
		self.x_min = self.x_min.min(coord.x);
		self.y_min = self.y_min.min(coord.y);
		self.x_max = self.x_max.max(coord.x);
		self.y_max = self.y_max.max(coord.y);
	}

	/// Returns the overlap with `other`, or `None` if disjoint or at a
	/// different zoom level.
	pub fn intersect(&self, other: &TileBBox) -> Option<TileBBox> {
		if self.z != other.z {
			return None;
		}
		let x_min = self.x_min.max(other.x_min);
		let y_min = self.y_min.max(other.y_min);
		let x_max = self.x_max.min(other.x_max);
		let y_max = self.y_max.min(other.y_max);
		if x_min <= x_max && y_min <= y_max {
			Some(TileBBox {
				z: self.z,
				x_min,
				y_min,
				x_max,
				y_max,
			})
		} else {
			None
		}
	}

	/// Iterates all coordinates in the range, row by row.
	pub fn iter_coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
		let z = self.z;
		(self.y_min..=self.y_max)
			.flat_map(move |y| (self.x_min..=self.x_max).map(move |x| TileCoord { z, x, y }))
	}
}

impl Debug for TileBBox {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!(
			"{}: [{},{},{},{}] ({})",
			self.z,
			self.x_min,
			self.y_min,
			self.x_max,
			self.y_max,
			self.count_tiles()
		))
	}
}
