//! Geographic bounding boxes in EPSG:4326.
//!
//! A [`GeoBBox`] is `[x_min, y_min, x_max, y_max]` (west, south, east,
//! north). Coverage math clamps boxes to the Web-Mercator valid range
//! before projecting them onto a tile grid.
//!
//! # Examples
//!
//! ```
//! use tileforge_core::GeoBBox;
//!
//! let mut bbox = GeoBBox::new(-10.0, -5.0, 10.0, 5.0).unwrap();
//! bbox.extend(&GeoBBox::new(-12.0, -3.0, 8.0, 6.0).unwrap());
//! assert_eq!(bbox.as_array(), [-12.0, -5.0, 10.0, 6.0]);
//! ```

use anyhow::{Result, ensure};
use std::fmt::{self, Debug, Display};

pub(crate) const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;
pub(crate) const MAX_MERCATOR_LNG: f64 = 180.0;
pub(crate) const EARTH_RADIUS: f64 = 6_378_137.0; // meters

#[derive(Clone, Copy, PartialEq)]
pub struct GeoBBox {
	pub x_min: f64,
	pub y_min: f64,
	pub x_max: f64,
	pub y_max: f64,
}

impl GeoBBox {
	/// Creates a bounding box, checking ordering and world limits.
	pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Result<GeoBBox> {
		ensure!(x_min <= x_max, "x_min ({x_min}) must be <= x_max ({x_max})");
		ensure!(y_min <= y_max, "y_min ({y_min}) must be <= y_max ({y_max})");
		ensure!(x_min >= -180.0 && x_max <= 180.0, "longitudes must be within [-180, 180]");
		ensure!(y_min >= -90.0 && y_max <= 90.0, "latitudes must be within [-90, 90]");
		Ok(GeoBBox {
			x_min,
			y_min,
			x_max,
			y_max,
		})
	}

	/// Creates a bounding box from unordered corners, clamping to world limits.
	pub fn new_clamped(x0: f64, y0: f64, x1: f64, y1: f64) -> GeoBBox {
		GeoBBox {
			x_min: x0.min(x1).clamp(-180.0, 180.0),
			y_min: y0.min(y1).clamp(-90.0, 90.0),
			x_max: x0.max(x1).clamp(-180.0, 180.0),
			y_max: y0.max(y1).clamp(-90.0, 90.0),
		}
	}

	/// The whole world, clamped to the Mercator-valid latitude span.
	pub fn new_mercator_world() -> GeoBBox {
		GeoBBox {
			x_min: -MAX_MERCATOR_LNG,
			y_min: -MAX_MERCATOR_LAT,
			x_max: MAX_MERCATOR_LNG,
			y_max: MAX_MERCATOR_LAT,
		}
	}

	/// Clamps the box in place to the Web-Mercator valid range.
	pub fn limit_to_mercator(&mut self) {
		self.x_min = self.x_min.clamp(-MAX_MERCATOR_LNG, MAX_MERCATOR_LNG);
		self.y_min = self.y_min.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
		self.x_max = self.x_max.clamp(-MAX_MERCATOR_LNG, MAX_MERCATOR_LNG);
		self.y_max = self.y_max.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
	}

	/// Grows the box in place so it also covers `other`.
	pub fn extend(&mut self, other: &GeoBBox) {
		self.x_min = self.x_min.min(other.x_min);
		self.y_min = self.y_min.min(other.y_min);
		self.x_max = self.x_max.max(other.x_max);
		self.y_max = self.y_max.max(other.y_max);
	}

	/// Returns the overlap with `other`, or `None` if they are disjoint.
	pub fn intersect(&self, other: &GeoBBox) -> Option<GeoBBox> {
		let x_min = self.x_min.max(other.x_min);
		let y_min = self.y_min.max(other.y_min);
		let x_max = self.x_max.min(other.x_max);
		let y_max = self.y_max.min(other.y_max);
		if x_min <= x_max && y_min <= y_max {
			Some(GeoBBox {
				x_min,
				y_min,
				x_max,
				y_max,
			})
		} else {
			None
		}
	}

	pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
		lon >= self.x_min && lon <= self.x_max && lat >= self.y_min && lat <= self.y_max
	}

	pub fn covers(&self, other: &GeoBBox) -> bool {
		self.x_min <= other.x_min && self.y_min <= other.y_min && self.x_max >= other.x_max && self.y_max >= other.y_max
	}

	pub fn center(&self) -> (f64, f64) {
		((self.x_min + self.x_max) / 2.0, (self.y_min + self.y_max) / 2.0)
	}

	pub fn as_array(&self) -> [f64; 4] {
		[self.x_min, self.y_min, self.x_max, self.y_max]
	}
}

impl TryFrom<Vec<f64>> for GeoBBox {
	type Error = anyhow::Error;

	fn try_from(value: Vec<f64>) -> Result<Self> {
		ensure!(value.len() == 4, "bounds must have 4 elements, got {}", value.len());
		GeoBBox::new(value[0], value[1], value[2], value[3])
	}
}

impl Display for GeoBBox {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!(
			"[{},{},{},{}]",
			self.x_min, self.y_min, self.x_max, self.y_max
		))
	}
}

impl Debug for GeoBBox {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!("GeoBBox{self}"))
	}
}
