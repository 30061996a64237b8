//! Coverages: the unit of bulk tile production.
//!
//! A [`Coverage`] pairs a zoom level with a geographic shape (a bounding box
//! or a circle) and expands to all tiles at that zoom whose extents
//! intersect the shape. Seed, render and cleanup runs take a list of
//! coverages; different zoom levels are combined by set-union of their tile
//! coordinates.

use super::geo_bbox::EARTH_RADIUS;
use crate::{GeoBBox, MAX_ZOOM_LEVEL, TileBBox};
use anyhow::{Result, ensure};
use std::f64::consts::PI;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CoverageShape {
	BBox(GeoBBox),
	Circle { center: (f64, f64), radius_m: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coverage {
	pub zoom: u8,
	pub shape: CoverageShape,
}

impl Coverage {
	pub fn new_bbox(zoom: u8, bbox: GeoBBox) -> Result<Coverage> {
		ensure!(zoom <= MAX_ZOOM_LEVEL, "zoom level ({zoom}) must be <= {MAX_ZOOM_LEVEL}");
		Ok(Coverage {
			zoom,
			shape: CoverageShape::BBox(bbox),
		})
	}

	pub fn new_circle(zoom: u8, center: (f64, f64), radius_m: f64) -> Result<Coverage> {
		ensure!(zoom <= MAX_ZOOM_LEVEL, "zoom level ({zoom}) must be <= {MAX_ZOOM_LEVEL}");
		ensure!(radius_m > 0.0, "radius ({radius_m}) must be positive");
		Ok(Coverage {
			zoom,
			shape: CoverageShape::Circle { center, radius_m },
		})
	}

	/// The geographic box covering the shape. Circles are expanded to their
	/// enclosing box, widened by latitude so the full radius fits.
	pub fn bounding_bbox(&self) -> GeoBBox {
		match self.shape {
			CoverageShape::BBox(bbox) => bbox,
			CoverageShape::Circle { center, radius_m } => {
				let meters_per_degree = EARTH_RADIUS * PI / 180.0;
				let d_lat = radius_m / meters_per_degree;
				let d_lon = d_lat / (center.1 * PI / 180.0).cos().max(1e-12);
				GeoBBox::new_clamped(center.0 - d_lon, center.1 - d_lat, center.0 + d_lon, center.1 + d_lat)
			}
		}
	}

	/// Replaces a circle shape with its enclosing box; boxes pass through.
	pub fn into_bbox_coverage(self) -> Coverage {
		Coverage {
			zoom: self.zoom,
			shape: CoverageShape::BBox(self.bounding_bbox()),
		}
	}

	/// Clips the coverage to `limit`, or returns `None` if nothing remains.
	pub fn clip_to(&self, limit: &GeoBBox) -> Option<Coverage> {
		let clipped = self.bounding_bbox().intersect(limit)?;
		Some(Coverage {
			zoom: self.zoom,
			shape: CoverageShape::BBox(clipped),
		})
	}

	/// Expands the coverage to its tile range.
	pub fn to_tile_bbox(&self) -> TileBBox {
		TileBBox::from_geo_bbox(&self.bounding_bbox(), self.zoom)
	}

	/// Splits the coverage into cells aligned to a lon/lat grid.
	///
	/// Cell boundaries lie on multiples of `lon_step`/`lat_step`; the first
	/// and last cell of each axis keep the residual that does not fill a
	/// whole step.
	pub fn grid(&self, lon_step: f64, lat_step: f64) -> Result<Vec<Coverage>> {
		ensure!(lon_step > 0.0, "lon_step ({lon_step}) must be positive");
		ensure!(lat_step > 0.0, "lat_step ({lat_step}) must be positive");

		let bbox = self.bounding_bbox();
		let mut cells = Vec::new();

		let mut y0 = bbox.y_min;
		while y0 < bbox.y_max {
			let y1 = (((y0 / lat_step).floor() + 1.0) * lat_step).min(bbox.y_max);

			let mut x0 = bbox.x_min;
			while x0 < bbox.x_max {
				let x1 = (((x0 / lon_step).floor() + 1.0) * lon_step).min(bbox.x_max);
				cells.push(Coverage {
					zoom: self.zoom,
					shape: CoverageShape::BBox(GeoBBox::new_clamped(x0, y0, x1, y1)),
				});
				x0 = x1;
			}

			y0 = y1;
		}

		// degenerate input (a point or a line) still yields itself
		if cells.is_empty() {
			cells.push(Coverage {
				zoom: self.zoom,
				shape: CoverageShape::BBox(bbox),
			});
		}

		Ok(cells)
	}
}
