//! Coverage planning: from geographic coverages to iterable tile bounds.

use anyhow::{Result, ensure};
use tileforge_core::{Coverage, GeoBBox, TileBBox};

/// One coverage expanded onto the tile grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlannedBounds {
	pub bbox: TileBBox,
	/// The outer geographic extent of `bbox`, snapped to the tile grid.
	pub real_bbox: GeoBBox,
}

/// The full plan for a bulk run.
#[derive(Clone, Debug, PartialEq)]
pub struct CoveragePlan {
	/// Total number of per-tile tasks (overlapping coverages count twice).
	pub total: u64,
	pub tile_bounds: Vec<PlannedBounds>,
	/// Union of all per-coverage extents.
	pub real_bbox: GeoBBox,
}

/// Normalizes coverages before planning: circles become their enclosing
/// boxes, and everything is clipped to `limit` (coverages entirely outside
/// it are dropped).
pub fn process_coverages(coverages: Vec<Coverage>, limit: Option<&GeoBBox>) -> Vec<Coverage> {
	coverages
		.into_iter()
		.filter_map(|coverage| match limit {
			Some(limit) => coverage.clip_to(limit),
			None => Some(coverage.into_bbox_coverage()),
		})
		.collect()
}

/// Expands coverages into tile bounds with a task total.
pub fn plan_coverages(coverages: &[Coverage]) -> Result<CoveragePlan> {
	ensure!(!coverages.is_empty(), "at least one coverage is required");

	let mut tile_bounds = Vec::with_capacity(coverages.len());
	let mut total = 0u64;
	let mut real_bbox: Option<GeoBBox> = None;

	for coverage in coverages {
		let bbox = coverage.to_tile_bbox();
		let real = bbox.to_geo_bbox();

		total += bbox.count_tiles();
		match &mut real_bbox {
			Some(union) => union.extend(&real),
			None => real_bbox = Some(real),
		}
		tile_bounds.push(PlannedBounds { bbox, real_bbox: real });
	}

	Ok(CoveragePlan {
		total,
		tile_bounds,
		real_bbox: real_bbox.unwrap(),
	})
}
