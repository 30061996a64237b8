//! The bounded-parallelism pipeline driver.
//!
//! Drives a per-tile async task over every coordinate of a plan, at most
//! `concurrency` in flight. Per-tile failures are logged and counted, so a
//! bad tile cannot abort a run of millions; the stop signal halts
//! admission of new tiles while in-flight tasks settle. Retries belong to
//! the per-tile task (via [`tileforge_core::utils::retry`]), never to the
//! driver.

use crate::planner::CoveragePlan;
use futures::StreamExt;
use log::warn;
use std::future::{Future, ready};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tileforge_core::TileCoord;

/// Cooperative cancellation: stops admission, lets in-flight tasks finish.
#[derive(Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
	pub fn new() -> StopSignal {
		StopSignal::default()
	}

	pub fn stop(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_stopped(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// Shared run counters, mutated under one mutex.
#[derive(Debug, Default)]
pub struct PipelineProgress {
	pub active: usize,
	pub complete: u64,
	pub failed: u64,
	pub total: u64,
}

/// What a finished (or stopped) run looked like.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineReport {
	pub total: u64,
	pub complete: u64,
	pub failed: u64,
}

/// Runs `task` once for every tile of `plan`, at most `concurrency`
/// concurrently. Returns after all admitted tasks have settled.
pub async fn run_pipeline<F, Fut>(
	plan: &CoveragePlan,
	concurrency: usize,
	stop: &StopSignal,
	task: F,
) -> PipelineReport
where
	F: Fn(TileCoord, Arc<Mutex<PipelineProgress>>) -> Fut,
	Fut: Future<Output = anyhow::Result<()>>,
{
	let progress = Arc::new(Mutex::new(PipelineProgress {
		total: plan.total,
		..PipelineProgress::default()
	}));

	let task = &task;
	let coords = plan.tile_bounds.iter().flat_map(|bounds| bounds.bbox.iter_coords());

	futures::stream::iter(coords)
		.take_while(|_| ready(!stop.is_stopped()))
		.for_each_concurrent(concurrency.max(1), |coord| {
			let progress = progress.clone();
			async move {
				progress.lock().unwrap().active += 1;

				let result = task(coord, progress.clone()).await;

				let mut progress = progress.lock().unwrap();
				progress.active -= 1;
				progress.complete += 1;
				if let Err(error) = result {
					progress.failed += 1;
					warn!("tile {coord} failed: {error:#}");
				}
			}
		})
		.await;

	let progress = progress.lock().unwrap();
	PipelineReport {
		total: progress.total,
		complete: progress.complete,
		failed: progress.failed,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::planner::plan_coverages;
	use anyhow::{Result, bail};
	use std::collections::HashSet;
	use std::sync::atomic::AtomicUsize;
	use std::time::Duration;
	use tileforge_core::{Coverage, GeoBBox};

	fn world_plan(zoom: u8) -> CoveragePlan {
		plan_coverages(&[Coverage::new_bbox(zoom, GeoBBox::new_mercator_world()).unwrap()]).unwrap()
	}

	#[tokio::test]
	async fn visits_every_tile_once() {
		let plan = world_plan(2);
		let seen = Arc::new(Mutex::new(HashSet::new()));
		let stop = StopSignal::new();

		let report = run_pipeline(&plan, 4, &stop, |coord, _| {
			let seen = seen.clone();
			async move {
				assert!(seen.lock().unwrap().insert(coord), "tile {coord} visited twice");
				Ok(())
			}
		})
		.await;

		assert_eq!(report, PipelineReport {
			total: 16,
			complete: 16,
			failed: 0
		});
		assert_eq!(seen.lock().unwrap().len(), 16);
	}

	#[tokio::test]
	async fn failures_do_not_abort_the_run() {
		let plan = world_plan(2);
		let stop = StopSignal::new();

		let report = run_pipeline(&plan, 3, &stop, |coord, _| async move {
			if coord.x == 0 {
				bail!("synthetic failure");
			}
			Ok(())
		})
		.await;

		assert_eq!(report.complete, 16);
		assert_eq!(report.failed, 4); // one per row
	}

	#[tokio::test]
	async fn concurrency_is_bounded() {
		let plan = world_plan(3);
		let stop = StopSignal::new();
		let active = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));

		let report = run_pipeline(&plan, 5, &stop, |_, progress| {
			let active = active.clone();
			let peak = peak.clone();
			async move {
				let now = active.fetch_add(1, Ordering::SeqCst) + 1;
				peak.fetch_max(now, Ordering::SeqCst);
				// the driver's own counter also respects the bound
				assert!(progress.lock().unwrap().active <= 5);
				tokio::time::sleep(Duration::from_millis(2)).await;
				active.fetch_sub(1, Ordering::SeqCst);
				Ok(())
			}
		})
		.await;

		assert_eq!(report.complete, 64);
		assert!(peak.load(Ordering::SeqCst) <= 5);
		assert!(peak.load(Ordering::SeqCst) > 1, "tasks never overlapped");
	}

	#[tokio::test]
	async fn stop_halts_admission() -> Result<()> {
		let plan = world_plan(5); // 1024 tiles
		let stop = StopSignal::new();
		let stop_inner = stop.clone();
		let started = Arc::new(AtomicUsize::new(0));

		let report = run_pipeline(&plan, 2, &stop, |_, _| {
			let stop = stop_inner.clone();
			let started = started.clone();
			async move {
				if started.fetch_add(1, Ordering::SeqCst) == 10 {
					stop.stop();
				}
				tokio::time::sleep(Duration::from_millis(1)).await;
				Ok(())
			}
		})
		.await;

		// everything admitted before the signal settles, nothing more starts
		assert!(report.complete >= 11);
		assert!(report.complete < 1024);
		assert_eq!(report.complete, started.load(Ordering::SeqCst) as u64);
		Ok(())
	}
}
