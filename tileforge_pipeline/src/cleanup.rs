//! The cleanup engine: delete tiles older than a cutoff across a coverage.

use crate::driver::{StopSignal, run_pipeline};
use crate::planner::plan_coverages;
use anyhow::Result;
use log::info;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tileforge_core::progress::get_progress;
use tileforge_core::utils::now_ms;
use tileforge_core::{Coverage, TileCoord};
use tileforge_store::TileStore;
use time::OffsetDateTime;

/// The age threshold below which tiles are removed.
#[derive(Clone, Debug, PartialEq)]
pub enum CleanupCutoff {
	/// Delete tiles created before the instant.
	Before(OffsetDateTime),
	/// Delete tiles older than this many days.
	OlderThanDays(f64),
	/// Delete every tile in the coverage.
	Forever,
}

impl CleanupCutoff {
	fn cutoff_ms(&self) -> i64 {
		match self {
			CleanupCutoff::Before(instant) => instant.unix_timestamp() * 1000 + i64::from(instant.millisecond()),
			CleanupCutoff::OlderThanDays(days) => now_ms() - (days * 86_400_000.0) as i64,
			CleanupCutoff::Forever => i64::MAX,
		}
	}
}

#[derive(Clone, Debug)]
pub struct CleanupOptions {
	pub cutoff: CleanupCutoff,
	pub concurrency: usize,
}

impl CleanupOptions {
	pub fn new(cutoff: CleanupCutoff) -> CleanupOptions {
		CleanupOptions {
			cutoff,
			concurrency: num_cpus::get(),
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
	pub total: u64,
	pub complete: u64,
	pub failed: u64,
	pub deleted: u64,
	pub elapsed: Duration,
}

/// Deletes every tile of `coverages` whose `created` stamp lies before the
/// cutoff. Tiles without a stamp count as infinitely old.
pub async fn cleanup_tiles(
	store: &TileStore,
	coverages: &[Coverage],
	options: &CleanupOptions,
	stop: &StopSignal,
) -> Result<CleanupReport> {
	let plan = plan_coverages(coverages)?;
	let cutoff = options.cutoff.cutoff_ms();
	let created: HashMap<String, i64> = store.created_for_coverage(coverages).await?;

	info!("cleaning up {} tiles in {}", plan.total, store.name());
	let started = Instant::now();
	let progress = std::sync::Mutex::new(get_progress("cleaning up tiles", plan.total));
	let deleted = AtomicU64::new(0);

	let created_ref = &created;
	let progress_ref = &progress;
	let deleted_ref = &deleted;

	let report = run_pipeline(&plan, options.concurrency, stop, move |coord, _| async move {
		let result = cleanup_one(store, coord, cutoff, created_ref, deleted_ref).await;
		progress_ref.lock().unwrap().inc(1);
		result
	})
	.await;

	store.post_bulk_cleanup().await?;

	progress.lock().unwrap().finish();
	let elapsed = started.elapsed();
	info!(
		"cleaned up {} in {:.1?}: {} deleted, {} failed",
		store.name(),
		elapsed,
		deleted.load(Ordering::SeqCst),
		report.failed
	);

	Ok(CleanupReport {
		total: report.total,
		complete: report.complete,
		failed: report.failed,
		deleted: deleted.into_inner(),
		elapsed,
	})
}

async fn cleanup_one(
	store: &TileStore,
	coord: TileCoord,
	cutoff: i64,
	created: &HashMap<String, i64>,
	deleted: &AtomicU64,
) -> Result<()> {
	let stamp = created.get(&coord.key()).copied().unwrap_or(0);
	if stamp >= cutoff {
		return Ok(());
	}
	if store.delete_tile(&coord).await? {
		deleted.fetch_add(1, Ordering::SeqCst);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tileforge_core::{Blob, GeoBBox};

	async fn seeded_store(dir: &assert_fs::TempDir) -> Result<TileStore> {
		let uri = dir.path().join("tiles").to_string_lossy().to_string();
		let store = TileStore::open(&uri, true, Duration::from_secs(5)).await?;
		for coord in Coverage::new_bbox(1, GeoBBox::new_mercator_world())?.to_tile_bbox().iter_coords() {
			store
				.put_tile(&coord, &Blob::from(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]), true)
				.await?;
		}
		Ok(store)
	}

	#[tokio::test]
	async fn forever_deletes_everything() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let store = seeded_store(&dir).await?;
		assert_eq!(store.count().await?, 4);

		let coverages = [Coverage::new_bbox(1, GeoBBox::new_mercator_world())?];
		let report = cleanup_tiles(
			&store,
			&coverages,
			&CleanupOptions::new(CleanupCutoff::Forever),
			&StopSignal::new(),
		)
		.await?;

		assert_eq!(report.deleted, 4);
		assert_eq!(store.count().await?, 0);
		Ok(())
	}

	#[tokio::test]
	async fn fresh_tiles_survive_an_age_cutoff() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let store = seeded_store(&dir).await?;

		let coverages = [Coverage::new_bbox(1, GeoBBox::new_mercator_world())?];
		let report = cleanup_tiles(
			&store,
			&coverages,
			&CleanupOptions::new(CleanupCutoff::OlderThanDays(1.0)),
			&StopSignal::new(),
		)
		.await?;

		assert_eq!(report.deleted, 0);
		assert_eq!(store.count().await?, 4);
		Ok(())
	}

	#[tokio::test]
	async fn future_cutoff_deletes_stamped_tiles() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let store = seeded_store(&dir).await?;

		let future = OffsetDateTime::from_unix_timestamp((now_ms() + 3_600_000) / 1000)?;
		let coverages = [Coverage::new_bbox(1, GeoBBox::new_mercator_world())?];
		let report = cleanup_tiles(
			&store,
			&coverages,
			&CleanupOptions::new(CleanupCutoff::Before(future)),
			&StopSignal::new(),
		)
		.await?;

		assert_eq!(report.deleted, 4);
		Ok(())
	}
}
