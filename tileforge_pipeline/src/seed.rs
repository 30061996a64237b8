//! The seed engine: bulk-fill a store from an upstream tile server.
//!
//! Per tile, inside the driver's bounded parallelism: consult the resolved
//! freshness plan, download through the shared retry policy, classify
//! `204`/`404` as "empty tile" (skipped, not an error), then write through
//! the store. Concurrent seeders writing the same tile race harmlessly to
//! a last-write-wins outcome.

use crate::driver::{StopSignal, run_pipeline};
use crate::freshness::{FreshnessPlan, FreshnessPolicy, RefreshDecision};
use crate::planner::plan_coverages;
use anyhow::{Context, Result, ensure};
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tileforge_core::progress::get_progress;
use tileforge_core::utils::{md5_hex, retry};
use tileforge_core::{Coverage, TileCoord};
use tileforge_render::resources::HttpClient;
use tileforge_store::TileStore;

#[derive(Clone, Debug)]
pub struct SeedOptions {
	/// Upstream template containing `{z}`, `{x}` and `{y}`.
	pub url_template: String,
	pub concurrency: usize,
	pub max_try: u32,
	pub backoff_ms: u64,
	pub timeout: Duration,
	pub store_transparent: bool,
	pub freshness: FreshnessPolicy,
}

impl SeedOptions {
	pub fn new(url_template: &str) -> SeedOptions {
		SeedOptions {
			url_template: url_template.to_string(),
			concurrency: num_cpus::get(),
			max_try: 3,
			backoff_ms: 500,
			timeout: Duration::from_secs(30),
			store_transparent: true,
			freshness: FreshnessPolicy::Always,
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
	pub total: u64,
	pub complete: u64,
	pub failed: u64,
	/// Tiles the freshness plan or the MD5 comparison left untouched.
	pub skipped: u64,
	/// Tiles the upstream reported as empty (`204`/`404`).
	pub empty: u64,
	pub written: u64,
	pub elapsed: Duration,
}

/// Fills `store` with every tile of `coverages` pulled from the upstream
/// template.
pub async fn seed_tiles(
	store: &TileStore,
	coverages: &[Coverage],
	options: &SeedOptions,
	stop: &StopSignal,
) -> Result<SeedReport> {
	for placeholder in ["{z}", "{x}", "{y}"] {
		ensure!(
			options.url_template.contains(placeholder),
			"url template {:?} is missing {placeholder}",
			options.url_template
		);
	}

	let plan = plan_coverages(coverages)?;
	let freshness = FreshnessPlan::build(&options.freshness, store, coverages).await?;
	let http = HttpClient::new(options.timeout)?;

	info!("seeding {} tiles into {} from {}", plan.total, store.name(), options.url_template);
	let started = Instant::now();
	let progress = std::sync::Mutex::new(get_progress("seeding tiles", plan.total));

	let skipped = AtomicU64::new(0);
	let empty = AtomicU64::new(0);
	let written = AtomicU64::new(0);

	let total = plan.total;
	let freshness_ref = &freshness;
	let http_ref = &http;
	let progress_ref = &progress;
	let skipped_ref = &skipped;
	let empty_ref = &empty;
	let written_ref = &written;

	let report = run_pipeline(&plan, options.concurrency, stop, move |coord, pipeline_progress| async move {
		let result = seed_one(
			store,
			coord,
			options,
			freshness_ref,
			http_ref,
			skipped_ref,
			empty_ref,
			written_ref,
		)
		.await;
		progress_ref.lock().unwrap().inc(1);
		debug!(
			"seeded {coord} ({} of {total} done)",
			pipeline_progress.lock().unwrap().complete
		);
		result
	})
	.await;

	progress.lock().unwrap().finish();
	let elapsed = started.elapsed();
	info!(
		"seeded {} in {:.1?}: {} written, {} skipped, {} empty, {} failed",
		store.name(),
		elapsed,
		written.load(Ordering::SeqCst),
		skipped.load(Ordering::SeqCst),
		empty.load(Ordering::SeqCst),
		report.failed
	);

	Ok(SeedReport {
		total: report.total,
		complete: report.complete,
		failed: report.failed,
		skipped: skipped.into_inner(),
		empty: empty.into_inner(),
		written: written.into_inner(),
		elapsed,
	})
}

#[allow(clippy::too_many_arguments)]
async fn seed_one(
	store: &TileStore,
	coord: TileCoord,
	options: &SeedOptions,
	freshness: &FreshnessPlan,
	http: &HttpClient,
	skipped: &AtomicU64,
	empty: &AtomicU64,
	written: &AtomicU64,
) -> Result<()> {
	let stored_hash = match freshness.decision(&coord) {
		RefreshDecision::Skip => {
			skipped.fetch_add(1, Ordering::SeqCst);
			return Ok(());
		}
		RefreshDecision::Download => None,
		RefreshDecision::DownloadAndCompare(hash) => Some(hash),
	};

	let url = tile_url(&options.url_template, &coord);
	let downloaded = retry(|| http.get(&url), options.max_try, options.backoff_ms)
		.await
		.with_context(|| format!("failed to download {url}"))?;

	let Some(blob) = downloaded else {
		empty.fetch_add(1, Ordering::SeqCst);
		return Ok(());
	};

	if stored_hash.is_some_and(|hash| hash == md5_hex(&blob)) {
		skipped.fetch_add(1, Ordering::SeqCst);
		return Ok(());
	}

	if store.put_tile(&coord, &blob, options.store_transparent).await? {
		written.fetch_add(1, Ordering::SeqCst);
	}
	Ok(())
}

fn tile_url(template: &str, coord: &TileCoord) -> String {
	template
		.replace("{z}", &coord.z.to_string())
		.replace("{x}", &coord.x.to_string())
		.replace("{y}", &coord.y.to_string())
}
