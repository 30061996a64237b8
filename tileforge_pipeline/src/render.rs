//! The render engine: bulk-produce tiles from a vector style.
//!
//! Same skeleton as the seed engine, but the source is the rasterizer
//! pool instead of an upstream server: acquire a rasterizer, render at the
//! tile's center, encode the RGBA result into the archive format, write
//! through the store. At zoom 0 with 256px tiles the view is rendered at
//! 512px and downscaled, which works around rasterizer artifacts at the
//! lowest zoom.

use crate::driver::{StopSignal, run_pipeline};
use crate::freshness::{FreshnessPlan, FreshnessPolicy, RefreshDecision};
use crate::planner::plan_coverages;
use anyhow::{Context, Result, ensure};
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tileforge_core::progress::get_progress;
use tileforge_core::utils::md5_hex;
use tileforge_core::{Coverage, TileCoord, TileFormat, TilePosition};
use tileforge_render::{RenderView, RendererPool};
use tileforge_store::TileStore;

#[derive(Clone, Debug)]
pub struct RenderOptions {
	/// Encoding of the produced tiles.
	pub format: TileFormat,
	/// Edge length of a stored tile in pixels.
	pub tile_size: u32,
	/// Resolution multiplier (2 for retina tile sets).
	pub render_scale: u32,
	pub concurrency: usize,
	pub store_transparent: bool,
	pub freshness: FreshnessPolicy,
}

impl Default for RenderOptions {
	fn default() -> RenderOptions {
		RenderOptions {
			format: TileFormat::PNG,
			tile_size: 256,
			render_scale: 1,
			concurrency: num_cpus::get(),
			store_transparent: true,
			freshness: FreshnessPolicy::Always,
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderReport {
	pub total: u64,
	pub complete: u64,
	pub failed: u64,
	pub skipped: u64,
	pub written: u64,
	pub elapsed: Duration,
}

/// Renders every tile of `coverages` through `pool` into `store`.
pub async fn render_tiles(
	store: &TileStore,
	coverages: &[Coverage],
	pool: &RendererPool,
	options: &RenderOptions,
	stop: &StopSignal,
) -> Result<RenderReport> {
	ensure!(options.format != TileFormat::PBF, "the render engine produces raster tiles");
	ensure!(options.tile_size > 0, "tile size must be positive");
	ensure!(options.render_scale > 0, "render scale must be positive");

	let plan = plan_coverages(coverages)?;
	let freshness = FreshnessPlan::build(&options.freshness, store, coverages).await?;

	info!("rendering {} tiles into {}", plan.total, store.name());
	let started = Instant::now();
	let progress = std::sync::Mutex::new(get_progress("rendering tiles", plan.total));

	let skipped = AtomicU64::new(0);
	let written = AtomicU64::new(0);

	let freshness_ref = &freshness;
	let progress_ref = &progress;
	let skipped_ref = &skipped;
	let written_ref = &written;

	let report = run_pipeline(&plan, options.concurrency, stop, move |coord, _| async move {
		let result = render_one(store, coord, pool, options, freshness_ref, skipped_ref, written_ref).await;
		progress_ref.lock().unwrap().inc(1);
		result
	})
	.await;

	progress.lock().unwrap().finish();
	let elapsed = started.elapsed();
	info!(
		"rendered {} in {:.1?}: {} written, {} skipped, {} failed",
		store.name(),
		elapsed,
		written.load(Ordering::SeqCst),
		skipped.load(Ordering::SeqCst),
		report.failed
	);

	Ok(RenderReport {
		total: report.total,
		complete: report.complete,
		failed: report.failed,
		skipped: skipped.into_inner(),
		written: written.into_inner(),
		elapsed,
	})
}

async fn render_one(
	store: &TileStore,
	coord: TileCoord,
	pool: &RendererPool,
	options: &RenderOptions,
	freshness: &FreshnessPlan,
	skipped: &AtomicU64,
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

	let size = options.tile_size * options.render_scale;
	// at zoom 0 the rasterizer produces artifacts at 256px; render double
	// and scale down
	let oversample = coord.z == 0 && size == 256;
	let render_size = if oversample { 512 } else { size };

	let (lon, lat) = coord.to_lonlat(TilePosition::Center);
	let view = RenderView {
		lon,
		lat,
		zoom: f64::from(coord.z),
		width: render_size,
		height: render_size,
	};

	let raster = {
		let mut renderer = pool.acquire().await?;
		renderer
			.render(&view)
			.await
			.with_context(|| format!("failed to render {coord}"))?
	};
	debug!("rendered {coord} at {render_size}px");

	let raster = if oversample { raster.downscale(size, size)? } else { raster };
	let blob = raster.encode(options.format)?;

	if stored_hash.is_some_and(|hash| hash == md5_hex(&blob)) {
		skipped.fetch_add(1, Ordering::SeqCst);
		return Ok(());
	}

	if store.put_tile(&coord, &blob, options.store_transparent).await? {
		written.fetch_add(1, Ordering::SeqCst);
	}
	Ok(())
}
