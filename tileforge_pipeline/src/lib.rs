//! Bulk tile production: coverage planning, the bounded concurrent driver,
//! and the seed, render and cleanup engines on top of it.
//!
//! All three engines share one shape: expand coverages into tile bounds,
//! resolve the freshness policy once, then drive a per-tile task through
//! the pipeline with bounded parallelism. Per-tile failures are logged and
//! counted, never fatal; batch-level failures abort the run.

mod cleanup;
mod driver;
mod freshness;
mod planner;
mod render;
mod seed;

pub use cleanup::{CleanupCutoff, CleanupOptions, CleanupReport, cleanup_tiles};
pub use driver::{PipelineProgress, PipelineReport, StopSignal, run_pipeline};
pub use freshness::{FreshnessPlan, FreshnessPolicy, RefreshDecision};
pub use planner::{CoveragePlan, PlannedBounds, plan_coverages, process_coverages};
pub use render::{RenderOptions, RenderReport, render_tiles};
pub use seed::{SeedOptions, SeedReport, seed_tiles};
