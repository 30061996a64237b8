//! # tileforge
//!
//! A map tile production engine: seed, render, cache and clean up raster
//! and vector tiles across MBTiles files, XYZ directories and PostgreSQL
//! databases.
//!
//! ## Features
//! - **Stores**: one tile API over three backends ([`store::TileStore`]).
//! - **Seed**: bulk-fill an archive from an upstream tile server with
//!   bounded parallelism, retries and freshness policies.
//! - **Render**: bulk-produce raster tiles from a vector style through a
//!   pooled rasterizer whose resources resolve against local archives.
//! - **Cleanup**: age-based deletion sweeps.
//!
//! ## Usage Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tileforge::core::{Coverage, GeoBBox};
//! use tileforge::pipeline::{SeedOptions, StopSignal, seed_tiles};
//! use tileforge::store::TileStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = TileStore::open("/data/osm", true, Duration::from_secs(30)).await?;
//!     let coverage = Coverage::new_bbox(12, GeoBBox::new(13.0, 52.3, 13.8, 52.7)?)?;
//!
//!     let options = SeedOptions::new("https://tiles.example.org/{z}/{x}/{y}.png");
//!     let report = seed_tiles(&store, &[coverage], &options, &StopSignal::new()).await?;
//!     println!("{} tiles written", report.written);
//!
//!     store.close();
//!     Ok(())
//! }
//! ```

pub use tileforge_core as core;
pub use tileforge_pipeline as pipeline;
pub use tileforge_render as render;
pub use tileforge_store as store;
