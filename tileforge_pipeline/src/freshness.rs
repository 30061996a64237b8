//! Freshness policies: when is a stored tile stale?
//!
//! The policy is resolved once per run against the store's coverage info
//! ([`FreshnessPlan::build`]); the per-tile hot path is a map lookup.

use anyhow::{Context, Result};
use std::collections::HashMap;
use tileforge_core::{Coverage, TileCoord};
use tileforge_store::TileStore;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

/// The rule by which a stored tile counts as fresh.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum FreshnessPolicy {
	/// Tiles created before the instant are refreshed.
	RefreshBefore(OffsetDateTime),
	/// Tiles older than this many days are refreshed.
	OlderThan(f64),
	/// Download always; skip the write when the payload hash is unchanged.
	ByMd5,
	/// No policy: always download and write.
	#[default]
	Always,
}

impl FreshnessPolicy {
	/// Parses a date string: RFC3339, or a bare `YYYY-MM-DD` taken as
	/// midnight UTC.
	pub fn refresh_before(date: &str) -> Result<FreshnessPolicy> {
		if let Ok(instant) = OffsetDateTime::parse(date, &Rfc3339) {
			return Ok(FreshnessPolicy::RefreshBefore(instant));
		}
		if let Ok(instant) = PrimitiveDateTime::parse(date, format_description!("[year]-[month]-[day] [hour]:[minute]:[second]")) {
			return Ok(FreshnessPolicy::RefreshBefore(instant.assume_utc()));
		}
		let day = Date::parse(date, format_description!("[year]-[month]-[day]"))
			.with_context(|| format!("cannot parse refresh date {date:?}"))?;
		Ok(FreshnessPolicy::RefreshBefore(
			PrimitiveDateTime::new(day, Time::MIDNIGHT).assume_utc(),
		))
	}

	pub fn older_than_days(days: f64) -> FreshnessPolicy {
		FreshnessPolicy::OlderThan(days)
	}
}

/// What to do with one tile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshDecision {
	/// The stored tile is fresh.
	Skip,
	/// Fetch or render, then write.
	Download,
	/// Fetch or render; write only when the MD5 differs from the stored
	/// hash.
	DownloadAndCompare(String),
}

/// A policy resolved against one store and coverage set.
pub struct FreshnessPlan {
	cutoff_ms: Option<i64>,
	created: HashMap<String, i64>,
	hashes: HashMap<String, String>,
	by_md5: bool,
}

impl FreshnessPlan {
	/// Queries the store once for whatever the policy needs.
	pub async fn build(policy: &FreshnessPolicy, store: &TileStore, coverages: &[Coverage]) -> Result<FreshnessPlan> {
		let mut plan = FreshnessPlan {
			cutoff_ms: None,
			created: HashMap::new(),
			hashes: HashMap::new(),
			by_md5: false,
		};

		match policy {
			FreshnessPolicy::Always => {}
			FreshnessPolicy::ByMd5 => {
				plan.by_md5 = true;
				plan.hashes = store.hashes_for_coverage(coverages).await?;
			}
			FreshnessPolicy::RefreshBefore(instant) => {
				plan.cutoff_ms = Some(instant.unix_timestamp() * 1000 + i64::from(instant.millisecond()));
				plan.created = store.created_for_coverage(coverages).await?;
			}
			FreshnessPolicy::OlderThan(days) => {
				plan.cutoff_ms = Some(tileforge_core::utils::now_ms() - (days * 86_400_000.0) as i64);
				plan.created = store.created_for_coverage(coverages).await?;
			}
		}

		Ok(plan)
	}

	/// The per-tile decision: a map lookup, no I/O.
	pub fn decision(&self, coord: &TileCoord) -> RefreshDecision {
		if self.by_md5 {
			return match self.hashes.get(&coord.key()) {
				Some(hash) => RefreshDecision::DownloadAndCompare(hash.clone()),
				None => RefreshDecision::Download,
			};
		}
		if let Some(cutoff) = self.cutoff_ms {
			// a tile stamped exactly at the cutoff is fresh
			if self.created.get(&coord.key()).is_some_and(|created| *created >= cutoff) {
				return RefreshDecision::Skip;
			}
		}
		RefreshDecision::Download
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use tileforge_core::{Blob, GeoBBox, utils::now_ms};

	async fn store_with_tile(dir: &assert_fs::TempDir) -> Result<(TileStore, TileCoord)> {
		let uri = dir.path().join("f.mbtiles").to_string_lossy().to_string();
		let store = TileStore::open(&uri, true, Duration::from_secs(5)).await?;
		let coord = TileCoord::new(1, 0, 0)?;
		store.put_tile(&coord, &Blob::from("payload"), true).await?;
		Ok((store, coord))
	}

	fn world(zoom: u8) -> Vec<Coverage> {
		vec![Coverage::new_bbox(zoom, GeoBBox::new_mercator_world()).unwrap()]
	}

	#[test]
	fn date_parsing() -> Result<()> {
		assert!(matches!(
			FreshnessPolicy::refresh_before("2026-01-15T12:30:00Z")?,
			FreshnessPolicy::RefreshBefore(_)
		));
		assert!(matches!(
			FreshnessPolicy::refresh_before("2026-01-15")?,
			FreshnessPolicy::RefreshBefore(_)
		));
		assert!(FreshnessPolicy::refresh_before("not a date").is_err());
		Ok(())
	}

	#[tokio::test]
	async fn always_downloads() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let (store, coord) = store_with_tile(&dir).await?;
		let plan = FreshnessPlan::build(&FreshnessPolicy::Always, &store, &world(1)).await?;
		assert_eq!(plan.decision(&coord), RefreshDecision::Download);
		Ok(())
	}

	#[tokio::test]
	async fn fresh_tiles_are_skipped() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let (store, coord) = store_with_tile(&dir).await?;

		// the tile was written just now, so a 7-day policy keeps it
		let plan = FreshnessPlan::build(&FreshnessPolicy::OlderThan(7.0), &store, &world(1)).await?;
		assert_eq!(plan.decision(&coord), RefreshDecision::Skip);

		// a tile that was never written is downloaded
		assert_eq!(plan.decision(&TileCoord::new(1, 1, 1)?), RefreshDecision::Download);
		Ok(())
	}

	#[tokio::test]
	async fn stale_tiles_are_downloaded() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let (store, coord) = store_with_tile(&dir).await?;

		// a cutoff in the future makes everything stale
		let future = OffsetDateTime::from_unix_timestamp((now_ms() + 60_000) / 1000)?;
		let plan = FreshnessPlan::build(&FreshnessPolicy::RefreshBefore(future), &store, &world(1)).await?;
		assert_eq!(plan.decision(&coord), RefreshDecision::Download);
		Ok(())
	}

	#[tokio::test]
	async fn md5_policy_carries_stored_hash() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let (store, coord) = store_with_tile(&dir).await?;

		let plan = FreshnessPlan::build(&FreshnessPolicy::ByMd5, &store, &world(1)).await?;
		let expected = tileforge_core::utils::md5_hex(&Blob::from("payload"));
		assert_eq!(plan.decision(&coord), RefreshDecision::DownloadAndCompare(expected));
		assert_eq!(plan.decision(&TileCoord::new(1, 0, 1)?), RefreshDecision::Download);
		Ok(())
	}
}
