//! The uniform tile-store interface.
//!
//! [`TileStore`] is a sum over the three backends. The bulk engines accept
//! a `TileStore` and never learn which backend they drive; dispatch happens
//! here, once per operation.
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//! use tileforge_store::TileStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = TileStore::open("/data/osm.mbtiles", true, Duration::from_secs(30)).await?;
//! let coord = tileforge_core::TileCoord::new(0, 0, 0)?;
//! if let Some((blob, headers)) = store.get_tile(&coord).await? {
//!     println!("{} bytes of {}", blob.len(), headers.content_type);
//! }
//! # Ok(())
//! # }
//! ```

use crate::{ArchiveMetadata, MBTilesStore, PgStore, XyzStore};
use anyhow::Result;
use log::debug;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tileforge_core::{Blob, Coverage, TileCompression, TileCoord, TileFormat, is_fully_transparent_png};

/// Advisory content headers for a tile payload, derived from the byte
/// sniffer (never from upstream headers).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileHeaders {
	pub content_type: String,
	pub content_encoding: Option<String>,
}

impl TileHeaders {
	fn from_payload(blob: &Blob) -> TileHeaders {
		let format = TileFormat::from_bytes(blob.as_slice());
		let compression = if format == TileFormat::PBF {
			TileCompression::from_bytes(blob.as_slice())
		} else {
			TileCompression::Uncompressed
		};
		TileHeaders {
			content_type: format.content_type().to_string(),
			content_encoding: compression.content_encoding().map(str::to_string),
		}
	}
}

/// Which per-tile column [`TileStore::extra_info_for_coverage`] collects.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoverageInfoMode {
	Hash,
	Created,
}

/// Per-tile info for a coverage, keyed by `"z/x/y"`.
#[derive(Clone, Debug, PartialEq)]
pub enum CoverageInfo {
	Hashes(HashMap<String, String>),
	Created(HashMap<String, i64>),
}

/// A tile archive in one of the three backends.
pub enum TileStore {
	MBTiles(MBTilesStore),
	Xyz(XyzStore),
	Pg(PgStore),
}

impl TileStore {
	/// Opens an archive by URI.
	///
	/// `postgres://` and `postgresql://` URIs open a [`PgStore`]; paths
	/// ending in `.mbtiles` (optionally prefixed `mbtiles://`) open an
	/// [`MBTilesStore`]; everything else is treated as an XYZ tile
	/// directory (optionally prefixed `xyz://`).
	pub async fn open(uri: &str, create: bool, timeout: Duration) -> Result<TileStore> {
		if uri.starts_with("postgres://") || uri.starts_with("postgresql://") {
			return Ok(TileStore::Pg(PgStore::open(uri, create, timeout).await?));
		}
		if let Some(path) = uri.strip_prefix("mbtiles://") {
			return Ok(TileStore::MBTiles(MBTilesStore::open(Path::new(path), create, timeout)?));
		}
		if let Some(path) = uri.strip_prefix("xyz://") {
			return Ok(TileStore::Xyz(XyzStore::open(Path::new(path), create, timeout)?));
		}
		if uri.ends_with(".mbtiles") {
			return Ok(TileStore::MBTiles(MBTilesStore::open(Path::new(uri), create, timeout)?));
		}
		Ok(TileStore::Xyz(XyzStore::open(Path::new(uri), create, timeout)?))
	}

	pub fn name(&self) -> &str {
		match self {
			TileStore::MBTiles(store) => store.name(),
			TileStore::Xyz(store) => store.name(),
			TileStore::Pg(store) => store.name(),
		}
	}

	/// Fetches a tile with its sniffed content headers.
	pub async fn get_tile(&self, coord: &TileCoord) -> Result<Option<(Blob, TileHeaders)>> {
		let blob = match self {
			TileStore::MBTiles(store) => store.get_tile(coord).await?,
			TileStore::Xyz(store) => store.get_tile(coord).await?,
			TileStore::Pg(store) => store.get_tile(coord).await?,
		};
		Ok(blob.map(|blob| {
			let headers = TileHeaders::from_payload(&blob);
			(blob, headers)
		}))
	}

	/// Writes a tile. With `store_transparent` unset, fully transparent
	/// PNGs are silently dropped; the return value tells whether the tile
	/// was written.
	pub async fn put_tile(&self, coord: &TileCoord, blob: &Blob, store_transparent: bool) -> Result<bool> {
		if !store_transparent
			&& TileFormat::from_bytes(blob.as_slice()) == TileFormat::PNG
			&& is_fully_transparent_png(blob)
		{
			debug!("dropping fully transparent tile {coord}");
			return Ok(false);
		}

		match self {
			TileStore::MBTiles(store) => store.put_tile(coord, blob).await?,
			TileStore::Xyz(store) => store.put_tile(coord, blob).await?,
			TileStore::Pg(store) => store.put_tile(coord, blob).await?,
		}
		Ok(true)
	}

	pub async fn delete_tile(&self, coord: &TileCoord) -> Result<bool> {
		match self {
			TileStore::MBTiles(store) => store.delete_tile(coord).await,
			TileStore::Xyz(store) => store.delete_tile(coord).await,
			TileStore::Pg(store) => store.delete_tile(coord).await,
		}
	}

	pub async fn tile_hash(&self, coord: &TileCoord) -> Result<Option<String>> {
		match self {
			TileStore::MBTiles(store) => store.tile_hash(coord).await,
			TileStore::Xyz(store) => store.tile_hash(coord).await,
			TileStore::Pg(store) => store.tile_hash(coord).await,
		}
	}

	pub async fn tile_created(&self, coord: &TileCoord) -> Result<Option<i64>> {
		match self {
			TileStore::MBTiles(store) => store.tile_created(coord).await,
			TileStore::Xyz(store) => store.tile_created(coord).await,
			TileStore::Pg(store) => store.tile_created(coord).await,
		}
	}

	pub async fn hashes_for_coverage(&self, coverages: &[Coverage]) -> Result<HashMap<String, String>> {
		match self {
			TileStore::MBTiles(store) => store.hashes_for_coverage(coverages).await,
			TileStore::Xyz(store) => store.hashes_for_coverage(coverages).await,
			TileStore::Pg(store) => store.hashes_for_coverage(coverages).await,
		}
	}

	pub async fn created_for_coverage(&self, coverages: &[Coverage]) -> Result<HashMap<String, i64>> {
		match self {
			TileStore::MBTiles(store) => store.created_for_coverage(coverages).await,
			TileStore::Xyz(store) => store.created_for_coverage(coverages).await,
			TileStore::Pg(store) => store.created_for_coverage(coverages).await,
		}
	}

	/// Collects one freshness column over all tiles within `coverages`.
	pub async fn extra_info_for_coverage(&self, coverages: &[Coverage], mode: CoverageInfoMode) -> Result<CoverageInfo> {
		Ok(match mode {
			CoverageInfoMode::Hash => CoverageInfo::Hashes(self.hashes_for_coverage(coverages).await?),
			CoverageInfoMode::Created => CoverageInfo::Created(self.created_for_coverage(coverages).await?),
		})
	}

	pub async fn get_metadata(&self) -> Result<ArchiveMetadata> {
		match self {
			TileStore::MBTiles(store) => store.get_metadata().await,
			TileStore::Xyz(store) => store.get_metadata().await,
			TileStore::Pg(store) => store.get_metadata().await,
		}
	}

	pub async fn update_metadata(&self, patch: &ArchiveMetadata) -> Result<()> {
		match self {
			TileStore::MBTiles(store) => store.update_metadata(patch).await,
			TileStore::Xyz(store) => store.update_metadata(patch).await,
			TileStore::Pg(store) => store.update_metadata(patch).await,
		}
	}

	pub async fn count(&self) -> Result<u64> {
		match self {
			TileStore::MBTiles(store) => store.count().await,
			TileStore::Xyz(store) => store.count().await,
			TileStore::Pg(store) => store.count().await,
		}
	}

	pub async fn size(&self) -> Result<u64> {
		match self {
			TileStore::MBTiles(store) => store.size().await,
			TileStore::Xyz(store) => store.size().await,
			TileStore::Pg(store) => store.size().await,
		}
	}

	/// Backend-specific housekeeping after a bulk operation: the XYZ store
	/// prunes directories left without tile files, the others do nothing.
	pub async fn post_bulk_cleanup(&self) -> Result<()> {
		match self {
			TileStore::Xyz(store) => store.prune_empty_dirs().await,
			TileStore::MBTiles(_) | TileStore::Pg(_) => Ok(()),
		}
	}

	pub fn close(self) {
		match self {
			TileStore::MBTiles(store) => store.close(),
			TileStore::Xyz(store) => store.close(),
			TileStore::Pg(store) => store.close(),
		}
	}
}

impl std::fmt::Debug for TileStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			TileStore::MBTiles(store) => store.fmt(f),
			TileStore::Xyz(store) => store.fmt(f),
			TileStore::Pg(store) => store.fmt(f),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::{ImageFormat, Rgba, RgbaImage};
	use std::io::Cursor;

	fn encode_png(pixel: Rgba<u8>) -> Blob {
		let img = RgbaImage::from_pixel(1, 1, pixel);
		let mut bytes = Cursor::new(Vec::new());
		img.write_to(&mut bytes, ImageFormat::Png).unwrap();
		Blob::from(bytes.into_inner())
	}

	async fn open_temp(dir: &assert_fs::TempDir, name: &str) -> TileStore {
		let uri = dir.path().join(name).to_string_lossy().to_string();
		TileStore::open(&uri, true, Duration::from_secs(5)).await.unwrap()
	}

	#[tokio::test]
	async fn open_dispatches_on_uri() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;

		let store = open_temp(&dir, "a.mbtiles").await;
		assert!(matches!(store, TileStore::MBTiles(_)));

		let store = open_temp(&dir, "tiles").await;
		assert!(matches!(store, TileStore::Xyz(_)));

		let uri = format!("mbtiles://{}", dir.path().join("b.mbtiles").display());
		let store = TileStore::open(&uri, true, Duration::from_secs(5)).await?;
		assert!(matches!(store, TileStore::MBTiles(_)));
		Ok(())
	}

	#[tokio::test]
	async fn transparent_png_is_dropped() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let store = open_temp(&dir, "a.mbtiles").await;
		let coord = TileCoord::new(1, 0, 0)?;

		let transparent = encode_png(Rgba([0, 0, 0, 0]));
		assert!(!store.put_tile(&coord, &transparent, false).await?);
		assert!(store.get_tile(&coord).await?.is_none());

		// with store_transparent set, the same payload is written
		assert!(store.put_tile(&coord, &transparent, true).await?);
		assert!(store.get_tile(&coord).await?.is_some());
		Ok(())
	}

	#[tokio::test]
	async fn opaque_png_is_written() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let store = open_temp(&dir, "a.mbtiles").await;
		let coord = TileCoord::new(1, 0, 0)?;

		let opaque = encode_png(Rgba([10, 20, 30, 255]));
		assert!(store.put_tile(&coord, &opaque, false).await?);

		let (blob, headers) = store.get_tile(&coord).await?.unwrap();
		assert_eq!(blob, opaque);
		assert_eq!(headers.content_type, "image/png");
		assert_eq!(headers.content_encoding, None);
		Ok(())
	}

	#[tokio::test]
	async fn pbf_headers_carry_encoding() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let store = open_temp(&dir, "a.mbtiles").await;
		let coord = TileCoord::new(1, 0, 0)?;

		let gzipped = tileforge_core::utils::compress_gzip(&Blob::from("not really a pbf"))?;
		store.put_tile(&coord, &gzipped, true).await?;

		let (_, headers) = store.get_tile(&coord).await?.unwrap();
		assert_eq!(headers.content_type, "application/x-protobuf");
		assert_eq!(headers.content_encoding.as_deref(), Some("gzip"));
		Ok(())
	}

	#[tokio::test]
	async fn extra_info_modes() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let store = open_temp(&dir, "a.mbtiles").await;
		let coord = TileCoord::new(1, 0, 0)?;
		store.put_tile(&coord, &Blob::from("x"), true).await?;

		let coverage = Coverage::new_bbox(1, tileforge_core::GeoBBox::new_mercator_world())?;
		match store.extra_info_for_coverage(&[coverage], CoverageInfoMode::Hash).await? {
			CoverageInfo::Hashes(map) => assert!(map.contains_key("1/0/0")),
			CoverageInfo::Created(_) => panic!("expected hashes"),
		}
		match store
			.extra_info_for_coverage(&[coverage], CoverageInfoMode::Created)
			.await?
		{
			CoverageInfo::Created(map) => assert!(map.get("1/0/0").copied().unwrap() > 0),
			CoverageInfo::Hashes(_) => panic!("expected created stamps"),
		}
		Ok(())
	}
}
