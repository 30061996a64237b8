//! The MBTiles backend: a single-file SQLite tile archive.
//!
//! The on-disk layout is byte-compatible with the MBTiles convention: a
//! `metadata` key/value table and a `tiles` table keyed by
//! `(zoom_level, tile_column, tile_row)` with `tile_row` in the `TMS`
//! scheme. Two extra columns, `hash` (MD5 of `tile_data`) and `created`
//! (wall-clock ms of the last write), are added by an idempotent migration
//! on older archives. All methods take and return `XYZ` coordinates; the
//! `TMS` conversion happens only inside this module.
//!
//! Writes are single-statement upserts, so each tile write is atomic and
//! idempotent. The archive is opened in WAL mode; `SQLITE_BUSY` is retried
//! in ~50 ms steps until the store's timeout expires.

use crate::metadata::{ArchiveMetadata, vector_layer_names, vector_layers_json};
use anyhow::{Context, Result, bail, ensure};
use log::trace;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use r2d2_sqlite::rusqlite::{self, OptionalExtension, params};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tileforge_core::utils::{decompress_if_needed, md5_hex, now_ms};
use tileforge_core::{Blob, Coverage, TileBBox, TileCoord, TileFormat, TileScheme};

const BUSY_POLL_MS: u64 = 50;
const HASH_BATCH_SIZE: u32 = 256;
const LAYER_SCAN_LIMIT: u32 = 64;

/// A single-file SQLite tile archive.
pub struct MBTilesStore {
	name: String,
	path: PathBuf,
	pool: Pool<SqliteConnectionManager>,
	timeout: Duration,
}

impl MBTilesStore {
	/// Opens an MBTiles archive, creating file and schema when `create` is
	/// set. `timeout` bounds every `SQLITE_BUSY` retry loop.
	pub fn open(path: &Path, create: bool, timeout: Duration) -> Result<MBTilesStore> {
		trace!("open mbtiles {path:?} (create: {create})");

		if !create {
			ensure!(path.exists(), "mbtiles file {path:?} does not exist");
		} else if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).with_context(|| format!("failed to create directory {parent:?}"))?;
		}

		let manager = SqliteConnectionManager::file(path).with_init(|conn| {
			conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
			Ok(())
		});
		let pool = Pool::builder()
			.max_size(10)
			.build(manager)
			.with_context(|| format!("failed to open mbtiles file {path:?}"))?;

		let store = MBTilesStore {
			name: path.to_string_lossy().to_string(),
			path: path.to_path_buf(),
			pool,
			timeout,
		};

		if create {
			store.create_schema()?;
		}
		store.migrate_columns()?;

		Ok(store)
	}

	/// The archive's path as a display name.
	pub fn name(&self) -> &str {
		&self.name
	}

	fn create_schema(&self) -> Result<()> {
		let conn = self.pool.get()?;
		conn
			.execute_batch(
				"CREATE TABLE IF NOT EXISTS metadata (name TEXT PRIMARY KEY, value TEXT NOT NULL);
				CREATE TABLE IF NOT EXISTS tiles (
					zoom_level INTEGER NOT NULL,
					tile_column INTEGER NOT NULL,
					tile_row INTEGER NOT NULL,
					tile_data BLOB NOT NULL,
					hash TEXT,
					created INTEGER,
					PRIMARY KEY (zoom_level, tile_column, tile_row)
				);",
			)
			.context("failed to create mbtiles schema")?;
		Ok(())
	}

	/// Adds the `hash` and `created` columns to archives that predate them.
	/// Existing rows keep NULL until the next write or a
	/// [`recompute_missing_hashes`](Self::recompute_missing_hashes) run.
	fn migrate_columns(&self) -> Result<()> {
		let conn = self.pool.get()?;

		let tiles_exists: bool = conn
			.query_row(
				"SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'tiles'",
				[],
				|row| row.get::<_, i64>(0),
			)
			.map(|n| n > 0)?;
		if !tiles_exists {
			return Ok(());
		}

		let mut stmt = conn.prepare("PRAGMA table_info(tiles)")?;
		let columns: BTreeSet<String> = stmt
			.query_map([], |row| row.get::<_, String>(1))?
			.collect::<rusqlite::Result<_>>()?;

		if !columns.contains("hash") {
			conn.execute("ALTER TABLE tiles ADD COLUMN hash TEXT", [])?;
		}
		if !columns.contains("created") {
			conn.execute("ALTER TABLE tiles ADD COLUMN created INTEGER", [])?;
		}
		Ok(())
	}

	/// Runs `op`, retrying while SQLite reports a locked database, until
	/// the store timeout expires.
	async fn with_busy_retry<T>(&self, op: impl Fn(&rusqlite::Connection) -> rusqlite::Result<T>) -> Result<T> {
		let deadline = tokio::time::Instant::now() + self.timeout;
		loop {
			let conn = self.pool.get()?;
			match op(&conn) {
				Ok(value) => return Ok(value),
				Err(rusqlite::Error::SqliteFailure(error, message))
					if matches!(
						error.code,
						rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
					) =>
				{
					if tokio::time::Instant::now() >= deadline {
						bail!("database {} stayed busy for {:?}: {message:?}", self.name, self.timeout);
					}
					tokio::time::sleep(Duration::from_millis(BUSY_POLL_MS)).await;
				}
				Err(error) => return Err(error).with_context(|| format!("query failed on {}", self.name)),
			}
		}
	}

	fn tms_row(coord: &TileCoord) -> u32 {
		coord.y_in_scheme(TileScheme::TMS)
	}

	pub async fn get_tile(&self, coord: &TileCoord) -> Result<Option<Blob>> {
		trace!("get tile {coord}");
		let conn = self.pool.get()?;
		let data: Option<Vec<u8>> = conn
			.query_row(
				"SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
				params![coord.z, coord.x, Self::tms_row(coord)],
				|row| row.get(0),
			)
			.optional()?;
		Ok(data.map(Blob::from))
	}

	/// Upserts a tile: `data`, `hash = MD5(data)`, `created = now`.
	pub async fn put_tile(&self, coord: &TileCoord, blob: &Blob) -> Result<()> {
		trace!("put tile {coord} ({} bytes)", blob.len());
		ensure!(!blob.is_empty(), "refusing to store empty tile {coord}");

		let hash = md5_hex(blob);
		let created = now_ms();
		let row = Self::tms_row(coord);

		self
			.with_busy_retry(move |conn| {
				conn.execute(
					"INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data, hash, created)
					VALUES (?1, ?2, ?3, ?4, ?5, ?6)
					ON CONFLICT (zoom_level, tile_column, tile_row)
					DO UPDATE SET tile_data = ?4, hash = ?5, created = ?6",
					params![coord.z, coord.x, row, blob.as_slice(), hash, created],
				)
			})
			.await?;
		Ok(())
	}

	/// Returns `true` if a tile was deleted.
	pub async fn delete_tile(&self, coord: &TileCoord) -> Result<bool> {
		trace!("delete tile {coord}");
		let coord = *coord;
		let changed = self
			.with_busy_retry(move |conn| {
				conn.execute(
					"DELETE FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
					params![coord.z, coord.x, Self::tms_row(&coord)],
				)
			})
			.await?;
		Ok(changed > 0)
	}

	pub async fn tile_hash(&self, coord: &TileCoord) -> Result<Option<String>> {
		let conn = self.pool.get()?;
		let hash: Option<Option<String>> = conn
			.query_row(
				"SELECT hash FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
				params![coord.z, coord.x, Self::tms_row(coord)],
				|row| row.get(0),
			)
			.optional()?;
		Ok(hash.flatten())
	}

	pub async fn tile_created(&self, coord: &TileCoord) -> Result<Option<i64>> {
		let conn = self.pool.get()?;
		let created: Option<Option<i64>> = conn
			.query_row(
				"SELECT created FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
				params![coord.z, coord.x, Self::tms_row(coord)],
				|row| row.get(0),
			)
			.optional()?;
		Ok(created.flatten())
	}

	/// Collects the non-null hashes of all stored tiles within `coverages`,
	/// keyed by `"z/x/y"`.
	pub async fn hashes_for_coverage(&self, coverages: &[Coverage]) -> Result<HashMap<String, String>> {
		self.collect_column(coverages, "hash").await
	}

	/// Collects the non-null `created` stamps of all stored tiles within
	/// `coverages`, keyed by `"z/x/y"`.
	pub async fn created_for_coverage(&self, coverages: &[Coverage]) -> Result<HashMap<String, i64>> {
		self.collect_column(coverages, "created").await
	}

	async fn collect_column<T: rusqlite::types::FromSql>(
		&self,
		coverages: &[Coverage],
		column: &str,
	) -> Result<HashMap<String, T>> {
		let conn = self.pool.get()?;
		let mut result = HashMap::new();

		for coverage in coverages {
			let bbox = coverage.to_tile_bbox();
			let row_min = TileScheme::flip_y(bbox.z, bbox.y_max);
			let row_max = TileScheme::flip_y(bbox.z, bbox.y_min);

			let sql = format!(
				"SELECT tile_column, tile_row, {column} FROM tiles
				WHERE zoom_level = ?1 AND tile_column BETWEEN ?2 AND ?3
				AND tile_row BETWEEN ?4 AND ?5 AND {column} IS NOT NULL"
			);
			let mut stmt = conn.prepare(&sql)?;
			let rows = stmt.query_map(params![bbox.z, bbox.x_min, bbox.x_max, row_min, row_max], |row| {
				Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?, row.get::<_, T>(2)?))
			})?;

			for row in rows {
				let (x, tms_y, value) = row?;
				let coord = TileCoord::from_scheme(bbox.z, x, tms_y, TileScheme::TMS)?;
				result.insert(coord.key(), value);
			}
		}

		Ok(result)
	}

	/// Fills in missing `hash` values, 256 rows per transaction, and
	/// returns the number of rows updated.
	pub async fn recompute_missing_hashes(&self) -> Result<u64> {
		let mut updated = 0u64;

		loop {
			let batch = self
				.with_busy_retry(|conn| {
					let mut stmt = conn.prepare(
						"SELECT zoom_level, tile_column, tile_row, tile_data FROM tiles WHERE hash IS NULL LIMIT ?1",
					)?;
					let rows = stmt.query_map([HASH_BATCH_SIZE], |row| {
						Ok((
							row.get::<_, u8>(0)?,
							row.get::<_, u32>(1)?,
							row.get::<_, u32>(2)?,
							row.get::<_, Vec<u8>>(3)?,
						))
					})?;
					rows.collect::<rusqlite::Result<Vec<_>>>()
				})
				.await?;

			if batch.is_empty() {
				return Ok(updated);
			}

			let hashes: Vec<(u8, u32, u32, String)> = batch
				.into_iter()
				.map(|(z, x, row, data)| (z, x, row, md5_hex(&Blob::from(data))))
				.collect();

			updated += self
				.with_busy_retry(move |conn| {
					let mut changed = 0u64;
					for (z, x, row, hash) in &hashes {
						changed += conn.execute(
							"UPDATE tiles SET hash = ?4 WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
							params![z, x, row, hash],
						)? as u64;
					}
					Ok(changed)
				})
				.await?;
		}
	}

	/// Reads the metadata table and fills in the derivable keys: zoom range
	/// and bounds from the stored tiles, center from bounds, vector layers
	/// by scanning `pbf` payloads.
	pub async fn get_metadata(&self) -> Result<ArchiveMetadata> {
		let conn = self.pool.get()?;
		let mut stmt = conn.prepare("SELECT name, value FROM metadata")?;
		let entries = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

		let mut meta = ArchiveMetadata::new();
		for entry in entries {
			let (name, value) = entry?;
			meta.set(&name, &value);
		}
		drop(stmt);

		let zoom_range: Option<(u8, u8)> = conn
			.query_row("SELECT MIN(zoom_level), MAX(zoom_level) FROM tiles", [], |row| {
				Ok((row.get::<_, Option<u8>>(0)?, row.get::<_, Option<u8>>(1)?))
			})
			.optional()?
			.and_then(|(min, max)| Some((min?, max?)));

		if let Some((minzoom, maxzoom)) = zoom_range {
			if !meta.contains("minzoom") {
				meta.set("minzoom", &minzoom.to_string());
			}
			if !meta.contains("maxzoom") {
				meta.set("maxzoom", &maxzoom.to_string());
			}
			if !meta.contains("bounds") {
				if let Some(bounds) = self.derive_bounds(&conn, minzoom, maxzoom)? {
					meta.set_bounds(&bounds);
				}
			}
		}

		meta.derive_center();

		if meta.tile_format() == Some(TileFormat::PBF) && !meta.contains("vector_layers") {
			let names = self.scan_vector_layers(&conn)?;
			if !names.is_empty() {
				meta.set("vector_layers", &vector_layers_json(&names));
			}
		}

		Ok(meta)
	}

	/// Bounds derivation: union of the observed tile extents per zoom level.
	fn derive_bounds(&self, conn: &rusqlite::Connection, minzoom: u8, maxzoom: u8) -> Result<Option<tileforge_core::GeoBBox>> {
		let mut bounds: Option<tileforge_core::GeoBBox> = None;

		for z in minzoom..=maxzoom {
			let extent: Option<(u32, u32, u32, u32)> = conn
				.query_row(
					"SELECT MIN(tile_column), MAX(tile_column), MIN(tile_row), MAX(tile_row)
					FROM tiles WHERE zoom_level = ?1",
					[z],
					|row| {
						Ok((
							row.get::<_, Option<u32>>(0)?,
							row.get::<_, Option<u32>>(1)?,
							row.get::<_, Option<u32>>(2)?,
							row.get::<_, Option<u32>>(3)?,
						))
					},
				)
				.optional()?
				.and_then(|(a, b, c, d)| Some((a?, b?, c?, d?)));

			let Some((x_min, x_max, row_min, row_max)) = extent else {
				continue;
			};

			// rows are TMS on disk; flipping swaps min and max
			let bbox = TileBBox::new(
				z,
				x_min,
				TileScheme::flip_y(z, row_max),
				x_max,
				TileScheme::flip_y(z, row_min),
			)?
			.to_geo_bbox();

			match &mut bounds {
				Some(total) => total.extend(&bbox),
				None => bounds = Some(bbox),
			}
		}

		Ok(bounds)
	}

	fn scan_vector_layers(&self, conn: &rusqlite::Connection) -> Result<Vec<String>> {
		let mut stmt =
			conn.prepare("SELECT tile_data FROM tiles ORDER BY zoom_level DESC, tile_column, tile_row LIMIT ?1")?;
		let rows = stmt.query_map([LAYER_SCAN_LIMIT], |row| row.get::<_, Vec<u8>>(0))?;

		let mut names: Vec<String> = Vec::new();
		for row in rows {
			let blob = decompress_if_needed(Blob::from(row?))?;
			for name in vector_layer_names(&blob)? {
				if !names.contains(&name) {
					names.push(name);
				}
			}
		}
		Ok(names)
	}

	/// Merges `patch` into the metadata table.
	pub async fn update_metadata(&self, patch: &ArchiveMetadata) -> Result<()> {
		let entries: Vec<(String, String)> = patch.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
		self
			.with_busy_retry(move |conn| {
				for (name, value) in &entries {
					conn.execute(
						"INSERT INTO metadata (name, value) VALUES (?1, ?2)
						ON CONFLICT (name) DO UPDATE SET value = ?2",
						params![name, value],
					)?;
				}
				Ok(())
			})
			.await
	}

	pub async fn vacuum(&self) -> Result<()> {
		self.with_busy_retry(|conn| conn.execute("VACUUM", []).map(|_| ())).await
	}

	pub async fn count(&self) -> Result<u64> {
		let conn = self.pool.get()?;
		Ok(conn.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get::<_, i64>(0))? as u64)
	}

	/// Archive size in bytes (the file length).
	pub async fn size(&self) -> Result<u64> {
		Ok(std::fs::metadata(&self.path)?.len())
	}

	pub fn close(self) {
		trace!("close mbtiles {}", self.name);
	}
}

impl std::fmt::Debug for MBTilesStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MBTilesStore").field("name", &self.name).finish()
	}
}
