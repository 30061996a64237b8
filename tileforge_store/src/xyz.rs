//! The XYZ backend: one file per tile, plus a sibling hash index.
//!
//! Tiles live at `<root>/<z>/<x>/<y>.<format>` in the `XYZ` scheme. A
//! SQLite index at `<root>/<basename>.sqlite` mirrors the `hash` and
//! `created` columns keyed by `(z, x, y)`, so freshness checks never have
//! to hash tile files. Writes follow the lock-file protocol: take
//! `<file>.lock` exclusively, write `<file>.tmp`, rename into place,
//! release. After a bulk delete a post-pass removes directories that no
//! longer contain any tile files.

use crate::metadata::ArchiveMetadata;
use anyhow::{Context, Result, ensure};
use log::trace;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use r2d2_sqlite::rusqlite::{self, OptionalExtension, params};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tileforge_core::utils::{delete_file_locked, md5_hex, now_ms, write_file_locked};
use tileforge_core::{Blob, Coverage, TileCoord, TileFormat};

const TILE_EXTENSIONS: [&str; 6] = ["gif", "png", "jpg", "jpeg", "webp", "pbf"];
const PRUNE_EXTENSIONS: [&str; 5] = ["gif", "png", "jpg", "jpeg", "webp"];

/// A directory-per-tile store with a sibling SQLite index.
pub struct XyzStore {
	name: String,
	root: PathBuf,
	index: Pool<SqliteConnectionManager>,
	timeout: Duration,
}

impl XyzStore {
	/// Opens an XYZ tile directory, creating it (and the index DB) when
	/// `create` is set.
	pub fn open(root: &Path, create: bool, timeout: Duration) -> Result<XyzStore> {
		trace!("open xyz store {root:?} (create: {create})");

		if create {
			fs::create_dir_all(root).with_context(|| format!("failed to create directory {root:?}"))?;
		} else {
			ensure!(root.is_dir(), "tile directory {root:?} does not exist");
		}

		let basename = root
			.file_name()
			.and_then(|n| n.to_str())
			.unwrap_or("tiles")
			.to_string();
		let index_path = root.join(format!("{basename}.sqlite"));

		let manager = SqliteConnectionManager::file(&index_path).with_init(|conn| {
			conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
			conn.busy_timeout(std::time::Duration::from_secs(10))?;
			Ok(())
		});
		let index = Pool::builder()
			.max_size(10)
			.build(manager)
			.with_context(|| format!("failed to open index db {index_path:?}"))?;

		{
			let conn = index.get()?;
			conn
				.execute_batch(
					"CREATE TABLE IF NOT EXISTS metadata (name TEXT PRIMARY KEY, value TEXT NOT NULL);
					CREATE TABLE IF NOT EXISTS tiles (
						zoom_level INTEGER NOT NULL,
						tile_column INTEGER NOT NULL,
						tile_row INTEGER NOT NULL,
						hash TEXT,
						created INTEGER,
						PRIMARY KEY (zoom_level, tile_column, tile_row)
					);",
				)
				.context("failed to create index schema")?;
		}

		Ok(XyzStore {
			name: root.to_string_lossy().to_string(),
			root: root.to_path_buf(),
			index,
			timeout,
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	fn tile_path(&self, coord: &TileCoord, format: TileFormat) -> PathBuf {
		self
			.root
			.join(coord.z.to_string())
			.join(coord.x.to_string())
			.join(format!("{}{}", coord.y, format.extension()))
	}

	/// Finds the file backing `coord`, trying the archive's declared format
	/// first and falling back to the known tile extensions.
	fn find_tile_path(&self, coord: &TileCoord) -> Option<PathBuf> {
		let dir = self.root.join(coord.z.to_string()).join(coord.x.to_string());
		for ext in TILE_EXTENSIONS {
			let path = dir.join(format!("{}.{ext}", coord.y));
			if path.is_file() {
				return Some(path);
			}
		}
		None
	}

	pub async fn get_tile(&self, coord: &TileCoord) -> Result<Option<Blob>> {
		trace!("get tile {coord}");
		let Some(path) = self.find_tile_path(coord) else {
			return Ok(None);
		};
		let data = fs::read(&path).with_context(|| format!("failed to read {path:?}"))?;
		Ok(Some(Blob::from(data)))
	}

	/// Writes the tile file under the lock-file protocol and upserts the
	/// index row.
	pub async fn put_tile(&self, coord: &TileCoord, blob: &Blob) -> Result<()> {
		trace!("put tile {coord} ({} bytes)", blob.len());
		ensure!(!blob.is_empty(), "refusing to store empty tile {coord}");

		let format = TileFormat::from_bytes(blob.as_slice());
		let path = self.tile_path(coord, format);

		// a format change replaces the file, so drop any stale sibling
		if let Some(existing) = self.find_tile_path(coord) {
			if existing != path {
				delete_file_locked(&existing, self.timeout).await?;
			}
		}

		write_file_locked(&path, blob.as_slice(), self.timeout).await?;

		let hash = md5_hex(blob);
		let created = now_ms();
		let conn = self.index.get()?;
		conn.execute(
			"INSERT INTO tiles (zoom_level, tile_column, tile_row, hash, created)
			VALUES (?1, ?2, ?3, ?4, ?5)
			ON CONFLICT (zoom_level, tile_column, tile_row)
			DO UPDATE SET hash = ?4, created = ?5",
			params![coord.z, coord.x, coord.y, hash, created],
		)?;
		Ok(())
	}

	/// Returns `true` if a tile file was deleted.
	pub async fn delete_tile(&self, coord: &TileCoord) -> Result<bool> {
		trace!("delete tile {coord}");

		let deleted = match self.find_tile_path(coord) {
			Some(path) => delete_file_locked(&path, self.timeout).await?,
			None => false,
		};

		let conn = self.index.get()?;
		conn.execute(
			"DELETE FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
			params![coord.z, coord.x, coord.y],
		)?;
		Ok(deleted)
	}

	pub async fn tile_hash(&self, coord: &TileCoord) -> Result<Option<String>> {
		let conn = self.index.get()?;
		let hash: Option<Option<String>> = conn
			.query_row(
				"SELECT hash FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
				params![coord.z, coord.x, coord.y],
				|row| row.get(0),
			)
			.optional()?;
		Ok(hash.flatten())
	}

	pub async fn tile_created(&self, coord: &TileCoord) -> Result<Option<i64>> {
		let conn = self.index.get()?;
		let created: Option<Option<i64>> = conn
			.query_row(
				"SELECT created FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
				params![coord.z, coord.x, coord.y],
				|row| row.get(0),
			)
			.optional()?;
		Ok(created.flatten())
	}

	pub async fn hashes_for_coverage(&self, coverages: &[Coverage]) -> Result<HashMap<String, String>> {
		self.collect_column(coverages, "hash")
	}

	pub async fn created_for_coverage(&self, coverages: &[Coverage]) -> Result<HashMap<String, i64>> {
		self.collect_column(coverages, "created")
	}

	fn collect_column<T: rusqlite::types::FromSql>(
		&self,
		coverages: &[Coverage],
		column: &str,
	) -> Result<HashMap<String, T>> {
		let conn = self.index.get()?;
		let mut result = HashMap::new();

		for coverage in coverages {
			let bbox = coverage.to_tile_bbox();
			let sql = format!(
				"SELECT tile_column, tile_row, {column} FROM tiles
				WHERE zoom_level = ?1 AND tile_column BETWEEN ?2 AND ?3
				AND tile_row BETWEEN ?4 AND ?5 AND {column} IS NOT NULL"
			);
			let mut stmt = conn.prepare(&sql)?;
			let rows = stmt.query_map(
				params![bbox.z, bbox.x_min, bbox.x_max, bbox.y_min, bbox.y_max],
				|row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?, row.get::<_, T>(2)?)),
			)?;

			for row in rows {
				let (x, y, value) = row?;
				result.insert(TileCoord::new(bbox.z, x, y)?.key(), value);
			}
		}

		Ok(result)
	}

	pub async fn get_metadata(&self) -> Result<ArchiveMetadata> {
		let conn = self.index.get()?;
		let mut stmt = conn.prepare("SELECT name, value FROM metadata")?;
		let entries = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

		let mut meta = ArchiveMetadata::new();
		for entry in entries {
			let (name, value) = entry?;
			meta.set(&name, &value);
		}
		meta.derive_center();
		Ok(meta)
	}

	pub async fn update_metadata(&self, patch: &ArchiveMetadata) -> Result<()> {
		let conn = self.index.get()?;
		for (name, value) in patch.iter() {
			conn.execute(
				"INSERT INTO metadata (name, value) VALUES (?1, ?2)
				ON CONFLICT (name) DO UPDATE SET value = ?2",
				params![name, value],
			)?;
		}
		Ok(())
	}

	pub async fn count(&self) -> Result<u64> {
		let conn = self.index.get()?;
		Ok(conn.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get::<_, i64>(0))? as u64)
	}

	/// Total size in bytes of all tile files plus the index DB.
	pub async fn size(&self) -> Result<u64> {
		fn dir_size(dir: &Path) -> Result<u64> {
			let mut total = 0;
			for entry in fs::read_dir(dir)? {
				let entry = entry?;
				let meta = entry.metadata()?;
				if meta.is_dir() {
					total += dir_size(&entry.path())?;
				} else {
					total += meta.len();
				}
			}
			Ok(total)
		}
		dir_size(&self.root)
	}

	/// Removes directories whose descendants contain no tile image files.
	/// Run after bulk deletes.
	pub async fn prune_empty_dirs(&self) -> Result<()> {
		prune_dir(&self.root, true)?;
		Ok(())
	}

	pub fn close(self) {
		trace!("close xyz store {}", self.name);
	}
}

/// Depth-first prune. Returns `true` if `dir` contains any file matching
/// the tile image extensions (directly or below).
fn prune_dir(dir: &Path, is_root: bool) -> Result<bool> {
	let mut has_tiles = false;

	for entry in fs::read_dir(dir).with_context(|| format!("failed to read directory {dir:?}"))? {
		let entry = entry?;
		let path = entry.path();
		if path.is_dir() {
			if prune_dir(&path, false)? {
				has_tiles = true;
			}
		} else if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
			if PRUNE_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
				has_tiles = true;
			}
		}
	}

	if !has_tiles && !is_root {
		// non-tile leftovers (.lock, .tmp) go with the directory
		fs::remove_dir_all(dir).with_context(|| format!("failed to remove directory {dir:?}"))?;
	}
	Ok(has_tiles)
}

impl std::fmt::Debug for XyzStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("XyzStore").field("name", &self.name).finish()
	}
}
