//! The archive registry: every id a style document may reference.
//!
//! Styles point at local resources through pseudo-URLs
//! (`mbtiles://<id>/...`, `sprites://<id>/...`, `fonts://<id>/...`,
//! `geojson://<group>/<layer>`); the registry maps those ids to opened
//! stores, cacheable resource origins and inline data. Validation checks
//! ids against it, the resolver reads through it.

use crate::resources::ResourceOrigin;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tileforge_core::{Blob, TileCoord, TileFormat};
use tileforge_store::{MBTilesStore, PgStore, XyzStore};

/// A registered tile archive of any backend.
#[derive(Clone)]
pub enum TileArchive {
	MBTiles(Arc<MBTilesStore>),
	Xyz(Arc<XyzStore>),
	Pg(Arc<PgStore>),
}

impl TileArchive {
	pub fn scheme(&self) -> &'static str {
		match self {
			TileArchive::MBTiles(_) => "mbtiles",
			TileArchive::Xyz(_) => "xyz",
			TileArchive::Pg(_) => "pg",
		}
	}

	pub async fn get_tile(&self, coord: &TileCoord) -> Result<Option<Blob>> {
		match self {
			TileArchive::MBTiles(store) => store.get_tile(coord).await,
			TileArchive::Xyz(store) => store.get_tile(coord).await,
			TileArchive::Pg(store) => store.get_tile(coord).await,
		}
	}

	/// The archive's tile format from its metadata; `png` if unspecified.
	pub async fn tile_format(&self) -> Result<TileFormat> {
		let meta = match self {
			TileArchive::MBTiles(store) => store.get_metadata().await?,
			TileArchive::Xyz(store) => store.get_metadata().await?,
			TileArchive::Pg(store) => store.get_metadata().await?,
		};
		Ok(meta.tile_format().unwrap_or(TileFormat::PNG))
	}
}

/// A GeoJSON layer: inline data, a cacheable origin, or both.
#[derive(Clone, Debug, Default)]
pub struct GeoJsonEntry {
	pub inline: Option<Blob>,
	pub origin: Option<ResourceOrigin>,
}

/// All ids a style may reference, grouped by pseudo-URL scheme.
#[derive(Default)]
pub struct ArchiveRegistry {
	mbtiles: HashMap<String, Arc<MBTilesStore>>,
	xyz: HashMap<String, Arc<XyzStore>>,
	pg: HashMap<String, Arc<PgStore>>,
	pmtiles: HashSet<String>,
	sprites: HashMap<String, Option<ResourceOrigin>>,
	fonts: HashMap<String, Option<ResourceOrigin>>,
	geojson: HashMap<String, HashMap<String, GeoJsonEntry>>,
}

impl ArchiveRegistry {
	pub fn new() -> ArchiveRegistry {
		ArchiveRegistry::default()
	}

	pub fn register_mbtiles(&mut self, id: &str, store: Arc<MBTilesStore>) {
		self.mbtiles.insert(id.to_string(), store);
	}

	pub fn register_xyz(&mut self, id: &str, store: Arc<XyzStore>) {
		self.xyz.insert(id.to_string(), store);
	}

	pub fn register_pg(&mut self, id: &str, store: Arc<PgStore>) {
		self.pg.insert(id.to_string(), store);
	}

	/// PMTiles archives are known by id for validation, but reading them
	/// requires an external archive reader.
	pub fn register_pmtiles(&mut self, id: &str) {
		self.pmtiles.insert(id.to_string());
	}

	/// Registers a sprite archive. The origin URL may contain `{name}`,
	/// replaced by the requested file name.
	pub fn register_sprites(&mut self, id: &str, origin: Option<ResourceOrigin>) {
		self.sprites.insert(id.to_string(), origin);
	}

	/// Registers a font archive. The origin URL may contain `{range}`,
	/// replaced by the requested glyph range.
	pub fn register_fonts(&mut self, id: &str, origin: Option<ResourceOrigin>) {
		self.fonts.insert(id.to_string(), origin);
	}

	pub fn register_geojson(&mut self, group: &str, layer: &str, entry: GeoJsonEntry) {
		self
			.geojson
			.entry(group.to_string())
			.or_default()
			.insert(layer.to_string(), entry);
	}

	/// Whether a tile-archive id exists under `scheme`.
	pub fn has_tile_archive(&self, scheme: &str, id: &str) -> bool {
		match scheme {
			"mbtiles" => self.mbtiles.contains_key(id),
			"xyz" => self.xyz.contains_key(id),
			"pg" => self.pg.contains_key(id),
			"pmtiles" => self.pmtiles.contains(id),
			_ => false,
		}
	}

	pub fn tile_archive(&self, scheme: &str, id: &str) -> Option<TileArchive> {
		match scheme {
			"mbtiles" => self.mbtiles.get(id).map(|s| TileArchive::MBTiles(s.clone())),
			"xyz" => self.xyz.get(id).map(|s| TileArchive::Xyz(s.clone())),
			"pg" => self.pg.get(id).map(|s| TileArchive::Pg(s.clone())),
			_ => None,
		}
	}

	pub fn has_sprite(&self, id: &str) -> bool {
		self.sprites.contains_key(id)
	}

	pub fn sprite_origin(&self, id: &str) -> Option<&ResourceOrigin> {
		self.sprites.get(id).and_then(|o| o.as_ref())
	}

	pub fn has_font(&self, id: &str) -> bool {
		self.fonts.contains_key(id)
	}

	pub fn font_origin(&self, id: &str) -> Option<&ResourceOrigin> {
		self.fonts.get(id).and_then(|o| o.as_ref())
	}

	pub fn has_geojson(&self, group: &str, layer: &str) -> bool {
		self.geojson.get(group).is_some_and(|layers| layers.contains_key(layer))
	}

	pub fn geojson_entry(&self, group: &str, layer: &str) -> Option<&GeoJsonEntry> {
		self.geojson.get(group)?.get(layer)
	}

	/// The concrete tile template a style reference to `scheme://<id>`
	/// rewrites to: `<scheme>://<id>/{z}/{x}/{y}.<format>`.
	pub async fn tile_template(&self, scheme: &str, id: &str) -> Result<String> {
		let archive = self
			.tile_archive(scheme, id)
			.with_context(|| format!("unknown {scheme} archive {id:?}"))?;
		let format = archive.tile_format().await?;
		Ok(format!("{scheme}://{id}/{{z}}/{{x}}/{{y}}{}", format.extension()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test]
	async fn registry_lookups() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let store = Arc::new(MBTilesStore::open(
			&dir.path().join("a.mbtiles"),
			true,
			Duration::from_secs(5),
		)?);

		let mut registry = ArchiveRegistry::new();
		registry.register_mbtiles("osm", store);
		registry.register_pmtiles("world");
		registry.register_sprites("base", None);
		registry.register_geojson("overlays", "borders", GeoJsonEntry::default());

		assert!(registry.has_tile_archive("mbtiles", "osm"));
		assert!(!registry.has_tile_archive("xyz", "osm"));
		assert!(registry.has_tile_archive("pmtiles", "world"));
		assert!(registry.has_sprite("base"));
		assert!(!registry.has_font("base"));
		assert!(registry.has_geojson("overlays", "borders"));
		assert!(!registry.has_geojson("overlays", "rivers"));
		Ok(())
	}

	#[tokio::test]
	async fn tile_template_uses_metadata_format() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let store = Arc::new(MBTilesStore::open(
			&dir.path().join("v.mbtiles"),
			true,
			Duration::from_secs(5),
		)?);
		let mut meta = tileforge_store::ArchiveMetadata::new();
		meta.set("format", "pbf");
		store.update_metadata(&meta).await?;

		let mut registry = ArchiveRegistry::new();
		registry.register_mbtiles("vector", store);

		assert_eq!(
			registry.tile_template("mbtiles", "vector").await?,
			"mbtiles://vector/{z}/{x}/{y}.pbf"
		);
		assert!(registry.tile_template("mbtiles", "missing").await.is_err());
		Ok(())
	}
}
