//! Resource resolution for the rasterizer.
//!
//! The rasterizer never touches stores or the network: it posts a
//! [`ResourceRequest`] through its [`ResourceClient`] and a resolver task
//! dispatches on the URL scheme:
//!
//! | scheme | resolution |
//! |---|---|
//! | `mbtiles://`, `xyz://`, `pg://` | the registered tile archive |
//! | `pmtiles://` | unsupported (external archive reader) |
//! | `sprites://` | sprite cache, read-through |
//! | `fonts://` | font cache, fallback glyphs on failure |
//! | `geojson://` | GeoJSON cache or inline data |
//! | `http://`, `https://` | origin fetch; tile and font requests fall back |
//! | `data:` | base64 decode |
//!
//! Payloads whose first bytes carry a gzip or zlib magic are decompressed
//! before they reach the rasterizer.

use crate::registry::ArchiveRegistry;
use crate::resources::{HttpClient, ResourceCache, ResourceOrigin, fallback_glyphs, fallback_tile};
use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use lazy_static::lazy_static;
use log::{trace, warn};
use regex::Regex;
use std::sync::Arc;
use tileforge_core::utils::{decompress_if_needed, retry};
use tileforge_core::{Blob, TileCoord, TileFormat};
use tokio::sync::{mpsc, oneshot};

/// What the rasterizer wants the resource for; decides the fallback on
/// upstream failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResourceKind {
	Tile,
	Font,
	Sprite,
	GeoJson,
	Image,
}

#[derive(Clone, Debug)]
pub struct ResourceRequest {
	pub url: String,
	pub kind: ResourceKind,
}

type Reply = oneshot::Sender<Result<Blob>>;

/// The rasterizer's handle to the resolver task.
#[derive(Clone)]
pub struct ResourceClient {
	tx: mpsc::Sender<(ResourceRequest, Reply)>,
}

impl ResourceClient {
	pub async fn request(&self, url: &str, kind: ResourceKind) -> Result<Blob> {
		let (reply_tx, reply_rx) = oneshot::channel();
		let request = ResourceRequest {
			url: url.to_string(),
			kind,
		};
		self
			.tx
			.send((request, reply_tx))
			.await
			.map_err(|_| anyhow::anyhow!("resource resolver is gone"))?;
		reply_rx.await.context("resource resolver dropped the request")?
	}
}

/// Dispatches resource requests per scheme.
pub struct ResourceResolver {
	registry: Arc<ArchiveRegistry>,
	cache: ResourceCache,
	http: HttpClient,
	max_try: u32,
	backoff_ms: u64,
}

lazy_static! {
	static ref RE_TILE_URL: Regex =
		Regex::new(r"^(mbtiles|xyz|pg|pmtiles)://([^/]+)/(\d+)/(\d+)/(\d+)\.([a-z0-9]+)$").unwrap();
}

impl ResourceResolver {
	pub fn new(registry: Arc<ArchiveRegistry>, cache: ResourceCache, http: HttpClient) -> ResourceResolver {
		ResourceResolver {
			registry,
			cache,
			http,
			max_try: 3,
			backoff_ms: 500,
		}
	}

	pub fn with_retry(mut self, max_try: u32, backoff_ms: u64) -> ResourceResolver {
		self.max_try = max_try;
		self.backoff_ms = backoff_ms;
		self
	}

	/// Starts the resolver task and returns the client handle for it.
	/// Every request is answered concurrently; dropping all clients stops
	/// the task.
	pub fn spawn(self: Arc<Self>) -> ResourceClient {
		let (tx, mut rx) = mpsc::channel::<(ResourceRequest, Reply)>(64);

		tokio::spawn(async move {
			while let Some((request, reply)) = rx.recv().await {
				let resolver = self.clone();
				tokio::spawn(async move {
					let _ = reply.send(resolver.resolve(&request).await);
				});
			}
		});

		ResourceClient { tx }
	}

	/// Resolves one request. Public for direct use outside a pool.
	pub async fn resolve(&self, request: &ResourceRequest) -> Result<Blob> {
		trace!("resolve {:?} ({:?})", request.url, request.kind);
		let url = request.url.as_str();

		let blob = if let Some(captures) = RE_TILE_URL.captures(url) {
			self.resolve_archive_tile(&captures).await?
		} else if let Some(rest) = url.strip_prefix("sprites://") {
			self.resolve_sprite(rest).await?
		} else if let Some(rest) = url.strip_prefix("fonts://") {
			self.resolve_font(rest).await?
		} else if let Some(rest) = url.strip_prefix("geojson://") {
			self.resolve_geojson(rest).await?
		} else if url.starts_with("http://") || url.starts_with("https://") {
			self.resolve_remote(url, request.kind).await?
		} else if let Some(rest) = url.strip_prefix("data:") {
			decode_data_url(rest)?
		} else {
			bail!("unknown scheme in resource url {url:?}");
		};

		decompress_if_needed(blob)
	}

	async fn resolve_archive_tile(&self, captures: &regex::Captures<'_>) -> Result<Blob> {
		let (scheme, id) = (&captures[1], &captures[2]);
		if scheme == "pmtiles" {
			bail!("pmtiles archive {id:?} requires an external archive reader");
		}

		let archive = self
			.registry
			.tile_archive(scheme, id)
			.with_context(|| format!("unknown {scheme} archive {id:?}"))?;

		let coord = TileCoord::new(captures[3].parse()?, captures[4].parse()?, captures[5].parse()?)?;
		match archive.get_tile(&coord).await? {
			Some(blob) => Ok(blob),
			None => {
				// tiles beyond an archive's data coverage are normal; the
				// rasterizer treats empty data as an empty tile
				trace!("tile {coord} not in {scheme} archive {id:?}");
				Ok(Blob::new_empty())
			}
		}
	}

	async fn resolve_sprite(&self, rest: &str) -> Result<Blob> {
		let (id, file) = split_id_path(rest).context("sprite url must be sprites://<id>/<file>")?;
		if !self.registry.has_sprite(id) {
			bail!("unknown sprite archive {id:?}");
		}

		let origin = self.registry.sprite_origin(id).map(|origin| ResourceOrigin {
			url: substitute_or_append(&origin.url, "{name}", file),
			store_cache: origin.store_cache,
		});

		match self.cache.fetch(&format!("sprites/{id}/{file}"), origin.as_ref()).await? {
			Some(blob) => Ok(blob),
			None => bail!("sprite {file:?} does not exist in archive {id:?}"),
		}
	}

	async fn resolve_font(&self, rest: &str) -> Result<Blob> {
		let (id, file) = split_id_path(rest).context("font url must be fonts://<id>/<range>.pbf")?;
		let range = file.strip_suffix(".pbf").unwrap_or(file);

		if !self.registry.has_font(id) {
			warn!("unknown font archive {id:?}, using fallback glyphs");
			return Ok(fallback_glyphs(range));
		}

		let origin = self.registry.font_origin(id).map(|origin| ResourceOrigin {
			url: substitute_or_append(&origin.url, "{range}", file),
			store_cache: origin.store_cache,
		});

		match self.cache.fetch(&format!("fonts/{id}/{range}.pbf"), origin.as_ref()).await {
			Ok(Some(blob)) => Ok(blob),
			Ok(None) => {
				warn!("glyph range {range:?} of font {id:?} does not exist, using fallback glyphs");
				Ok(fallback_glyphs(range))
			}
			Err(error) => {
				warn!("failed to fetch glyph range {range:?} of font {id:?}: {error:#}, using fallback glyphs");
				Ok(fallback_glyphs(range))
			}
		}
	}

	async fn resolve_geojson(&self, rest: &str) -> Result<Blob> {
		let (group, layer) = split_id_path(rest).context("geojson url must be geojson://<group>/<layer>")?;
		let entry = self
			.registry
			.geojson_entry(group, layer)
			.with_context(|| format!("unknown geojson layer {group:?}/{layer:?}"))?;

		if let Some(inline) = &entry.inline {
			return Ok(inline.clone());
		}

		match self
			.cache
			.fetch(&format!("geojson/{group}/{layer}.geojson"), entry.origin.as_ref())
			.await?
		{
			Some(blob) => Ok(blob),
			None => bail!("geojson layer {group:?}/{layer:?} does not exist"),
		}
	}

	async fn resolve_remote(&self, url: &str, kind: ResourceKind) -> Result<Blob> {
		let fetched = retry(|| self.http.get(url), self.max_try, self.backoff_ms).await;

		match (fetched, kind) {
			(Ok(Some(blob)), _) => Ok(blob),
			(result, ResourceKind::Tile) => {
				if let Err(error) = result {
					warn!("tile request {url:?} failed: {error:#}, substituting fallback tile");
				}
				fallback_tile(format_from_url(url))
			}
			(result, ResourceKind::Font) => {
				if let Err(error) = result {
					warn!("font request {url:?} failed: {error:#}, substituting fallback glyphs");
				}
				Ok(fallback_glyphs(range_from_url(url)))
			}
			(Ok(None), _) => bail!("resource {url:?} does not exist"),
			(Err(error), _) => Err(error),
		}
	}
}

fn split_id_path(rest: &str) -> Option<(&str, &str)> {
	let (id, path) = rest.split_once('/')?;
	if id.is_empty() || path.is_empty() {
		return None;
	}
	Some((id, path))
}

/// Fills a `{placeholder}` into a URL template, or appends the value as a
/// path segment when the template has no placeholder.
fn substitute_or_append(template: &str, placeholder: &str, value: &str) -> String {
	if template.contains(placeholder) {
		template.replace(placeholder, value)
	} else {
		format!("{}/{}", template.trim_end_matches('/'), value)
	}
}

fn format_from_url(url: &str) -> TileFormat {
	url
		.rsplit('.')
		.next()
		.and_then(|ext| TileFormat::parse_str(ext).ok())
		.unwrap_or(TileFormat::PNG)
}

fn range_from_url(url: &str) -> &str {
	url
		.rsplit('/')
		.next()
		.and_then(|file| file.strip_suffix(".pbf"))
		.unwrap_or("0-255")
}

fn decode_data_url(rest: &str) -> Result<Blob> {
	let Some((meta, payload)) = rest.split_once(',') else {
		bail!("malformed data url");
	};
	if meta.ends_with(";base64") {
		let decoded = BASE64.decode(payload).context("invalid base64 in data url")?;
		Ok(Blob::from(decoded))
	} else {
		Ok(Blob::from(payload))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::GeoJsonEntry;
	use std::time::Duration;
	use tileforge_store::MBTilesStore;

	fn make_resolver(dir: &assert_fs::TempDir, registry: ArchiveRegistry) -> Arc<ResourceResolver> {
		let http = HttpClient::new(Duration::from_millis(500)).unwrap();
		let cache = ResourceCache::new(dir.path().join("caches"), http.clone()).with_retry(1, 1);
		Arc::new(ResourceResolver::new(Arc::new(registry), cache, http).with_retry(1, 1))
	}

	#[tokio::test]
	async fn resolves_archive_tiles() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let store = Arc::new(MBTilesStore::open(
			&dir.path().join("a.mbtiles"),
			true,
			Duration::from_secs(5),
		)?);
		store
			.put_tile(&TileCoord::new(1, 0, 1)?, &Blob::from("tile-bytes"))
			.await?;

		let mut registry = ArchiveRegistry::new();
		registry.register_mbtiles("osm", store);
		let resolver = make_resolver(&dir, registry);

		let blob = resolver
			.resolve(&ResourceRequest {
				url: "mbtiles://osm/1/0/1.pbf".to_string(),
				kind: ResourceKind::Tile,
			})
			.await?;
		assert_eq!(blob, Blob::from("tile-bytes"));

		// a tile outside the archive's coverage resolves to empty data
		let empty = resolver
			.resolve(&ResourceRequest {
				url: "mbtiles://osm/1/1/1.pbf".to_string(),
				kind: ResourceKind::Tile,
			})
			.await?;
		assert!(empty.is_empty());
		Ok(())
	}

	#[tokio::test]
	async fn gzipped_archive_tiles_are_decompressed() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let store = Arc::new(MBTilesStore::open(
			&dir.path().join("a.mbtiles"),
			true,
			Duration::from_secs(5),
		)?);
		let gzipped = tileforge_core::utils::compress_gzip(&Blob::from("vector-tile"))?;
		store.put_tile(&TileCoord::new(0, 0, 0)?, &gzipped).await?;

		let mut registry = ArchiveRegistry::new();
		registry.register_mbtiles("osm", store);
		let resolver = make_resolver(&dir, registry);

		let blob = resolver
			.resolve(&ResourceRequest {
				url: "mbtiles://osm/0/0/0.pbf".to_string(),
				kind: ResourceKind::Tile,
			})
			.await?;
		assert_eq!(blob, Blob::from("vector-tile"));
		Ok(())
	}

	#[tokio::test]
	async fn unknown_ids_are_reported() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let resolver = make_resolver(&dir, ArchiveRegistry::new());

		let error = resolver
			.resolve(&ResourceRequest {
				url: "mbtiles://missing/0/0/0.png".to_string(),
				kind: ResourceKind::Tile,
			})
			.await
			.unwrap_err();
		assert!(format!("{error:#}").contains("missing"));

		let error = resolver
			.resolve(&ResourceRequest {
				url: "gopher://whatever".to_string(),
				kind: ResourceKind::Image,
			})
			.await
			.unwrap_err();
		assert!(format!("{error:#}").contains("unknown scheme"));
		Ok(())
	}

	#[tokio::test]
	async fn pmtiles_is_unsupported() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let mut registry = ArchiveRegistry::new();
		registry.register_pmtiles("world");
		let resolver = make_resolver(&dir, registry);

		let error = resolver
			.resolve(&ResourceRequest {
				url: "pmtiles://world/0/0/0.pbf".to_string(),
				kind: ResourceKind::Tile,
			})
			.await
			.unwrap_err();
		assert!(format!("{error:#}").contains("external archive reader"));
		Ok(())
	}

	#[tokio::test]
	async fn font_failure_falls_back() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let mut registry = ArchiveRegistry::new();
		// origin points nowhere reachable
		registry.register_fonts(
			"sans",
			Some(ResourceOrigin {
				url: "http://127.0.0.1:1/fonts/{range}".to_string(),
				store_cache: false,
			}),
		);
		let resolver = make_resolver(&dir, registry);

		let blob = resolver
			.resolve(&ResourceRequest {
				url: "fonts://sans/0-255.pbf".to_string(),
				kind: ResourceKind::Font,
			})
			.await?;
		assert_eq!(blob, fallback_glyphs("0-255"));

		// unknown font ids fall back as well
		let blob = resolver
			.resolve(&ResourceRequest {
				url: "fonts://nope/0-255.pbf".to_string(),
				kind: ResourceKind::Font,
			})
			.await?;
		assert_eq!(blob, fallback_glyphs("0-255"));
		Ok(())
	}

	#[tokio::test]
	async fn remote_tile_failure_substitutes_fallback() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let resolver = make_resolver(&dir, ArchiveRegistry::new());

		let blob = resolver
			.resolve(&ResourceRequest {
				url: "http://127.0.0.1:1/tiles/0/0/0.png".to_string(),
				kind: ResourceKind::Tile,
			})
			.await?;
		assert_eq!(TileFormat::from_bytes(blob.as_slice()), TileFormat::PNG);

		// non-tile resources propagate the failure
		assert!(
			resolver
				.resolve(&ResourceRequest {
					url: "http://127.0.0.1:1/style.json".to_string(),
					kind: ResourceKind::Image,
				})
				.await
				.is_err()
		);
		Ok(())
	}

	#[tokio::test]
	async fn inline_geojson() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let mut registry = ArchiveRegistry::new();
		registry.register_geojson(
			"overlays",
			"borders",
			GeoJsonEntry {
				inline: Some(Blob::from(r#"{"type":"FeatureCollection","features":[]}"#)),
				origin: None,
			},
		);
		let resolver = make_resolver(&dir, registry);

		let blob = resolver
			.resolve(&ResourceRequest {
				url: "geojson://overlays/borders".to_string(),
				kind: ResourceKind::GeoJson,
			})
			.await?;
		assert!(blob.as_str().contains("FeatureCollection"));
		Ok(())
	}

	#[tokio::test]
	async fn data_urls() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let resolver = make_resolver(&dir, ArchiveRegistry::new());

		let blob = resolver
			.resolve(&ResourceRequest {
				url: "data:application/json;base64,eyJhIjoxfQ==".to_string(),
				kind: ResourceKind::GeoJson,
			})
			.await?;
		assert_eq!(blob, Blob::from(r#"{"a":1}"#));

		let blob = resolver
			.resolve(&ResourceRequest {
				url: "data:text/plain,hello".to_string(),
				kind: ResourceKind::Image,
			})
			.await?;
		assert_eq!(blob, Blob::from("hello"));
		Ok(())
	}

	#[tokio::test]
	async fn client_roundtrip() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let resolver = make_resolver(&dir, ArchiveRegistry::new());
		let client = resolver.spawn();

		let blob = client.request("data:text/plain,ping", ResourceKind::Image).await?;
		assert_eq!(blob, Blob::from("ping"));
		Ok(())
	}
}
