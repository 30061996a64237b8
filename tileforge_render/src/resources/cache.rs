//! The lock-protected file cache with read-through.
//!
//! Cached resources live under a caches root at a path chosen by the
//! caller (`sprites/<id>/<file>`, `fonts/<id>/<range>.pbf`,
//! `geojson/<group>/<layer>.geojson`). A miss with a configured origin
//! fetches upstream (with the shared retry policy) and writes back when
//! the origin is marked cacheable.

use super::http::HttpClient;
use anyhow::{Context, Result};
use log::trace;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tileforge_core::Blob;
use tileforge_core::utils::{retry, write_file_locked};

/// Where a cacheable resource comes from.
#[derive(Clone, Debug)]
pub struct ResourceOrigin {
	pub url: String,
	/// Write fetched resources back into the file cache.
	pub store_cache: bool,
}

pub struct ResourceCache {
	root: PathBuf,
	http: HttpClient,
	lock_timeout: Duration,
	max_try: u32,
	backoff_ms: u64,
}

impl ResourceCache {
	pub fn new(root: PathBuf, http: HttpClient) -> ResourceCache {
		ResourceCache {
			root,
			http,
			lock_timeout: Duration::from_secs(30),
			max_try: 3,
			backoff_ms: 500,
		}
	}

	pub fn with_retry(mut self, max_try: u32, backoff_ms: u64) -> ResourceCache {
		self.max_try = max_try;
		self.backoff_ms = backoff_ms;
		self
	}

	/// Looks up `rel_path` in the cache; on a miss fetches from `origin`
	/// (if any). Returns `None` when the resource does not exist anywhere.
	pub async fn fetch(&self, rel_path: &str, origin: Option<&ResourceOrigin>) -> Result<Option<Blob>> {
		let path = self.root.join(rel_path);

		if path.is_file() {
			trace!("cache hit {rel_path}");
			let data = fs::read(&path).with_context(|| format!("failed to read {path:?}"))?;
			return Ok(Some(Blob::from(data)));
		}

		let Some(origin) = origin else {
			return Ok(None);
		};

		trace!("cache miss {rel_path}, fetching {}", origin.url);
		let fetched = retry(|| self.http.get(&origin.url), self.max_try, self.backoff_ms).await?;

		let Some(blob) = fetched else {
			return Ok(None);
		};

		if origin.store_cache {
			write_file_locked(&path, blob.as_slice(), self.lock_timeout).await?;
		}

		Ok(Some(blob))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::Router;
	use axum::http::StatusCode;
	use axum::routing::get;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicU32, Ordering};

	async fn serve(app: Router) -> String {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		format!("http://{addr}")
	}

	fn temp_cache(dir: &assert_fs::TempDir) -> ResourceCache {
		ResourceCache::new(
			dir.path().to_path_buf(),
			HttpClient::new(Duration::from_secs(2)).unwrap(),
		)
		.with_retry(3, 10)
	}

	#[tokio::test]
	async fn hit_without_origin() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		fs::create_dir_all(dir.path().join("sprites/base"))?;
		fs::write(dir.path().join("sprites/base/sprite.json"), b"{}")?;

		let cache = temp_cache(&dir);
		let blob = cache.fetch("sprites/base/sprite.json", None).await?.unwrap();
		assert_eq!(blob, Blob::from("{}"));

		assert!(cache.fetch("sprites/base/other.json", None).await?.is_none());
		Ok(())
	}

	#[tokio::test]
	async fn read_through_writes_back() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let hits = Arc::new(AtomicU32::new(0));
		let counter = hits.clone();

		let app = Router::new().route(
			"/glyphs.pbf",
			get(move || {
				counter.fetch_add(1, Ordering::SeqCst);
				async { "glyph-bytes" }
			}),
		);
		let base = serve(app).await;

		let cache = temp_cache(&dir);
		let origin = ResourceOrigin {
			url: format!("{base}/glyphs.pbf"),
			store_cache: true,
		};

		let blob = cache.fetch("fonts/sans/0-255.pbf", Some(&origin)).await?.unwrap();
		assert_eq!(blob, Blob::from("glyph-bytes"));
		assert!(dir.path().join("fonts/sans/0-255.pbf").is_file());

		// second fetch is served from the cache
		cache.fetch("fonts/sans/0-255.pbf", Some(&origin)).await?.unwrap();
		assert_eq!(hits.load(Ordering::SeqCst), 1);
		Ok(())
	}

	#[tokio::test]
	async fn read_through_without_write_back() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let app = Router::new().route("/data.geojson", get(|| async { "{}" }));
		let base = serve(app).await;

		let cache = temp_cache(&dir);
		let origin = ResourceOrigin {
			url: format!("{base}/data.geojson"),
			store_cache: false,
		};

		assert!(cache.fetch("geojson/g/l.geojson", Some(&origin)).await?.is_some());
		assert!(!dir.path().join("geojson/g/l.geojson").exists());
		Ok(())
	}

	#[tokio::test]
	async fn missing_upstream_is_none() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let app = Router::new().route("/gone", get(|| async { StatusCode::NOT_FOUND }));
		let base = serve(app).await;

		let cache = temp_cache(&dir);
		let origin = ResourceOrigin {
			url: format!("{base}/gone"),
			store_cache: true,
		};
		assert!(cache.fetch("sprites/x/y.png", Some(&origin)).await?.is_none());
		Ok(())
	}

	#[tokio::test]
	async fn transient_errors_are_retried() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let attempts = Arc::new(AtomicU32::new(0));
		let counter = attempts.clone();

		let app = Router::new().route(
			"/flaky",
			get(move || {
				let n = counter.fetch_add(1, Ordering::SeqCst);
				async move {
					if n < 2 {
						Err(StatusCode::INTERNAL_SERVER_ERROR)
					} else {
						Ok("finally")
					}
				}
			}),
		);
		let base = serve(app).await;

		let cache = temp_cache(&dir);
		let origin = ResourceOrigin {
			url: format!("{base}/flaky"),
			store_cache: false,
		};
		let blob = cache.fetch("sprites/a/b.png", Some(&origin)).await?.unwrap();
		assert_eq!(blob, Blob::from("finally"));
		assert_eq!(attempts.load(Ordering::SeqCst), 3);
		Ok(())
	}
}
