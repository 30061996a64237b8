//! The bounded rasterizer pool.
//!
//! A rasterizer holds non-trivial native state, so instances are built
//! lazily, reused across tiles, and bounded by `max`. `acquire` suspends
//! until an instance is free or a new one may be created; the guard
//! returns its instance on drop. The pool is shared by all tile tasks of
//! one render run.

use crate::resolver::ResourceClient;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::raster::RasterData;

/// One rendering request: a geographic center, a zoom level and the pixel
/// dimensions of the output.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderView {
	pub lon: f64,
	pub lat: f64,
	pub zoom: f64,
	pub width: u32,
	pub height: u32,
}

/// The vector-tile rasterizer, consumed as an opaque collaborator.
///
/// Implementations pull glyphs, sprites, source tiles and remote images
/// through the [`ResourceClient`] they were constructed with.
#[async_trait]
pub trait Rasterizer: Send {
	async fn render(&mut self, view: &RenderView) -> Result<RasterData>;
}

/// Builds a rasterizer wired to a resource client.
pub type RasterizerFactory = Arc<dyn Fn(ResourceClient) -> Result<Box<dyn Rasterizer>> + Send + Sync>;

/// A bounded pool of rasterizers.
pub struct RendererPool {
	factory: RasterizerFactory,
	client: ResourceClient,
	idle: Mutex<VecDeque<Box<dyn Rasterizer>>>,
	semaphore: Arc<Semaphore>,
	max: usize,
}

impl RendererPool {
	pub fn new(max: usize, factory: RasterizerFactory, client: ResourceClient) -> RendererPool {
		let max = max.max(1);
		RendererPool {
			factory,
			client,
			idle: Mutex::new(VecDeque::new()),
			semaphore: Arc::new(Semaphore::new(max)),
			max,
		}
	}

	pub fn max(&self) -> usize {
		self.max
	}

	/// Takes a rasterizer, suspending while all `max` instances are in
	/// use. An idle instance is reused; otherwise a new one is built.
	pub async fn acquire(&self) -> Result<PooledRenderer<'_>> {
		let permit = self
			.semaphore
			.clone()
			.acquire_owned()
			.await
			.expect("renderer pool semaphore closed");

		let existing = self.idle.lock().unwrap().pop_front();
		let renderer = match existing {
			Some(renderer) => renderer,
			None => (self.factory)(self.client.clone())?,
		};

		Ok(PooledRenderer {
			renderer: Some(renderer),
			pool: self,
			_permit: permit,
		})
	}

	/// Destroys all idle rasterizers. Instances currently lent out are
	/// destroyed on release instead of returning to the pool.
	pub fn clear(&self) {
		self.idle.lock().unwrap().clear();
	}
}

/// A rasterizer on loan from the pool; returns on drop.
pub struct PooledRenderer<'a> {
	renderer: Option<Box<dyn Rasterizer>>,
	pool: &'a RendererPool,
	_permit: OwnedSemaphorePermit,
}

impl Drop for PooledRenderer<'_> {
	fn drop(&mut self) {
		if let Some(renderer) = self.renderer.take() {
			let mut idle = self.pool.idle.lock().unwrap();
			if idle.len() < self.pool.max {
				idle.push_back(renderer);
			}
		}
	}
}

impl Deref for PooledRenderer<'_> {
	type Target = Box<dyn Rasterizer>;

	fn deref(&self) -> &Self::Target {
		self.renderer.as_ref().expect("renderer already released")
	}
}

impl DerefMut for PooledRenderer<'_> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		self.renderer.as_mut().expect("renderer already released")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::ArchiveRegistry;
	use crate::resolver::ResourceResolver;
	use crate::resources::{HttpClient, ResourceCache};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	struct CountingRasterizer {
		active: Arc<AtomicUsize>,
		peak: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl Rasterizer for CountingRasterizer {
		async fn render(&mut self, view: &RenderView) -> Result<RasterData> {
			let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
			self.peak.fetch_max(active, Ordering::SeqCst);
			tokio::time::sleep(Duration::from_millis(20)).await;
			self.active.fetch_sub(1, Ordering::SeqCst);
			Ok(RasterData::uniform(view.width, view.height, [0, 0, 0, 255]))
		}
	}

	fn test_client(dir: &assert_fs::TempDir) -> ResourceClient {
		let http = HttpClient::new(Duration::from_secs(1)).unwrap();
		let cache = ResourceCache::new(dir.path().to_path_buf(), http.clone());
		Arc::new(ResourceResolver::new(Arc::new(ArchiveRegistry::new()), cache, http)).spawn()
	}

	#[tokio::test]
	async fn pool_bounds_concurrency() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let created = Arc::new(AtomicUsize::new(0));
		let active = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));

		let factory: RasterizerFactory = {
			let created = created.clone();
			let active = active.clone();
			let peak = peak.clone();
			Arc::new(move |_client| {
				created.fetch_add(1, Ordering::SeqCst);
				Ok(Box::new(CountingRasterizer {
					active: active.clone(),
					peak: peak.clone(),
				}) as Box<dyn Rasterizer>)
			})
		};

		let pool = Arc::new(RendererPool::new(2, factory, test_client(&dir)));

		let mut handles = Vec::new();
		for i in 0..8u32 {
			let pool = pool.clone();
			handles.push(tokio::spawn(async move {
				let mut renderer = pool.acquire().await.unwrap();
				renderer
					.render(&RenderView {
						lon: 0.0,
						lat: 0.0,
						zoom: f64::from(i % 4),
						width: 4,
						height: 4,
					})
					.await
					.unwrap();
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}

		assert!(created.load(Ordering::SeqCst) <= 2);
		assert!(peak.load(Ordering::SeqCst) <= 2);
		Ok(())
	}

	#[tokio::test]
	async fn clear_drops_idle_instances() -> Result<()> {
		let dir = assert_fs::TempDir::new()?;
		let created = Arc::new(AtomicUsize::new(0));
		let active = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));

		let factory: RasterizerFactory = {
			let created = created.clone();
			let active = active.clone();
			let peak = peak.clone();
			Arc::new(move |_client| {
				created.fetch_add(1, Ordering::SeqCst);
				Ok(Box::new(CountingRasterizer {
					active: active.clone(),
					peak: peak.clone(),
				}) as Box<dyn Rasterizer>)
			})
		};

		let pool = RendererPool::new(2, factory, test_client(&dir));

		drop(pool.acquire().await?);
		assert_eq!(created.load(Ordering::SeqCst), 1);

		// the idle instance is reused
		drop(pool.acquire().await?);
		assert_eq!(created.load(Ordering::SeqCst), 1);

		pool.clear();
		drop(pool.acquire().await?);
		assert_eq!(created.load(Ordering::SeqCst), 2);
		Ok(())
	}
}
