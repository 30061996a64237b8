//! End-to-end rendering into an MBTiles archive with a mock rasterizer.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tileforge::core::{Coverage, GeoBBox, TileCoord};
use tileforge::pipeline::{RenderOptions, StopSignal, render_tiles};
use tileforge::render::resources::{HttpClient, ResourceCache};
use tileforge::render::{
	ArchiveRegistry, RasterData, Rasterizer, RasterizerFactory, RenderView, RendererPool, ResourceResolver,
};
use tileforge::store::TileStore;

/// A rasterizer that paints everything in one color, standing in for the
/// external vector-tile rasterizer.
struct SolidRasterizer {
	color: [u8; 4],
}

#[async_trait]
impl Rasterizer for SolidRasterizer {
	async fn render(&mut self, view: &RenderView) -> Result<RasterData> {
		Ok(RasterData::uniform(view.width, view.height, self.color))
	}
}

fn solid_pool(dir: &assert_fs::TempDir, color: [u8; 4]) -> RendererPool {
	let http = HttpClient::new(Duration::from_secs(1)).unwrap();
	let cache = ResourceCache::new(dir.path().join("caches"), http.clone());
	let client = Arc::new(ResourceResolver::new(Arc::new(ArchiveRegistry::new()), cache, http)).spawn();
	let factory: RasterizerFactory = Arc::new(move |_| Ok(Box::new(SolidRasterizer { color }) as Box<dyn Rasterizer>));
	RendererPool::new(2, factory, client)
}

#[tokio::test]
async fn render_mbtiles_zoom_zero() -> Result<()> {
	let dir = assert_fs::TempDir::new()?;
	let path = dir.path().join("render.mbtiles");
	let store = TileStore::open(&path.to_string_lossy(), true, Duration::from_secs(5)).await?;
	let pool = solid_pool(&dir, [10, 120, 230, 255]);

	let coverage = Coverage::new_bbox(0, GeoBBox::new(-180.0, -85.0, 180.0, 85.0)?)?;
	let report = render_tiles(
		&store,
		&[coverage],
		&pool,
		&RenderOptions::default(),
		&StopSignal::new(),
	)
	.await?;
	assert_eq!(report.written, 1);
	assert_eq!(report.failed, 0);
	store.close();

	// one row at (0,0,0); tile_row 0 is the TMS row of y=0 at zoom 0
	let conn = r2d2_sqlite::rusqlite::Connection::open(&path)?;
	let (zoom, column, row, data): (u8, u32, u32, Vec<u8>) = conn.query_row(
		"SELECT zoom_level, tile_column, tile_row, tile_data FROM tiles",
		[],
		|r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
	)?;
	assert_eq!((zoom, column, row), (0, 0, 0));

	// the payload decodes to a 256x256 uniform-color PNG
	let image = image::load_from_memory(&data)?.to_rgba8();
	assert_eq!(image.dimensions(), (256, 256));
	assert!(image.pixels().all(|p| p.0 == [10, 120, 230, 255]));
	Ok(())
}

#[tokio::test]
async fn render_stores_rows_in_tms() -> Result<()> {
	let dir = assert_fs::TempDir::new()?;
	let path = dir.path().join("tms.mbtiles");
	let store = TileStore::open(&path.to_string_lossy(), true, Duration::from_secs(5)).await?;
	let pool = solid_pool(&dir, [1, 2, 3, 255]);

	let coverage = Coverage::new_bbox(1, GeoBBox::new(-180.0, -85.0, 180.0, 85.0)?)?;
	let report = render_tiles(
		&store,
		&[coverage],
		&pool,
		&RenderOptions::default(),
		&StopSignal::new(),
	)
	.await?;
	assert_eq!(report.written, 4);

	// reading through the store uses XYZ at the boundary
	assert!(store.get_tile(&TileCoord::new(1, 0, 0)?).await?.is_some());
	store.close();

	// on disk, XYZ y=0 lands in TMS row 1 at zoom 1
	let conn = r2d2_sqlite::rusqlite::Connection::open(&path)?;
	let rows: i64 = conn.query_row(
		"SELECT COUNT(*) FROM tiles WHERE zoom_level = 1 AND tile_row IN (0, 1)",
		[],
		|r| r.get(0),
	)?;
	assert_eq!(rows, 4);
	let row_of_y0: u32 = conn.query_row(
		"SELECT tile_row FROM tiles WHERE tile_column = 0 ORDER BY tile_row LIMIT 1",
		[],
		|r| r.get(0),
	)?;
	// both rows exist in column 0; the smallest TMS row is 0 (XYZ y=1)
	assert_eq!(row_of_y0, 0);
	Ok(())
}

#[tokio::test]
async fn webp_output() -> Result<()> {
	let dir = assert_fs::TempDir::new()?;
	let path = dir.path().join("w.mbtiles");
	let store = TileStore::open(&path.to_string_lossy(), true, Duration::from_secs(5)).await?;
	let pool = solid_pool(&dir, [5, 6, 7, 255]);

	let coverage = Coverage::new_bbox(0, GeoBBox::new(-180.0, -85.0, 180.0, 85.0)?)?;
	let options = RenderOptions {
		format: tileforge::core::TileFormat::WEBP,
		..RenderOptions::default()
	};
	render_tiles(&store, &[coverage], &pool, &options, &StopSignal::new()).await?;

	let (blob, headers) = store.get_tile(&TileCoord::new(0, 0, 0)?).await?.unwrap();
	assert_eq!(headers.content_type, "image/webp");
	assert_eq!(
		tileforge::core::TileFormat::from_bytes(blob.as_slice()),
		tileforge::core::TileFormat::WEBP
	);
	Ok(())
}
