//! Raw RGBA tiles and their encoding into the archive formats.
//!
//! The rasterizer hands back plain RGBA bytes; [`RasterData::encode`]
//! turns them into PNG, JPEG, WebP or GIF. JPEG drops the alpha channel.

use anyhow::{Result, bail, ensure};
use image::{DynamicImage, ImageFormat, RgbaImage, imageops::FilterType};
use std::io::Cursor;
use tileforge_core::{Blob, TileFormat};

/// A decoded raster tile: `width * height * 4` RGBA bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RasterData {
	pub width: u32,
	pub height: u32,
	pub rgba: Vec<u8>,
}

impl RasterData {
	pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<RasterData> {
		ensure!(width > 0 && height > 0, "raster dimensions must be positive");
		ensure!(
			rgba.len() as u64 == u64::from(width) * u64::from(height) * 4,
			"raster data has {} bytes, expected {}",
			rgba.len(),
			u64::from(width) * u64::from(height) * 4
		);
		Ok(RasterData { width, height, rgba })
	}

	/// A uniformly colored tile.
	pub fn uniform(width: u32, height: u32, color: [u8; 4]) -> RasterData {
		RasterData {
			width,
			height,
			rgba: color.repeat((width * height) as usize),
		}
	}

	fn to_image(&self) -> Result<RgbaImage> {
		match RgbaImage::from_raw(self.width, self.height, self.rgba.clone()) {
			Some(image) => Ok(image),
			None => bail!("raster buffer does not match {}x{}", self.width, self.height),
		}
	}

	/// Scales the tile down to `width` x `height`.
	pub fn downscale(&self, width: u32, height: u32) -> Result<RasterData> {
		let resized = image::imageops::resize(&self.to_image()?, width, height, FilterType::Triangle);
		RasterData::new(width, height, resized.into_raw())
	}

	/// Encodes the tile into `format`.
	pub fn encode(&self, format: TileFormat) -> Result<Blob> {
		let image = self.to_image()?;
		Ok(match format {
			TileFormat::PNG => {
				let mut bytes = Cursor::new(Vec::new());
				image.write_to(&mut bytes, ImageFormat::Png)?;
				Blob::from(bytes.into_inner())
			}
			TileFormat::JPG => {
				let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
				let mut bytes = Cursor::new(Vec::new());
				rgb.write_to(&mut bytes, ImageFormat::Jpeg)?;
				Blob::from(bytes.into_inner())
			}
			TileFormat::GIF => {
				let mut bytes = Cursor::new(Vec::new());
				image.write_to(&mut bytes, ImageFormat::Gif)?;
				Blob::from(bytes.into_inner())
			}
			TileFormat::WEBP => {
				let encoder = webp::Encoder::from_rgba(&self.rgba, self.width, self.height);
				Blob::from(encoder.encode(90.0).to_vec())
			}
			TileFormat::PBF => bail!("cannot encode raster data as pbf"),
		})
	}
}
