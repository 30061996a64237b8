//! Core types: tile coordinates, bounding boxes, coverages, formats and compressions.

mod blob;
mod compression;
mod coord;
mod coverage;
mod format;
mod geo_bbox;
mod scheme;
mod tile_bbox;

pub use blob::Blob;
pub use compression::TileCompression;
pub use coord::{TileCoord, TilePosition};
pub use coverage::{Coverage, CoverageShape};
pub use format::{TileFormat, is_fully_transparent_png};
pub use geo_bbox::GeoBBox;
pub use scheme::TileScheme;
pub use tile_bbox::TileBBox;

/// Highest zoom level supported by the coordinate model.
pub const MAX_ZOOM_LEVEL: u8 = 22;
