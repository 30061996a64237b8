//! Style rendering support: the rasterizer pool, the resource resolver
//! that feeds it, the file-backed resource cache and the style document
//! validator/rewriter.
//!
//! The vector-tile rasterizer itself is an external collaborator behind
//! the [`Rasterizer`] trait; everything it needs (glyph ranges, sprite
//! sheets, source tiles, GeoJSON, remote images) is pulled through a
//! [`ResourceClient`] and dispatched by URL scheme.

mod pool;
mod raster;
mod registry;
mod resolver;
pub mod resources;
mod style;

pub use pool::{PooledRenderer, Rasterizer, RasterizerFactory, RenderView, RendererPool};
pub use raster::RasterData;
pub use registry::{ArchiveRegistry, GeoJsonEntry, TileArchive};
pub use resolver::{ResourceClient, ResourceKind, ResourceRequest, ResourceResolver};
pub use style::{render_style_json, validate_style};
