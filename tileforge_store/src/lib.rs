//! Tile archives: MBTiles files, XYZ directories and PostgreSQL databases.
//!
//! All three backends speak the same tile-coordinate API (`XYZ` scheme at
//! the boundary) and are unified behind the [`TileStore`] sum type, so the
//! bulk engines never know which backend they are writing to.

mod mbtiles;
mod metadata;
mod pg;
mod store;
mod xyz;

pub use mbtiles::MBTilesStore;
pub use metadata::{ArchiveMetadata, vector_layer_names};
pub use pg::PgStore;
pub use store::{CoverageInfo, CoverageInfoMode, TileHeaders, TileStore};
pub use xyz::XyzStore;
