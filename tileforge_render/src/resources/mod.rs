//! File-backed resource caching and origin HTTP access.
//!
//! Sprites, glyph ranges and GeoJSON layers live in a lock-protected file
//! cache; a miss reads through to a configured origin and optionally
//! writes back. Fallback assets stand in when an origin yields nothing.

mod cache;
mod fallback;
mod http;

pub use cache::{ResourceCache, ResourceOrigin};
pub use fallback::{FALLBACK_FONT_NAME, fallback_glyphs, fallback_tile};
pub use http::HttpClient;
