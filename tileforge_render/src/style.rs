//! Style document validation and rewriting.
//!
//! [`validate_style`] checks that every reference in a style document is
//! either a known local pseudo-URL or a remote URL. [`render_style_json`]
//! rewrites the local references into concrete
//! `<scheme>://<id>/{z}/{x}/{y}.<format>` tile templates, collapsing
//! `url`/`urls` into `tiles`, so the resolver sees unambiguous schemes at
//! render time.

use crate::registry::ArchiveRegistry;
use anyhow::{Context, Result, bail, ensure};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
	static ref RE_ARCHIVE_REF: Regex = Regex::new(r"^(mbtiles|xyz|pg|pmtiles)://([^/]+)").unwrap();
	static ref RE_GEOJSON_REF: Regex = Regex::new(r"^geojson://([^/]+)/([^/]+)$").unwrap();
	static ref RE_SPRITE_REF: Regex = Regex::new(r"^sprites://([^/]+)").unwrap();
}

/// Validates all references of a style document against the registry.
pub fn validate_style(style: &Value, registry: &ArchiveRegistry) -> Result<()> {
	let root = style.as_object().context("style must be a JSON object")?;

	if let Some(glyphs) = root.get("glyphs") {
		let glyphs = glyphs.as_str().context("style key 'glyphs' must be a string")?;
		ensure!(
			glyphs.starts_with("fonts://") || is_remote(glyphs),
			"style key 'glyphs' must start with fonts://, http:// or https://, got {glyphs:?}"
		);
	}

	if let Some(sprite) = root.get("sprite") {
		let sprite = sprite.as_str().context("style key 'sprite' must be a string")?;
		if let Some(captures) = RE_SPRITE_REF.captures(sprite) {
			let id = &captures[1];
			ensure!(registry.has_sprite(id), "unknown sprite archive {id:?} in style");
		} else {
			ensure!(
				is_remote(sprite),
				"style key 'sprite' must start with sprites://, http:// or https://, got {sprite:?}"
			);
		}
	}

	if let Some(sources) = root.get("sources") {
		let sources = sources.as_object().context("style key 'sources' must be an object")?;
		for (source_id, source) in sources {
			validate_source(source_id, source, registry).with_context(|| format!("in source {source_id:?}"))?;
		}
	}

	Ok(())
}

fn validate_source(source_id: &str, source: &Value, registry: &ArchiveRegistry) -> Result<()> {
	let source = source.as_object().with_context(|| format!("source {source_id:?} must be an object"))?;

	if let Some(url) = source.get("url") {
		validate_ref(url.as_str().context("'url' must be a string")?, registry)?;
	}
	for key in ["urls", "tiles"] {
		if let Some(list) = source.get(key) {
			let list = list.as_array().with_context(|| format!("'{key}' must be an array"))?;
			for entry in list {
				validate_ref(entry.as_str().with_context(|| format!("'{key}' entries must be strings"))?, registry)?;
			}
		}
	}
	if let Some(data) = source.get("data") {
		match data {
			// inline GeoJSON objects need no reference check
			Value::Object(_) => {}
			Value::String(text) => {
				if !text.starts_with("data:") {
					validate_ref(text, registry)?;
				}
			}
			_ => bail!("'data' must be a string or an object"),
		}
	}

	Ok(())
}

fn validate_ref(reference: &str, registry: &ArchiveRegistry) -> Result<()> {
	if let Some(captures) = RE_ARCHIVE_REF.captures(reference) {
		let (scheme, id) = (&captures[1], &captures[2]);
		ensure!(
			registry.has_tile_archive(scheme, id),
			"unknown {scheme} archive {id:?} referenced as {reference:?}"
		);
		return Ok(());
	}
	if let Some(captures) = RE_GEOJSON_REF.captures(reference) {
		let (group, layer) = (&captures[1], &captures[2]);
		ensure!(
			registry.has_geojson(group, layer),
			"unknown geojson layer {group:?}/{layer:?} referenced as {reference:?}"
		);
		return Ok(());
	}
	ensure!(is_remote(reference), "unrecognized reference {reference:?}");
	Ok(())
}

fn is_remote(reference: &str) -> bool {
	reference.starts_with("http://") || reference.starts_with("https://")
}

/// Rewrites local references into concrete tile templates.
///
/// `url`/`urls` entries that resolve to a registered archive collapse into
/// the source's `tiles` array; remote URLs pass through untouched. The
/// returned document is the one handed to the rasterizer.
pub async fn render_style_json(style: &Value, registry: &ArchiveRegistry) -> Result<Value> {
	let mut style = style.clone();

	let Some(sources) = style.get_mut("sources").and_then(Value::as_object_mut) else {
		return Ok(style);
	};

	for (source_id, source) in sources.iter_mut() {
		let Some(source) = source.as_object_mut() else { continue };

		let mut templates: Vec<String> = Vec::new();
		let mut remote_tiles: Vec<String> = Vec::new();

		if let Some(url) = source.get("url").and_then(Value::as_str) {
			if let Some(template) = rewrite_ref(url, registry).await? {
				templates.push(template);
				source.remove("url");
			}
		}

		if let Some(urls) = source.get("urls").and_then(Value::as_array) {
			let urls: Vec<String> = urls
				.iter()
				.filter_map(Value::as_str)
				.map(str::to_string)
				.collect();
			let mut all_local = true;
			for url in &urls {
				match rewrite_ref(url, registry).await? {
					Some(template) => templates.push(template),
					None => all_local = false,
				}
			}
			if all_local {
				source.remove("urls");
			} else {
				bail!("source {source_id:?} mixes local and remote entries in 'urls'");
			}
		}

		if let Some(tiles) = source.get("tiles").and_then(Value::as_array) {
			for entry in tiles.iter().filter_map(Value::as_str) {
				match rewrite_ref(entry, registry).await? {
					Some(template) => templates.push(template),
					None => remote_tiles.push(entry.to_string()),
				}
			}
		}

		if !templates.is_empty() || !remote_tiles.is_empty() {
			templates.extend(remote_tiles);
			templates.dedup();
			source.insert("tiles".to_string(), serde_json::json!(templates));
		}
	}

	Ok(style)
}

/// Rewrites one reference, returning `None` for remote URLs that stay
/// untouched.
async fn rewrite_ref(reference: &str, registry: &ArchiveRegistry) -> Result<Option<String>> {
	let Some(captures) = RE_ARCHIVE_REF.captures(reference) else {
		return Ok(None);
	};
	let (scheme, id) = (&captures[1], &captures[2]);
	ensure!(
		registry.has_tile_archive(scheme, id),
		"unknown {scheme} archive {id:?} referenced as {reference:?}"
	);

	if scheme == "pmtiles" {
		// format metadata lives inside the external archive; vector tiles
		// are the common case
		return Ok(Some(format!("pmtiles://{id}/{{z}}/{{x}}/{{y}}.pbf")));
	}

	Ok(Some(registry.tile_template(scheme, id).await?))
}
