//! Archive metadata: the string-keyed map stored alongside every tile set.
//!
//! Recognized keys follow the MBTiles convention (`name`, `format`,
//! `bounds`, `center`, `minzoom`, `maxzoom`, `vector_layers`, ...). Missing
//! derivable keys are filled in lazily by the stores: `center` from
//! `bounds`, `bounds` from the observed tile extents, `vector_layers` by
//! scanning `pbf` payloads for layer names.

use anyhow::{Context, Result, bail, ensure};
use std::collections::BTreeMap;
use tileforge_core::{Blob, GeoBBox, TileFormat};

/// A string-keyed metadata map with typed accessors for the derivable keys.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArchiveMetadata {
	entries: BTreeMap<String, String>,
}

impl ArchiveMetadata {
	pub fn new() -> ArchiveMetadata {
		ArchiveMetadata {
			entries: BTreeMap::new(),
		}
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.entries.get(key).map(String::as_str)
	}

	pub fn set(&mut self, key: &str, value: &str) {
		self.entries.insert(key.to_string(), value.to_string());
	}

	pub fn contains(&self, key: &str) -> bool {
		self.entries.contains_key(key)
	}

	/// Merges `other` into `self`, overwriting existing keys.
	pub fn merge(&mut self, other: &ArchiveMetadata) {
		for (key, value) in &other.entries {
			self.entries.insert(key.clone(), value.clone());
		}
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn tile_format(&self) -> Option<TileFormat> {
		self.get("format").and_then(|v| TileFormat::parse_str(v).ok())
	}

	pub fn bounds(&self) -> Option<GeoBBox> {
		let text = self.get("bounds")?;
		let values: Vec<f64> = text.split(',').map_while(|v| v.trim().parse().ok()).collect();
		GeoBBox::try_from(values).ok()
	}

	pub fn minzoom(&self) -> Option<u8> {
		self.get("minzoom").and_then(|v| v.parse().ok())
	}

	pub fn maxzoom(&self) -> Option<u8> {
		self.get("maxzoom").and_then(|v| v.parse().ok())
	}

	pub fn set_bounds(&mut self, bounds: &GeoBBox) {
		self.set(
			"bounds",
			&format!("{},{},{},{}", bounds.x_min, bounds.y_min, bounds.x_max, bounds.y_max),
		);
	}

	/// Fills in `center` as the midpoint of `bounds` at the middle zoom, if
	/// `bounds` is known and `center` is not.
	pub fn derive_center(&mut self) {
		if self.contains("center") {
			return;
		}
		let Some(bounds) = self.bounds() else { return };
		let zoom = (u32::from(self.minzoom().unwrap_or(0)) + u32::from(self.maxzoom().unwrap_or(0))) / 2;
		let (lon, lat) = bounds.center();
		self.set("center", &format!("{lon},{lat},{zoom}"));
	}

	pub fn as_map(&self) -> &BTreeMap<String, String> {
		&self.entries
	}
}

impl From<BTreeMap<String, String>> for ArchiveMetadata {
	fn from(entries: BTreeMap<String, String>) -> Self {
		ArchiveMetadata { entries }
	}
}

/// Extracts the layer names of a Mapbox vector tile.
///
/// This is a minimal protobuf walk: layers are field 3 of the tile message,
/// a layer's name is its field 1. Everything else is skipped. The payload
/// must already be decompressed.
pub fn vector_layer_names(blob: &Blob) -> Result<Vec<String>> {
	let data = blob.as_slice();
	let mut pos = 0usize;
	let mut names = Vec::new();

	while pos < data.len() {
		let key = read_varint(data, &mut pos)?;
		let (field, wire) = (key >> 3, key & 7);
		if field == 3 && wire == 2 {
			let len = read_varint(data, &mut pos)? as usize;
			ensure!(pos + len <= data.len(), "layer message is truncated");
			if let Some(name) = layer_name(&data[pos..pos + len])? {
				names.push(name);
			}
			pos += len;
		} else {
			skip_field(wire, data, &mut pos)?;
		}
	}

	Ok(names)
}

/// Builds the `vector_layers` JSON value from a list of layer names.
pub(crate) fn vector_layers_json(names: &[String]) -> String {
	let layers: Vec<serde_json::Value> = names.iter().map(|name| serde_json::json!({ "id": name })).collect();
	serde_json::Value::Array(layers).to_string()
}

fn layer_name(data: &[u8]) -> Result<Option<String>> {
	let mut pos = 0usize;
	while pos < data.len() {
		let key = read_varint(data, &mut pos)?;
		let (field, wire) = (key >> 3, key & 7);
		if field == 1 && wire == 2 {
			let len = read_varint(data, &mut pos)? as usize;
			ensure!(pos + len <= data.len(), "layer name is truncated");
			let name = std::str::from_utf8(&data[pos..pos + len]).context("layer name is not valid UTF-8")?;
			return Ok(Some(name.to_string()));
		}
		skip_field(wire, data, &mut pos)?;
	}
	Ok(None)
}

fn read_varint(data: &[u8], pos: &mut usize) -> Result<u64> {
	let mut value = 0u64;
	let mut shift = 0u32;
	loop {
		ensure!(*pos < data.len(), "varint is truncated");
		ensure!(shift < 64, "varint is too long");
		let byte = data[*pos];
		*pos += 1;
		value |= u64::from(byte & 0x7F) << shift;
		if byte & 0x80 == 0 {
			return Ok(value);
		}
		shift += 7;
	}
}

fn skip_field(wire: u64, data: &[u8], pos: &mut usize) -> Result<()> {
	match wire {
		0 => {
			read_varint(data, pos)?;
		}
		1 => {
			ensure!(*pos + 8 <= data.len(), "fixed64 field is truncated");
			*pos += 8;
		}
		2 => {
			let len = read_varint(data, pos)? as usize;
			ensure!(*pos + len <= data.len(), "length-delimited field is truncated");
			*pos += len;
		}
		5 => {
			ensure!(*pos + 4 <= data.len(), "fixed32 field is truncated");
			*pos += 4;
		}
		_ => bail!("unsupported protobuf wire type {wire}"),
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
		loop {
			let byte = (value & 0x7F) as u8;
			value >>= 7;
			if value == 0 {
				out.push(byte);
				return;
			}
			out.push(byte | 0x80);
		}
	}

	fn encode_layer(name: &str, extra_fields: bool) -> Vec<u8> {
		let mut layer = Vec::new();
		// field 1 (name), wire 2
		layer.push(0x0A);
		encode_varint(name.len() as u64, &mut layer);
		layer.extend_from_slice(name.as_bytes());
		if extra_fields {
			// field 5 (extent), wire 0
			layer.push(0x28);
			encode_varint(4096, &mut layer);
			// field 15 (version), wire 0
			layer.push(0x78);
			encode_varint(2, &mut layer);
		}
		layer
	}

	fn encode_tile(layers: &[Vec<u8>]) -> Blob {
		let mut tile = Vec::new();
		for layer in layers {
			// field 3 (layer), wire 2
			tile.push(0x1A);
			encode_varint(layer.len() as u64, &mut tile);
			tile.extend_from_slice(layer);
		}
		Blob::from(tile)
	}

	#[test]
	fn extracts_layer_names() -> Result<()> {
		let tile = encode_tile(&[encode_layer("water", true), encode_layer("roads", false)]);
		assert_eq!(vector_layer_names(&tile)?, vec!["water", "roads"]);
		Ok(())
	}

	#[test]
	fn empty_tile_has_no_layers() -> Result<()> {
		assert!(vector_layer_names(&Blob::new_empty())?.is_empty());
		Ok(())
	}

	#[test]
	fn truncated_tile_fails() {
		let mut tile = encode_tile(&[encode_layer("water", false)]).into_vec();
		tile.truncate(tile.len() - 2);
		assert!(vector_layer_names(&Blob::from(tile)).is_err());
	}

	#[test]
	fn layers_json() {
		let names = vec!["water".to_string(), "roads".to_string()];
		assert_eq!(vector_layers_json(&names), r#"[{"id":"water"},{"id":"roads"}]"#);
	}

	#[test]
	fn metadata_accessors() {
		let mut meta = ArchiveMetadata::new();
		meta.set("format", "pbf");
		meta.set("bounds", "-10,-5, 10,5");
		meta.set("minzoom", "2");
		meta.set("maxzoom", "9");
		assert_eq!(meta.tile_format(), Some(TileFormat::PBF));
		assert_eq!(meta.bounds().unwrap().as_array(), [-10.0, -5.0, 10.0, 5.0]);
		assert_eq!(meta.minzoom(), Some(2));
		assert_eq!(meta.maxzoom(), Some(9));
	}

	#[test]
	fn center_derivation() {
		let mut meta = ArchiveMetadata::new();
		meta.derive_center();
		assert!(!meta.contains("center")); // no bounds, nothing to derive

		meta.set("bounds", "0,0,10,20");
		meta.set("minzoom", "3");
		meta.set("maxzoom", "8");
		meta.derive_center();
		assert_eq!(meta.get("center"), Some("5,10,5"));

		// an explicit center is never overwritten
		meta.set("center", "1,2,3");
		meta.derive_center();
		assert_eq!(meta.get("center"), Some("1,2,3"));
	}
}
