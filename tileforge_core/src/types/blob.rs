//! This module provides the [`Blob`] struct, a thin wrapper around [`Vec<u8>`]
//! used as the universal payload type for tile data and resources.
//!
//! # Examples
//!
//! ```rust
//! use tileforge_core::Blob;
//!
//! let blob = Blob::from(vec![0u8, 1, 2, 3]);
//! assert_eq!(blob.len(), 4);
//! assert_eq!(blob.as_slice(), &[0, 1, 2, 3]);
//!
//! let text = Blob::from("Xylofön");
//! assert_eq!(text.as_str(), "Xylofön");
//! ```

use std::fmt::Debug;

/// A byte payload: a tile, a glyph range, a sprite sheet, a style document.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Blob(Vec<u8>);

impl Blob {
	/// Creates an empty `Blob`.
	pub fn new_empty() -> Blob {
		Blob(Vec::new())
	}

	/// Returns the underlying bytes as a slice.
	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}

	/// Interprets the bytes as UTF-8, replacing invalid sequences.
	pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
		String::from_utf8_lossy(&self.0)
	}

	/// Consumes the `Blob`, returning the underlying vector.
	pub fn into_vec(self) -> Vec<u8> {
		self.0
	}

	pub fn len(&self) -> u64 {
		self.0.len() as u64
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl From<Vec<u8>> for Blob {
	fn from(vec: Vec<u8>) -> Self {
		Blob(vec)
	}
}

impl From<&Vec<u8>> for Blob {
	fn from(vec: &Vec<u8>) -> Self {
		Blob(vec.clone())
	}
}

impl From<&[u8]> for Blob {
	fn from(slice: &[u8]) -> Self {
		Blob(slice.to_vec())
	}
}

impl<const N: usize> From<&[u8; N]> for Blob {
	fn from(slice: &[u8; N]) -> Self {
		Blob(slice.to_vec())
	}
}

impl From<&str> for Blob {
	fn from(text: &str) -> Self {
		Blob(text.as_bytes().to_vec())
	}
}

impl From<String> for Blob {
	fn from(text: String) -> Self {
		Blob(text.into_bytes())
	}
}

impl From<&String> for Blob {
	fn from(text: &String) -> Self {
		Blob(text.as_bytes().to_vec())
	}
}

impl Debug for Blob {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_fmt(format_args!("Blob({} bytes)", self.0.len()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn basic_accessors() {
		let blob = Blob::from(vec![1u8, 2, 3]);
		assert_eq!(blob.len(), 3);
		assert!(!blob.is_empty());
		assert_eq!(blob.as_slice(), &[1, 2, 3]);
		assert_eq!(blob.clone().into_vec(), vec![1, 2, 3]);
	}

	#[test]
	fn empty() {
		let blob = Blob::new_empty();
		assert_eq!(blob.len(), 0);
		assert!(blob.is_empty());
	}

	#[test]
	fn from_text() {
		let blob = Blob::from("Xylofön");
		assert_eq!(blob.as_str(), "Xylofön");
		assert_eq!(format!("{blob:?}"), "Blob(8 bytes)");
	}
}
