use crate::Blob;

/// Lowercase hex MD5 digest, the content hash stored next to every tile.
pub fn md5_hex(blob: &Blob) -> String {
	format!("{:x}", md5::compute(blob.as_slice()))
}
