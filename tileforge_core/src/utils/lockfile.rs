//! Advisory lock files for cross-process file writes.
//!
//! The XYZ tile store and the resource cache share one write discipline:
//! take `<file>.lock` with exclusive create, write `<file>.tmp`, rename it
//! over `<file>`, release the lock. A contended lock is polled every ~25 ms
//! until the caller's timeout expires. Readers never take the lock; the
//! rename keeps them from ever seeing a half-written file.

use anyhow::{Context, Result, bail};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{Instant, sleep};

const LOCK_POLL_MS: u64 = 25;

/// An exclusively held lock file next to its target.
///
/// Dropping the guard removes the lock file; a crashed holder leaves a
/// stale lock behind, which operators remove by hand (the lock carries no
/// PID on purpose, matching the on-disk layout of the original tooling).
pub struct FileLock {
	lock_path: PathBuf,
}

impl FileLock {
	/// Takes the lock for `target`, polling until `timeout` expires.
	pub async fn acquire(target: &Path, timeout: Duration) -> Result<FileLock> {
		let lock_path = sibling_path(target, ".lock")?;
		let deadline = Instant::now() + timeout;

		loop {
			match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
				Ok(_) => return Ok(FileLock { lock_path }),
				Err(error) if error.kind() == ErrorKind::AlreadyExists => {
					if Instant::now() >= deadline {
						bail!("timed out waiting for lock {lock_path:?}");
					}
					sleep(Duration::from_millis(LOCK_POLL_MS)).await;
				}
				Err(error) => {
					return Err(error).with_context(|| format!("failed to create lock {lock_path:?}"));
				}
			}
		}
	}
}

impl Drop for FileLock {
	fn drop(&mut self) {
		let _ = fs::remove_file(&self.lock_path);
	}
}

/// Writes `data` to `path` under the lock-file protocol.
///
/// Parent directories are created as needed. The write lands in
/// `<path>.tmp` first and is renamed into place, so concurrent readers see
/// either the old or the new content, never a torn write.
pub async fn write_file_locked(path: &Path, data: &[u8], timeout: Duration) -> Result<()> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).with_context(|| format!("failed to create directory {parent:?}"))?;
	}

	let _lock = FileLock::acquire(path, timeout).await?;

	let tmp_path = sibling_path(path, ".tmp")?;
	fs::write(&tmp_path, data).with_context(|| format!("failed to write {tmp_path:?}"))?;
	fs::rename(&tmp_path, path).with_context(|| format!("failed to rename {tmp_path:?} to {path:?}"))?;

	Ok(())
}

/// Removes `path` under the lock-file protocol.
///
/// Returns `true` if the file existed.
pub async fn delete_file_locked(path: &Path, timeout: Duration) -> Result<bool> {
	let _lock = FileLock::acquire(path, timeout).await?;

	match fs::remove_file(path) {
		Ok(()) => Ok(true),
		Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
		Err(error) => Err(error).with_context(|| format!("failed to delete {path:?}")),
	}
}

fn sibling_path(path: &Path, suffix: &str) -> Result<PathBuf> {
	let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
		bail!("path {path:?} has no usable file name");
	};
	Ok(path.with_file_name(format!("{file_name}{suffix}")))
}
