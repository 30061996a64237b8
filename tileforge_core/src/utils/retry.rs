//! The shared retry policy for transient failures.
//!
//! Network errors, `SQLITE_BUSY` and lock contention are retried with a
//! fixed backoff; validation errors are not, so callers wrap only the
//! operation that is actually transient.

use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;

/// Runs `f` up to `max_try` times, sleeping `backoff_ms` between attempts.
///
/// Returns the first success, or the last error annotated with the attempt
/// count. `max_try` of zero behaves like one.
pub async fn retry<T, F, Fut>(mut f: F, max_try: u32, backoff_ms: u64) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let max_try = max_try.max(1);
	let mut attempt = 0;
	loop {
		attempt += 1;
		match f().await {
			Ok(value) => return Ok(value),
			Err(error) if attempt < max_try => {
				log::warn!("attempt {attempt}/{max_try} failed: {error:#}");
				tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
			}
			Err(error) => return Err(error).with_context(|| format!("failed after {attempt} attempts")),
		}
	}
}
