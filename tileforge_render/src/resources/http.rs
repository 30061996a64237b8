//! The origin HTTP client.
//!
//! Status classification follows the bulk-path rules: `204` and `404` mean
//! "does not exist" and return `None`, success returns the body, anything
//! else is an error the caller may retry.

use anyhow::{Context, Result, bail};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tileforge_core::Blob;

#[derive(Clone, Debug)]
pub struct HttpClient {
	client: Client,
	timeout: Duration,
}

impl HttpClient {
	pub fn new(timeout: Duration) -> Result<HttpClient> {
		let client = Client::builder()
			.tcp_keepalive(Duration::from_secs(600))
			.timeout(timeout)
			.build()
			.context("failed to build http client")?;
		Ok(HttpClient { client, timeout })
	}

	/// Fetches `url`. Returns `None` for `204`/`404`, the body for any
	/// success status, and an error otherwise.
	pub async fn get(&self, url: &str) -> Result<Option<Blob>> {
		let response = self
			.client
			.get(url)
			.timeout(self.timeout)
			.send()
			.await
			.with_context(|| format!("request to {url} failed"))?;

		let status = response.status();
		if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
			return Ok(None);
		}
		if !status.is_success() {
			bail!("request to {url} returned status {status}");
		}

		let bytes = response
			.bytes()
			.await
			.with_context(|| format!("failed to read body of {url}"))?;
		Ok(Some(Blob::from(bytes.to_vec())))
	}
}
