//! HTTP fetches for bootstrap scripts, the KPM patcher and version files.
//!
//! The build is synchronous; each fetch spins the request on a tokio
//! runtime with `block_on`. There is no retry and no timeout beyond the
//! client's defaults: a failed fetch is reported and the caller decides
//! whether it is fatal.

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Anything that can fetch a URL into memory.
pub trait Fetch {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    /// Fetch and decode as UTF-8 text.
    fn fetch_text(&self, url: &str) -> Result<String> {
        let bytes = self.fetch(url)?;
        String::from_utf8(bytes).with_context(|| format!("Response from {} is not UTF-8", url))
    }

    /// Fetch into `dest`, creating parent directories.
    fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<()> {
        let bytes = self.fetch(url)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        std::fs::write(dest, bytes).with_context(|| format!("Failed to write {}", dest.display()))
    }
}

/// Production fetcher backed by reqwest.
pub struct HttpFetcher {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("akbuild/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { runtime, client })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.runtime.block_on(async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .with_context(|| format!("HTTP request failed: {}", url))?;

            let status = response.status();
            if !status.is_success() {
                bail!(
                    "HTTP {} for {}: {}",
                    status.as_u16(),
                    url,
                    status.canonical_reason().unwrap_or("Unknown error")
                );
            }

            let body = response
                .bytes()
                .await
                .with_context(|| format!("Failed to read response body from {}", url))?;
            Ok(body.to_vec())
        })
    }
}
