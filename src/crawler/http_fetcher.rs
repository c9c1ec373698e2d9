//! HTTP client for the document service that fetches and parses packages.

use super::{DocumentFetcher, FetchRequest};
use crate::catalog_store::PackageDocument;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::time::Duration;

pub struct HttpDocumentFetcher {
    client: Client,
    base_url: String,
}

impl HttpDocumentFetcher {
    /// Create a new fetcher.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the document service (e.g., "http://localhost:8081")
    /// * `timeout_sec` - Request timeout in seconds
    pub fn new(base_url: &str, timeout_sec: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("docindex-scheduler/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn fetch_url(&self) -> String {
        format!("{}/fetch", self.base_url)
    }
}

impl DocumentFetcher for HttpDocumentFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<Option<PackageDocument>> {
        let response = self
            .client
            .post(self.fetch_url())
            .json(request)
            .send()
            .with_context(|| format!("Failed to reach document service for {}", request.import_path))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            // Unchanged upstream, the stored document is still current
            StatusCode::NOT_MODIFIED => Ok(request.prior.clone()),
            status if status.is_success() => {
                let document: PackageDocument = response
                    .json()
                    .with_context(|| format!("Failed to parse document for {}", request.import_path))?;
                Ok(Some(document))
            }
            status => anyhow::bail!(
                "Document service failed for {} with status {}",
                request.import_path,
                status
            ),
        }
    }
}
