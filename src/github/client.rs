//! Minimal blocking client for the GitHub REST API.

use super::auth::GitHubAuth;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const GITHUB_API_BASE: &str = "https://api.github.com";

pub struct GitHubClient {
    client: Client,
    api_base: String,
}

impl GitHubClient {
    pub fn new(api_base: &str, timeout_sec: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("docindex-scheduler/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create GitHub HTTP client")?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn url(&self, path_and_query: &str) -> String {
        format!("{}/{}", self.api_base, path_and_query.trim_start_matches('/'))
    }

    /// GET a JSON resource. A 404 yields `Ok(None)`.
    pub fn get_json<T: DeserializeOwned>(
        &self,
        path_and_query: &str,
        auth: Option<&GitHubAuth>,
    ) -> Result<Option<T>> {
        let url = self.url(path_and_query);
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(auth) = auth {
            request = request.basic_auth(&auth.client_id, Some(&auth.client_secret));
        }

        let response = request
            .send()
            .with_context(|| format!("GitHub request to {} failed", url))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("GitHub request to {} failed with status {}", url, response.status());
        }

        let body = response
            .json()
            .with_context(|| format!("Failed to parse GitHub response from {}", url))?;
        Ok(Some(body))
    }
}
