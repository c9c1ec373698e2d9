//! Document fetching.
//!
//! The scheduler never parses package sources itself: it hands an import path
//! to a [`DocumentFetcher`] and persists whatever document comes back.

mod http_fetcher;

pub use http_fetcher::HttpDocumentFetcher;

use crate::catalog_store::PackageDocument;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why a package is being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlReason {
    /// First crawl of a queued import path.
    New,
    /// Periodic refresh of a known package.
    Refresh,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchRequest {
    pub import_path: String,
    pub reason: CrawlReason,
    /// The stored document, for refreshes. Lets the fetcher answer "not
    /// modified" by echoing the prior etag.
    pub prior: Option<PackageDocument>,
    pub has_subdirs: bool,
    pub prior_crawl: Option<DateTime<Utc>>,
}

impl FetchRequest {
    pub fn new_target(import_path: &str, has_subdirs: bool) -> Self {
        Self {
            import_path: import_path.to_string(),
            reason: CrawlReason::New,
            prior: None,
            has_subdirs,
            prior_crawl: None,
        }
    }
}

#[cfg_attr(feature = "mock", mockall::automock)]
pub trait DocumentFetcher: Send + Sync {
    /// Fetch and parse the package at `request.import_path`.
    ///
    /// `Ok(None)` means the path resolved to no package at all.
    fn fetch(&self, request: &FetchRequest) -> Result<Option<PackageDocument>>;
}
