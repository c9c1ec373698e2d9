//! CatalogStore trait definition.
//!
//! The narrow set of catalog operations the background jobs rely on. The
//! catalog itself is shared with the rest of the indexing service, so every
//! implementation must be safe to call from any thread.

use super::models::{CrawlTarget, PackageDocument, PackageEntry, PackageRecord};
use anyhow::Result;
use chrono::{DateTime, Utc};

#[cfg_attr(feature = "mock", mockall::automock)]
pub trait CatalogStore: Send + Sync {
    // =========================================================================
    // New-crawl queue
    // =========================================================================

    /// Queue a never-seen import path for crawling.
    ///
    /// Returns false when the path was refused because it is a known bad
    /// crawl. Queueing a path that is already pending is a no-op.
    fn add_new_crawl(&self, import_path: &str, has_subdirs: bool) -> Result<bool>;

    /// Remove and return the oldest pending crawl target, if any.
    fn pop_new_crawl(&self) -> Result<Option<CrawlTarget>>;

    /// Remember that an import path resolved to nothing.
    fn mark_bad_crawl(&self, import_path: &str) -> Result<()>;

    fn is_bad_crawl(&self, import_path: &str) -> Result<bool>;

    // =========================================================================
    // Packages
    // =========================================================================

    fn get_package(&self, import_path: &str) -> Result<Option<PackageEntry>>;

    /// The package whose next crawl time is the earliest, due or not.
    fn get_most_overdue(&self) -> Result<Option<PackageEntry>>;

    /// Set the next crawl time of every package in `project_root` whose
    /// stored etag equals `etag`. Packages with a different etag are stale
    /// and keep their earlier schedule.
    fn set_next_crawl_etag(&self, project_root: &str, etag: &str, at: DateTime<Utc>)
        -> Result<()>;

    /// Make every package in `project_root` the most overdue for crawling.
    /// Returns the number of packages bumped.
    fn bump_crawl(&self, project_root: &str) -> Result<usize>;

    fn all_packages(&self) -> Result<Vec<PackageRecord>>;

    /// Insert or replace a package.
    ///
    /// With `next_crawl` set to `None` an existing package keeps its crawl
    /// schedule and a new package is due immediately.
    fn put_package(
        &self,
        document: &PackageDocument,
        next_crawl: Option<DateTime<Utc>>,
        suppressed: bool,
    ) -> Result<()>;

    fn delete_package(&self, import_path: &str) -> Result<()>;

    /// Number of catalog packages importing `import_path`.
    fn importer_count(&self, import_path: &str) -> Result<usize>;

    // =========================================================================
    // Named blobs
    // =========================================================================

    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn write_blob(&self, key: &str, value: &[u8]) -> Result<()>;
}
