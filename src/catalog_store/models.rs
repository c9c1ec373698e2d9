use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A never-crawled import path waiting in the new-crawl queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    pub import_path: String,
    /// Whether the path is known to have crawlable subdirectories.
    pub has_subdirs: bool,
}

/// A parsed package document, as produced by the document fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDocument {
    pub import_path: String,
    /// Root of the repository the package lives in (e.g. `github.com/owner/repo`).
    pub project_root: String,
    /// Opaque version marker of the package source.
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub synopsis: String,
    /// Import paths this package imports.
    #[serde(default)]
    pub imports: Vec<String>,
}

/// A package as persisted in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub import_path: String,
    pub project_root: String,
    pub etag: String,
    pub name: String,
    pub synopsis: String,
    pub imports: Vec<String>,
    pub next_crawl: DateTime<Utc>,
    pub suppressed: bool,
}

impl PackageRecord {
    /// The document part of the record, without crawl bookkeeping.
    pub fn document(&self) -> PackageDocument {
        PackageDocument {
            import_path: self.import_path.clone(),
            project_root: self.project_root.clone(),
            etag: self.etag.clone(),
            name: self.name.clone(),
            synopsis: self.synopsis.clone(),
            imports: self.imports.clone(),
        }
    }

    pub fn is_github(&self) -> bool {
        self.project_root.starts_with("github.com/")
    }
}

/// A package together with what the crawler needs to refresh it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub record: PackageRecord,
    /// Import paths of packages nested below this one.
    pub subdirs: Vec<String>,
    pub next_crawl: DateTime<Utc>,
}
