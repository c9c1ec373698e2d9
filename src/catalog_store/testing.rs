//! Catalog test doubles shared by the job tests.

use super::models::{CrawlTarget, PackageDocument, PackageEntry, PackageRecord};
use super::store::SqliteCatalogStore;
use super::trait_def::CatalogStore;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Mutex;
use tempfile::TempDir;

/// A real SQLite catalog in a temp dir whose individual operations can be
/// made to fail on demand.
pub struct FaultyCatalogStore {
    inner: SqliteCatalogStore,
    failing_bumps: Mutex<HashSet<String>>,
    failing_puts: Mutex<HashSet<String>>,
    fail_reads: Mutex<bool>,
    _temp_dir: TempDir,
}

impl FaultyCatalogStore {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let inner = SqliteCatalogStore::new(temp_dir.path().join("catalog.db")).unwrap();
        Self {
            inner,
            failing_bumps: Mutex::new(HashSet::new()),
            failing_puts: Mutex::new(HashSet::new()),
            fail_reads: Mutex::new(false),
            _temp_dir: temp_dir,
        }
    }

    pub fn fail_bump_for(&self, project_root: &str) {
        self.failing_bumps
            .lock()
            .unwrap()
            .insert(project_root.to_string());
    }

    pub fn fail_put_for(&self, import_path: &str) {
        self.failing_puts
            .lock()
            .unwrap()
            .insert(import_path.to_string());
    }

    pub fn fail_reads(&self) {
        *self.fail_reads.lock().unwrap() = true;
    }

    fn check_reads(&self) -> Result<()> {
        if *self.fail_reads.lock().unwrap() {
            bail!("catalog unavailable");
        }
        Ok(())
    }
}

impl CatalogStore for FaultyCatalogStore {
    fn add_new_crawl(&self, import_path: &str, has_subdirs: bool) -> Result<bool> {
        self.inner.add_new_crawl(import_path, has_subdirs)
    }

    fn pop_new_crawl(&self) -> Result<Option<CrawlTarget>> {
        self.check_reads()?;
        self.inner.pop_new_crawl()
    }

    fn mark_bad_crawl(&self, import_path: &str) -> Result<()> {
        self.inner.mark_bad_crawl(import_path)
    }

    fn is_bad_crawl(&self, import_path: &str) -> Result<bool> {
        self.inner.is_bad_crawl(import_path)
    }

    fn get_package(&self, import_path: &str) -> Result<Option<PackageEntry>> {
        self.check_reads()?;
        self.inner.get_package(import_path)
    }

    fn get_most_overdue(&self) -> Result<Option<PackageEntry>> {
        self.check_reads()?;
        self.inner.get_most_overdue()
    }

    fn set_next_crawl_etag(
        &self,
        project_root: &str,
        etag: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.set_next_crawl_etag(project_root, etag, at)
    }

    fn bump_crawl(&self, project_root: &str) -> Result<usize> {
        if self.failing_bumps.lock().unwrap().contains(project_root) {
            bail!("bump failed for {}", project_root);
        }
        self.inner.bump_crawl(project_root)
    }

    fn all_packages(&self) -> Result<Vec<PackageRecord>> {
        self.check_reads()?;
        self.inner.all_packages()
    }

    fn put_package(
        &self,
        document: &PackageDocument,
        next_crawl: Option<DateTime<Utc>>,
        suppressed: bool,
    ) -> Result<()> {
        if self
            .failing_puts
            .lock()
            .unwrap()
            .contains(&document.import_path)
        {
            bail!("put failed for {}", document.import_path);
        }
        self.inner.put_package(document, next_crawl, suppressed)
    }

    fn delete_package(&self, import_path: &str) -> Result<()> {
        self.inner.delete_package(import_path)
    }

    fn importer_count(&self, import_path: &str) -> Result<usize> {
        self.inner.importer_count(import_path)
    }

    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_reads()?;
        self.inner.read_blob(key)
    }

    fn write_blob(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner.write_blob(key, value)
    }
}

/// Minimal document for tests.
pub fn doc(import_path: &str, project_root: &str, etag: &str) -> PackageDocument {
    PackageDocument {
        import_path: import_path.to_string(),
        project_root: project_root.to_string(),
        etag: etag.to_string(),
        name: import_path.rsplit('/').next().unwrap_or_default().to_string(),
        synopsis: String::new(),
        imports: vec![],
    }
}
