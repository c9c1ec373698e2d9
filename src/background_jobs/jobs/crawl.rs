//! Crawl background job.
//!
//! Each run crawls at most one package: the oldest never-seen import path in
//! the new-crawl queue if there is one, otherwise the known package whose
//! refresh is most overdue.

use crate::background_jobs::{BackgroundJob, JobContext, JobError};
use crate::catalog_store::{CatalogStore, CrawlTarget, PackageDocument, PackageEntry, PackageRecord};
use crate::config::CrawlSettings;
use crate::crawler::{CrawlReason, DocumentFetcher, FetchRequest};
use crate::metrics;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a single crawl run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// Nothing queued and no package due.
    Idle,
    NewStored,
    /// The new target resolved to nothing and was marked as a bad crawl.
    NewNotFound,
    NewFailed,
    Refreshed,
    NotModified,
    /// The package disappeared upstream and was removed from the catalog.
    Removed,
    /// The refresh failed and was rescheduled for a retry.
    RefreshFailed,
}

impl CrawlOutcome {
    fn kind(&self) -> &'static str {
        match self {
            CrawlOutcome::Idle => "idle",
            CrawlOutcome::NewStored | CrawlOutcome::NewNotFound | CrawlOutcome::NewFailed => "new",
            _ => "refresh",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            CrawlOutcome::Idle => "idle",
            CrawlOutcome::NewStored | CrawlOutcome::Refreshed => "stored",
            CrawlOutcome::NewNotFound => "bad_crawl",
            CrawlOutcome::NewFailed | CrawlOutcome::RefreshFailed => "failed",
            CrawlOutcome::NotModified => "not_modified",
            CrawlOutcome::Removed => "removed",
        }
    }
}

pub struct CrawlJob {
    settings: CrawlSettings,
    fetcher: Arc<dyn DocumentFetcher>,
}

/// `now + delta`, saturating at the latest representable time.
fn after(now: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    now.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl CrawlJob {
    pub fn new(settings: CrawlSettings, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self { settings, fetcher }
    }

    fn max_age(&self) -> Duration {
        i64::try_from(self.settings.max_age_hours)
            .ok()
            .and_then(Duration::try_hours)
            .unwrap_or(Duration::MAX)
    }

    /// Delay before retrying a failed refresh. Never shorter than a second,
    /// the resolution of stored crawl times.
    fn retry_delay(&self) -> Duration {
        let divisor = i32::try_from(self.settings.refresh_retry_divisor)
            .unwrap_or(i32::MAX)
            .max(1);
        (self.max_age() / divisor).max(Duration::seconds(1))
    }

    /// Crawl at most one target as of `now`.
    pub fn run_at(&self, catalog: &dyn CatalogStore, now: DateTime<Utc>) -> Result<CrawlOutcome, JobError> {
        let target = catalog
            .pop_new_crawl()
            .map_err(|e| JobError::ExecutionFailed(format!("Failed to pop new crawl target: {:#}", e)))?;
        if let Some(target) = target {
            return Ok(self.crawl_new(catalog, &target, now));
        }

        let entry = catalog
            .get_most_overdue()
            .map_err(|e| JobError::ExecutionFailed(format!("Failed to read most overdue package: {:#}", e)))?;
        let Some(entry) = entry else {
            debug!("Catalog is empty, nothing to crawl");
            return Ok(CrawlOutcome::Idle);
        };
        if entry.next_crawl > now {
            debug!(
                "Next refresh ({}) not due until {}",
                entry.record.import_path, entry.next_crawl
            );
            return Ok(CrawlOutcome::Idle);
        }

        Ok(self.refresh(catalog, &entry, now))
    }

    fn crawl_new(&self, catalog: &dyn CatalogStore, target: &CrawlTarget, now: DateTime<Utc>) -> CrawlOutcome {
        let request = FetchRequest::new_target(&target.import_path, target.has_subdirs);

        match self.fetcher.fetch(&request) {
            Ok(Some(document)) => {
                match catalog.put_package(&document, Some(after(now, self.max_age())), false) {
                    Ok(()) => {
                        info!("Crawled new package {}", document.import_path);
                        CrawlOutcome::NewStored
                    }
                    Err(e) => {
                        error!("Failed to store new package {}: {:#}", document.import_path, e);
                        CrawlOutcome::NewFailed
                    }
                }
            }
            Ok(None) => {
                info!("New target {} has no package, marking as bad crawl", target.import_path);
                if let Err(e) = catalog.mark_bad_crawl(&target.import_path) {
                    error!("Failed to mark bad crawl {}: {:#}", target.import_path, e);
                }
                CrawlOutcome::NewNotFound
            }
            Err(e) => {
                warn!("Crawl of new target {} failed: {:#}", target.import_path, e);
                CrawlOutcome::NewFailed
            }
        }
    }

    fn refresh(&self, catalog: &dyn CatalogStore, entry: &PackageEntry, now: DateTime<Utc>) -> CrawlOutcome {
        let record = &entry.record;
        let request = FetchRequest {
            import_path: record.import_path.clone(),
            reason: CrawlReason::Refresh,
            prior: Some(record.document()),
            has_subdirs: !entry.subdirs.is_empty(),
            prior_crawl: Some(entry.next_crawl),
        };

        let result = self
            .fetcher
            .fetch(&request)
            .and_then(|document| self.store_refresh(catalog, record, document, now));

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let retry_at = after(now, self.retry_delay());
                warn!(
                    "Refresh of {} failed, retrying after {}: {:#}",
                    record.import_path, retry_at, e
                );
                if let Err(e) = catalog.set_next_crawl_etag(&record.project_root, &record.etag, retry_at) {
                    error!("Failed to reschedule {}: {:#}", record.import_path, e);
                }
                CrawlOutcome::RefreshFailed
            }
        }
    }

    fn store_refresh(
        &self,
        catalog: &dyn CatalogStore,
        prior: &PackageRecord,
        document: Option<PackageDocument>,
        now: DateTime<Utc>,
    ) -> Result<CrawlOutcome> {
        let next_crawl = after(now, self.max_age());

        let Some(document) = document else {
            info!("Package {} no longer exists, removing it", prior.import_path);
            catalog.delete_package(&prior.import_path)?;
            return Ok(CrawlOutcome::Removed);
        };

        if !document.etag.is_empty() && document.etag == prior.etag {
            debug!("Package {} not modified", prior.import_path);
            catalog.set_next_crawl_etag(&document.project_root, &document.etag, next_crawl)?;
            return Ok(CrawlOutcome::NotModified);
        }

        catalog.put_package(&document, Some(next_crawl), prior.suppressed)?;
        info!("Refreshed package {}", document.import_path);
        Ok(CrawlOutcome::Refreshed)
    }
}

impl BackgroundJob for CrawlJob {
    fn id(&self) -> &'static str {
        "crawl"
    }

    fn name(&self) -> &'static str {
        "Crawl"
    }

    fn description(&self) -> &'static str {
        "Crawl one new import path or refresh the most overdue package"
    }

    fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.settings.interval_secs)
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let outcome = self.run_at(ctx.catalog_store.as_ref(), Utc::now())?;
        metrics::record_crawl_outcome(outcome.kind(), outcome.label());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::testing::{doc, FaultyCatalogStore};
    use anyhow::bail;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Response {
        Found(PackageDocument),
        Missing,
        Fail,
    }

    #[derive(Default)]
    struct FakeFetcher {
        responses: Mutex<HashMap<String, Response>>,
        requests: Mutex<Vec<FetchRequest>>,
    }

    impl FakeFetcher {
        fn respond(&self, import_path: &str, response: Response) {
            self.responses
                .lock()
                .unwrap()
                .insert(import_path.to_string(), response);
        }

        fn requested(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.import_path.clone())
                .collect()
        }
    }

    impl DocumentFetcher for FakeFetcher {
        fn fetch(&self, request: &FetchRequest) -> Result<Option<PackageDocument>> {
            self.requests.lock().unwrap().push(request.clone());
            match self.responses.lock().unwrap().get(&request.import_path) {
                Some(Response::Found(document)) => Ok(Some(document.clone())),
                Some(Response::Missing) | None => Ok(None),
                Some(Response::Fail) => bail!("upstream timeout"),
            }
        }
    }

    fn settings() -> CrawlSettings {
        CrawlSettings {
            interval_secs: 1,
            max_age_hours: 24,
            refresh_retry_divisor: 3,
        }
    }

    fn setup() -> (CrawlJob, Arc<FakeFetcher>, FaultyCatalogStore) {
        let fetcher = Arc::new(FakeFetcher::default());
        let job = CrawlJob::new(settings(), fetcher.clone());
        (job, fetcher, FaultyCatalogStore::new())
    }

    fn next_crawl_of(catalog: &FaultyCatalogStore, import_path: &str) -> i64 {
        catalog
            .get_package(import_path)
            .unwrap()
            .unwrap()
            .next_crawl
            .timestamp()
    }

    #[test]
    fn test_new_target_without_document_is_marked_bad() {
        let (job, fetcher, catalog) = setup();
        catalog.add_new_crawl("example.com/foo", false).unwrap();
        fetcher.respond("example.com/foo", Response::Missing);

        let outcome = job.run_at(&catalog, Utc::now()).unwrap();

        assert_eq!(outcome, CrawlOutcome::NewNotFound);
        assert!(catalog.is_bad_crawl("example.com/foo").unwrap());
        assert!(catalog.get_package("example.com/foo").unwrap().is_none());
        assert!(catalog.pop_new_crawl().unwrap().is_none());
    }

    #[test]
    fn test_nothing_due_does_nothing() {
        let (job, fetcher, catalog) = setup();
        let now = Utc::now();
        catalog
            .put_package(&doc("example.com/a", "example.com/a", "1"), Some(now + Duration::hours(1)), false)
            .unwrap();

        assert_eq!(job.run_at(&catalog, now).unwrap(), CrawlOutcome::Idle);
        assert!(fetcher.requested().is_empty());
    }

    #[test]
    fn test_empty_catalog_is_idle() {
        let (job, fetcher, catalog) = setup();
        assert_eq!(job.run_at(&catalog, Utc::now()).unwrap(), CrawlOutcome::Idle);
        assert!(fetcher.requested().is_empty());
    }

    #[test]
    fn test_new_target_takes_precedence_over_refresh() {
        let (job, fetcher, catalog) = setup();
        let now = Utc::now();
        let overdue = now - Duration::hours(5);
        catalog
            .put_package(&doc("example.com/old", "example.com/old", "1"), Some(overdue), false)
            .unwrap();
        catalog.add_new_crawl("example.com/new", true).unwrap();
        fetcher.respond(
            "example.com/new",
            Response::Found(doc("example.com/new", "example.com/new", "1")),
        );

        assert_eq!(job.run_at(&catalog, now).unwrap(), CrawlOutcome::NewStored);
        assert_eq!(fetcher.requested(), vec!["example.com/new"]);
        assert_eq!(next_crawl_of(&catalog, "example.com/old"), overdue.timestamp());
        assert_eq!(
            next_crawl_of(&catalog, "example.com/new"),
            (now + Duration::hours(24)).timestamp()
        );

        let request = fetcher.requests.lock().unwrap()[0].clone();
        assert_eq!(request.reason, CrawlReason::New);
        assert!(request.has_subdirs);
    }

    #[test]
    fn test_at_most_one_target_per_run() {
        let (job, fetcher, catalog) = setup();
        catalog.add_new_crawl("example.com/one", false).unwrap();
        catalog.add_new_crawl("example.com/two", false).unwrap();

        job.run_at(&catalog, Utc::now()).unwrap();

        assert_eq!(fetcher.requested().len(), 1);
        assert!(catalog.pop_new_crawl().unwrap().is_some());
    }

    #[test]
    fn test_new_target_fetch_error_is_not_marked_bad() {
        let (job, fetcher, catalog) = setup();
        catalog.add_new_crawl("example.com/flaky", false).unwrap();
        fetcher.respond("example.com/flaky", Response::Fail);

        assert_eq!(job.run_at(&catalog, Utc::now()).unwrap(), CrawlOutcome::NewFailed);
        assert!(!catalog.is_bad_crawl("example.com/flaky").unwrap());
    }

    #[test]
    fn test_refresh_failure_pushes_next_crawl_forward() {
        let (job, fetcher, catalog) = setup();
        let now = Utc::now();
        catalog
            .put_package(&doc("example.com/a", "example.com/a", "1"), Some(now - Duration::hours(1)), false)
            .unwrap();
        fetcher.respond("example.com/a", Response::Fail);

        assert_eq!(job.run_at(&catalog, now).unwrap(), CrawlOutcome::RefreshFailed);
        assert_eq!(
            next_crawl_of(&catalog, "example.com/a"),
            (now + Duration::hours(8)).timestamp()
        );
    }

    #[test]
    fn test_refresh_store_failure_is_rescheduled() {
        let (job, fetcher, catalog) = setup();
        let now = Utc::now();
        catalog
            .put_package(&doc("example.com/a", "example.com/a", "1"), Some(now - Duration::hours(1)), false)
            .unwrap();
        fetcher.respond(
            "example.com/a",
            Response::Found(doc("example.com/a", "example.com/a", "2")),
        );
        catalog.fail_put_for("example.com/a");

        assert_eq!(job.run_at(&catalog, now).unwrap(), CrawlOutcome::RefreshFailed);
        let entry = catalog.get_package("example.com/a").unwrap().unwrap();
        assert_eq!(entry.record.etag, "1");
        assert_eq!(entry.next_crawl.timestamp(), (now + Duration::hours(8)).timestamp());
    }

    #[test]
    fn test_unchanged_etag_only_reschedules() {
        let (job, fetcher, catalog) = setup();
        let now = Utc::now();
        let mut stored = doc("example.com/a", "example.com/a", "v1");
        stored.synopsis = "original".to_string();
        catalog
            .put_package(&stored, Some(now - Duration::hours(1)), false)
            .unwrap();
        let mut fetched = doc("example.com/a", "example.com/a", "v1");
        fetched.synopsis = "ignored".to_string();
        fetcher.respond("example.com/a", Response::Found(fetched));

        assert_eq!(job.run_at(&catalog, now).unwrap(), CrawlOutcome::NotModified);
        let entry = catalog.get_package("example.com/a").unwrap().unwrap();
        assert_eq!(entry.record.synopsis, "original");
        assert_eq!(entry.next_crawl.timestamp(), (now + Duration::hours(24)).timestamp());

        let request = fetcher.requests.lock().unwrap()[0].clone();
        assert_eq!(request.reason, CrawlReason::Refresh);
        assert_eq!(request.prior.unwrap().etag, "v1");
    }

    #[test]
    fn test_changed_document_keeps_suppression() {
        let (job, fetcher, catalog) = setup();
        let now = Utc::now();
        catalog
            .put_package(&doc("example.com/a", "example.com/a", "v1"), Some(now - Duration::hours(1)), true)
            .unwrap();
        fetcher.respond(
            "example.com/a",
            Response::Found(doc("example.com/a", "example.com/a", "v2")),
        );

        assert_eq!(job.run_at(&catalog, now).unwrap(), CrawlOutcome::Refreshed);
        let entry = catalog.get_package("example.com/a").unwrap().unwrap();
        assert_eq!(entry.record.etag, "v2");
        assert!(entry.record.suppressed);
    }

    #[test]
    fn test_vanished_package_is_removed() {
        let (job, fetcher, catalog) = setup();
        let now = Utc::now();
        catalog
            .put_package(&doc("example.com/a", "example.com/a", "v1"), Some(now - Duration::hours(1)), false)
            .unwrap();
        fetcher.respond("example.com/a", Response::Missing);

        assert_eq!(job.run_at(&catalog, now).unwrap(), CrawlOutcome::Removed);
        assert!(catalog.get_package("example.com/a").unwrap().is_none());
    }

    #[test]
    fn test_catalog_read_failure_fails_the_run() {
        let (job, _fetcher, catalog) = setup();
        catalog.fail_reads();

        let err = job.run_at(&catalog, Utc::now()).unwrap_err();
        assert!(matches!(err, JobError::ExecutionFailed(_)));
    }

    #[test]
    fn test_retry_delay_divisor() {
        let fetcher = Arc::new(FakeFetcher::default());
        let job = CrawlJob::new(
            CrawlSettings {
                refresh_retry_divisor: 4,
                ..settings()
            },
            fetcher.clone(),
        );
        assert_eq!(job.retry_delay(), Duration::hours(6));

        let job = CrawlJob::new(
            CrawlSettings {
                refresh_retry_divisor: 0,
                ..settings()
            },
            fetcher,
        );
        assert_eq!(job.retry_delay(), Duration::hours(24));
    }

    #[test]
    fn test_huge_divisor_still_pushes_refresh_forward() {
        let fetcher = Arc::new(FakeFetcher::default());
        let job = CrawlJob::new(
            CrawlSettings {
                refresh_retry_divisor: u32::MAX,
                ..settings()
            },
            fetcher.clone(),
        );
        assert!(job.retry_delay() >= Duration::seconds(1));

        let catalog = FaultyCatalogStore::new();
        let now = Utc::now();
        catalog
            .put_package(&doc("example.com/a", "example.com/a", "1"), Some(now - Duration::days(1)), false)
            .unwrap();
        fetcher.respond("example.com/a", Response::Fail);

        assert_eq!(job.run_at(&catalog, now).unwrap(), CrawlOutcome::RefreshFailed);
        assert!(next_crawl_of(&catalog, "example.com/a") > now.timestamp());
        // The failed package no longer blocks the next tick
        assert_eq!(job.run_at(&catalog, now).unwrap(), CrawlOutcome::Idle);
    }

    #[test]
    fn test_huge_max_age_saturates_instead_of_panicking() {
        let fetcher = Arc::new(FakeFetcher::default());
        let job = CrawlJob::new(
            CrawlSettings {
                max_age_hours: u64::MAX,
                ..settings()
            },
            fetcher.clone(),
        );
        let catalog = FaultyCatalogStore::new();
        catalog.add_new_crawl("example.com/a", false).unwrap();
        fetcher.respond(
            "example.com/a",
            Response::Found(doc("example.com/a", "example.com/a", "1")),
        );

        let now = Utc::now();
        assert_eq!(job.run_at(&catalog, now).unwrap(), CrawlOutcome::NewStored);
        assert!(next_crawl_of(&catalog, "example.com/a") > now.timestamp());
    }
}
