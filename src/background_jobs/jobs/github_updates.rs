//! Update feed polling background job.
//!
//! Reads the persisted feed cursor, asks the feed for everything that changed
//! since, bumps the changed projects to the front of the refresh order and
//! only then stores the new cursor. A crash before the cursor is written just
//! re-bumps the same projects on the next run.

use crate::background_jobs::{BackgroundJob, JobContext, JobError};
use crate::catalog_store::CatalogStore;
use crate::config::GitHubUpdatesSettings;
use crate::github::UpdateFeed;
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Catalog blob holding the feed cursor.
pub const UPDATE_CURSOR_KEY: &str = "github_updates";

/// Opaque "last update seen" marker of the update feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateCursor(pub String);

impl UpdateCursor {
    /// Load the cursor from the catalog. A missing blob is an empty cursor.
    pub fn load(catalog: &dyn CatalogStore) -> Result<Self, JobError> {
        let blob = catalog
            .read_blob(UPDATE_CURSOR_KEY)
            .map_err(|e| JobError::ExecutionFailed(format!("Failed to read update cursor: {:#}", e)))?;

        match blob {
            None => Ok(Self::default()),
            Some(bytes) => serde_json::from_slice::<String>(&bytes)
                .map(Self)
                .map_err(|e| JobError::Config(format!("Stored update cursor is corrupt: {}", e))),
        }
    }

    pub fn store(&self, catalog: &dyn CatalogStore) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(&self.0)?;
        catalog.write_blob(UPDATE_CURSOR_KEY, &bytes)
    }
}

/// Summary of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub changed: usize,
    pub bumped: usize,
    pub failed: usize,
}

pub struct UpdatePollJob {
    settings: GitHubUpdatesSettings,
    feed: Arc<dyn UpdateFeed>,
}

impl UpdatePollJob {
    pub fn new(settings: GitHubUpdatesSettings, feed: Arc<dyn UpdateFeed>) -> Self {
        Self { settings, feed }
    }

    pub fn poll(&self, catalog: &dyn CatalogStore) -> Result<PollSummary, JobError> {
        let cursor = UpdateCursor::load(catalog)?;
        debug!("Polling update feed from cursor '{}'", cursor.0);

        let batch = self
            .feed
            .poll_updates(&cursor.0)
            .map_err(|e| JobError::ExecutionFailed(format!("Update feed request failed: {:#}", e)))?;
        metrics::record_feed_changes(batch.changed.len());

        let mut summary = PollSummary {
            changed: batch.changed.len(),
            bumped: 0,
            failed: 0,
        };
        for id in &batch.changed {
            let project_root = self.feed.project_root(id);
            match catalog.bump_crawl(&project_root) {
                Ok(count) => {
                    debug!("Bumped {} packages of {}", count, project_root);
                    summary.bumped += count;
                }
                Err(e) => {
                    warn!("Failed to bump crawl of {}: {:#}", project_root, e);
                    summary.failed += 1;
                }
            }
        }

        UpdateCursor(batch.cursor)
            .store(catalog)
            .map_err(|e| JobError::ExecutionFailed(format!("Failed to store update cursor: {:#}", e)))?;

        Ok(summary)
    }
}

impl BackgroundJob for UpdatePollJob {
    fn id(&self) -> &'static str {
        "github_updates"
    }

    fn name(&self) -> &'static str {
        "GitHub Updates"
    }

    fn description(&self) -> &'static str {
        "Queue recently pushed repositories for priority re-crawl"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.interval_secs)
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let summary = self.poll(ctx.catalog_store.as_ref())?;
        info!(
            "Update feed reported {} changed projects, bumped {} packages ({} failures)",
            summary.changed, summary.bumped, summary.failed
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::testing::{doc, FaultyCatalogStore};
    use crate::github::UpdateBatch;
    use anyhow::{bail, Result};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Mutex;

    /// Feed returning a fixed batch and recording the cursors it was asked for.
    struct FakeFeed {
        batch: Option<UpdateBatch>,
        cursors: Mutex<Vec<String>>,
    }

    impl FakeFeed {
        fn returning(cursor: &str, changed: &[&str]) -> Self {
            Self {
                batch: Some(UpdateBatch {
                    cursor: cursor.to_string(),
                    changed: changed.iter().map(|s| s.to_string()).collect(),
                }),
                cursors: Mutex::new(vec![]),
            }
        }

        fn failing() -> Self {
            Self {
                batch: None,
                cursors: Mutex::new(vec![]),
            }
        }
    }

    impl UpdateFeed for FakeFeed {
        fn poll_updates(&self, cursor: &str) -> Result<UpdateBatch> {
            self.cursors.lock().unwrap().push(cursor.to_string());
            match &self.batch {
                Some(batch) => Ok(batch.clone()),
                None => bail!("rate limited"),
            }
        }

        fn project_root(&self, id: &str) -> String {
            format!("github.com/{}", id)
        }
    }

    fn settings() -> GitHubUpdatesSettings {
        GitHubUpdatesSettings { interval_secs: 60 }
    }

    fn seed(catalog: &FaultyCatalogStore, project_root: &str) {
        catalog
            .put_package(
                &doc(project_root, project_root, "1"),
                Some(Utc::now() + ChronoDuration::days(1)),
                false,
            )
            .unwrap();
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
    fn test_all_changes_bumped_then_cursor_advanced() {
        let catalog = FaultyCatalogStore::new();
        seed(&catalog, "github.com/x");
        seed(&catalog, "github.com/y");
        UpdateCursor("A".to_string()).store(&catalog).unwrap();
        let feed = Arc::new(FakeFeed::returning("B", &["x", "y"]));
        let job = UpdatePollJob::new(settings(), feed.clone());

        let summary = job.poll(&catalog).unwrap();

        assert_eq!(feed.cursors.lock().unwrap().as_slice(), ["A"]);
        assert_eq!(summary, PollSummary { changed: 2, bumped: 2, failed: 0 });
        assert_eq!(next_crawl_of(&catalog, "github.com/x"), 0);
        assert_eq!(next_crawl_of(&catalog, "github.com/y"), 0);
        assert_eq!(UpdateCursor::load(&catalog).unwrap().0, "B");
    }

    #[test]
    fn test_failed_bump_is_logged_and_cursor_still_advances() {
        let catalog = FaultyCatalogStore::new();
        seed(&catalog, "github.com/x");
        seed(&catalog, "github.com/y");
        UpdateCursor("A".to_string()).store(&catalog).unwrap();
        catalog.fail_bump_for("github.com/y");
        let job = UpdatePollJob::new(settings(), Arc::new(FakeFeed::returning("B", &["x", "y"])));

        let summary = job.poll(&catalog).unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(next_crawl_of(&catalog, "github.com/x"), 0);
        assert_ne!(next_crawl_of(&catalog, "github.com/y"), 0);
        assert_eq!(UpdateCursor::load(&catalog).unwrap().0, "B");
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let catalog = FaultyCatalogStore::new();
        seed(&catalog, "github.com/x");
        let job = UpdatePollJob::new(settings(), Arc::new(FakeFeed::returning("B", &["x"])));

        job.poll(&catalog).unwrap();
        job.poll(&catalog).unwrap();

        assert_eq!(next_crawl_of(&catalog, "github.com/x"), 0);
        assert_eq!(UpdateCursor::load(&catalog).unwrap().0, "B");
    }

    #[test]
    fn test_missing_cursor_starts_empty() {
        let catalog = FaultyCatalogStore::new();
        let feed = Arc::new(FakeFeed::returning("B", &[]));
        let job = UpdatePollJob::new(settings(), feed.clone());

        job.poll(&catalog).unwrap();

        assert_eq!(feed.cursors.lock().unwrap().as_slice(), [""]);
    }

    #[test]
    fn test_corrupt_cursor_fails_without_polling() {
        let catalog = FaultyCatalogStore::new();
        catalog.write_blob(UPDATE_CURSOR_KEY, b"\xff not json").unwrap();
        let feed = Arc::new(FakeFeed::returning("B", &["x"]));
        let job = UpdatePollJob::new(settings(), feed.clone());

        let err = job.poll(&catalog).unwrap_err();

        assert!(matches!(err, JobError::Config(_)));
        assert!(feed.cursors.lock().unwrap().is_empty());
        assert_eq!(
            catalog.read_blob(UPDATE_CURSOR_KEY).unwrap().unwrap(),
            b"\xff not json".to_vec()
        );
    }

    #[test]
    fn test_feed_failure_keeps_cursor() {
        let catalog = FaultyCatalogStore::new();
        UpdateCursor("A".to_string()).store(&catalog).unwrap();
        let job = UpdatePollJob::new(settings(), Arc::new(FakeFeed::failing()));

        let err = job.poll(&catalog).unwrap_err();

        assert!(matches!(err, JobError::ExecutionFailed(_)));
        assert_eq!(UpdateCursor::load(&catalog).unwrap().0, "A");
    }
}
