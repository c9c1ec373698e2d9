//! Job history cleanup background job.
//!
//! Every scheduler attempt leaves a row in the job history, so the history is
//! trimmed to the configured retention period.

use crate::background_jobs::{BackgroundJob, JobContext, JobError};
use crate::config::JobHistoryCleanupSettings;
use crate::job_store::JobStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

pub struct JobHistoryCleanupJob {
    settings: JobHistoryCleanupSettings,
    job_store: Arc<dyn JobStore>,
}

impl JobHistoryCleanupJob {
    pub fn new(settings: JobHistoryCleanupSettings, job_store: Arc<dyn JobStore>) -> Self {
        Self {
            settings,
            job_store,
        }
    }

    /// Delete finished runs older than the retention period as of `now`.
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> Result<usize, JobError> {
        let retention = Duration::try_days(i64::from(self.settings.retention_days))
            .ok_or_else(|| JobError::Config("job history retention is out of range".to_string()))?;
        let cutoff = now
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        debug!(
            "Deleting job runs older than {} days (cutoff: {})",
            self.settings.retention_days, cutoff
        );
        self.job_store
            .delete_runs_older_than(cutoff)
            .map_err(|e| JobError::ExecutionFailed(format!("Failed to trim job history: {:#}", e)))
    }
}

impl BackgroundJob for JobHistoryCleanupJob {
    fn id(&self) -> &'static str {
        "job_history_cleanup"
    }

    fn name(&self) -> &'static str {
        "Job History Cleanup"
    }

    fn description(&self) -> &'static str {
        "Delete old job run history based on retention policy"
    }

    fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.settings.interval_secs)
    }

    fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
        let deleted = self.cleanup_at(Utc::now())?;
        if deleted > 0 {
            info!("Deleted {} old job runs", deleted);
        }
        Ok(())
    }
}
