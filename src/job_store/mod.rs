//! Job run history.
//!
//! Every scheduler attempt is recorded here so a restarted process can tell
//! which runs were interrupted and operators can inspect recent failures.

mod models;
mod schema;
mod sqlite_job_store;

pub use models::*;
pub use schema::JOB_VERSIONED_SCHEMAS;
pub use sqlite_job_store::SqliteJobStore;

use anyhow::Result;
use chrono::{DateTime, Utc};

pub trait JobStore: Send + Sync {
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64>;
    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    fn get_running_jobs(&self) -> Result<Vec<JobRun>>;
    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;
    /// Mark runs left `running` by a previous process as failed.
    fn mark_stale_jobs_failed(&self) -> Result<usize>;
    /// Delete finished runs started before `cutoff`. Running rows are kept.
    fn delete_runs_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
