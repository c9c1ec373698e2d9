use super::context::JobContext;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during job execution.
#[derive(Debug, Error)]
pub enum JobError {
    /// A collaborator or the catalog failed; the next run retries.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    /// Persisted state or configuration is unusable; retried only on the
    /// next cadence.
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Job panicked: {0}")]
    Panicked(String),
}

/// Trait for background jobs.
///
/// Jobs are executed synchronously in a blocking context, one at a time.
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &'static str;

    /// Human-readable name for this job.
    fn name(&self) -> &'static str;

    /// Description of what this job does.
    fn description(&self) -> &'static str;

    /// How often the job runs. A zero interval disables the job.
    fn interval(&self) -> Duration;

    /// Execute the job.
    ///
    /// This method is called from a blocking context using `spawn_blocking`.
    fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}
