use super::cadence::{tick_period, Cadence};
use super::context::JobContext;
use super::job::{BackgroundJob, JobError};
use crate::job_store::{JobRunStatus, JobStore};
use crate::metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct ScheduledJob {
    job: Arc<dyn BackgroundJob>,
    cadence: Cadence,
}

/// Runs registered jobs on their own cadences from a single control loop.
pub struct JobScheduler {
    /// Jobs in registration order, which is also the per-tick evaluation order.
    jobs: Vec<ScheduledJob>,

    /// Job run history.
    job_store: Arc<dyn JobStore>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,
}

impl JobScheduler {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
    ) -> Self {
        Self {
            jobs: Vec::new(),
            job_store,
            shutdown_token,
            job_context,
        }
    }

    /// Register a job with the scheduler.
    pub fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let interval = job.interval();
        if interval.is_zero() {
            info!("Registering job: {} - {} (disabled)", job.id(), job.description());
        } else {
            info!(
                "Registering job: {} - {} (every {:?})",
                job.id(),
                job.description(),
                interval
            );
        }
        self.jobs.push(ScheduledJob {
            job,
            cadence: Cadence::new(interval),
        });
    }

    /// Get the number of registered jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Period of the control loop.
    pub fn tick_period(&self) -> Duration {
        tick_period(self.jobs.iter().map(|scheduled| &scheduled.cadence.interval))
    }

    /// When the given job may run next. `None` for unknown jobs and for jobs
    /// that have not been attempted yet.
    pub fn next_eligible(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.jobs
            .iter()
            .find(|scheduled| scheduled.job.id() == job_id)
            .and_then(|scheduled| scheduled.cadence.next_eligible)
    }

    /// One tick: run every job that is due at `now`, one after the other.
    /// Returns the number of jobs attempted.
    pub async fn run_due_jobs(&mut self, now: DateTime<Utc>) -> usize {
        let mut attempted = 0;
        for index in 0..self.jobs.len() {
            if !self.jobs[index].cadence.is_due(now) {
                continue;
            }
            let job = Arc::clone(&self.jobs[index].job);
            self.execute_job(job).await;
            attempted += 1;

            // Never schedule from a point earlier than the wall clock.
            let attempted_at = now.max(Utc::now());
            self.jobs[index].cadence.advance(attempted_at);
        }
        attempted
    }

    /// Main scheduler loop. Returns only once the shutdown token is cancelled.
    pub async fn run(&mut self) {
        info!(
            "Starting job scheduler with {} registered jobs",
            self.job_count()
        );

        // On startup: mark runs interrupted by a previous process as failed
        match self.job_store.get_running_jobs() {
            Ok(interrupted) => {
                for run in interrupted {
                    warn!(
                        "Job {} (run_id: {}) was interrupted, started at {}",
                        run.job_id, run.id, run.started_at
                    );
                }
            }
            Err(e) => {
                error!("Failed to list interrupted jobs: {}", e);
            }
        }
        match self.job_store.mark_stale_jobs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale jobs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale jobs: {}", e);
            }
        }

        let tick = self.tick_period();
        loop {
            debug!("Scheduler sleeping for {:?}", tick);
            tokio::select! {
                _ = tokio::time::sleep(tick) => {
                    self.run_due_jobs(Utc::now()).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        error!("Job scheduler loop exited");
    }

    async fn execute_job(&self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id();

        let run_id = match self.job_store.record_job_start(job_id, "schedule") {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to record job start for {}: {}", job_id, e);
                None
            }
        };

        info!("Starting job: {} (run_id: {:?})", job_id, run_id);
        metrics::set_job_running(job_id, true);

        let ctx = self.job_context.clone();
        let start_time = Instant::now();
        let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
        let elapsed = start_time.elapsed();

        let (status, error_msg, status_label) = match result {
            Ok(Ok(())) => {
                info!("Job {} completed successfully in {:?}", job_id, elapsed);
                (JobRunStatus::Completed, None, "success")
            }
            Ok(Err(e)) => {
                error!("Job {} failed after {:?}: {}", job_id, elapsed, e);
                (JobRunStatus::Failed, Some(e.to_string()), "failed")
            }
            Err(e) => {
                let e = JobError::Panicked(e.to_string());
                error!("Job {} panicked after {:?}: {}", job_id, elapsed, e);
                (JobRunStatus::Failed, Some(e.to_string()), "panic")
            }
        };

        metrics::record_job_run(job_id, status_label, elapsed);
        metrics::set_job_running(job_id, false);

        if let Some(run_id) = run_id {
            if let Err(e) = self.job_store.record_job_finish(run_id, status, error_msg) {
                error!("Failed to record job finish for {}: {}", job_id, e);
            }
        }
    }
}
