//! Background job scheduling and execution system.
//!
//! A single control loop runs the crawl, update-feed and suppression jobs on
//! independent cadences. Jobs never overlap and a failing job never stops
//! the others.

mod cadence;
mod context;
mod job;
pub mod jobs;
mod scheduler;

pub use cadence::{tick_period, Cadence, MAX_TICK};
pub use context::JobContext;
pub use job::{BackgroundJob, JobError};
pub use scheduler::JobScheduler;
