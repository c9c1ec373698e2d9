//! docindex scheduler library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod background_jobs;
pub mod catalog_store;
pub mod config;
pub mod crawler;
pub mod github;
pub mod job_store;
pub mod metrics;
pub mod sqlite_persistence;
pub mod suppression;

// Re-export commonly used types for convenience
pub use background_jobs::{BackgroundJob, JobContext, JobError, JobScheduler};
pub use catalog_store::{CatalogStore, SqliteCatalogStore};
pub use job_store::{JobStore, SqliteJobStore};
