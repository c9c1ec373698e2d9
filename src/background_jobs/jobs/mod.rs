//! Specific background job implementations.

pub mod crawl;
pub mod github_updates;
pub mod job_history_cleanup;
pub mod suppress_packages;

pub use crawl::{CrawlJob, CrawlOutcome};
pub use github_updates::{PollSummary, UpdateCursor, UpdatePollJob, UPDATE_CURSOR_KEY};
pub use job_history_cleanup::JobHistoryCleanupJob;
pub use suppress_packages::{SuppressPackagesJob, SuppressionSummary};
