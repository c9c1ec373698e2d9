//! GitHub integration: the repository update feed and the repository health
//! heuristic used for suppression.

mod auth;
mod client;
mod health;
mod update_feed;

pub use auth::GitHubAuth;
pub use client::{GitHubClient, GITHUB_API_BASE};
pub use health::GitHubHealthScorer;
pub use update_feed::{GitHubUpdateFeed, UpdateBatch, UpdateFeed};
