//! Repository health heuristic: abandoned GitHub repositories nobody imports
//! are hidden from listings.

use super::auth::GitHubAuth;
use super::client::GitHubClient;
use crate::catalog_store::{CatalogStore, PackageRecord};
use crate::suppression::SuppressionScorer;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
struct RepositoryInfo {
    #[serde(default)]
    archived: bool,
    pushed_at: Option<DateTime<Utc>>,
}

pub struct GitHubHealthScorer {
    client: GitHubClient,
    inactive_days: i64,
}

impl GitHubHealthScorer {
    pub fn new(client: GitHubClient, inactive_days: u32) -> Self {
        Self {
            client,
            inactive_days: inactive_days as i64,
        }
    }
}

/// `owner/repo` from a `github.com/owner/repo` project root.
fn repository_slug(project_root: &str) -> Option<&str> {
    let slug = project_root.strip_prefix("github.com/")?;
    let mut parts = slug.splitn(3, '/');
    match (parts.next(), parts.next()) {
        (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => {
            Some(&slug[..owner.len() + 1 + repo.len()])
        }
        _ => None,
    }
}

/// `None` means the repository is gone.
fn is_unhealthy(repo: Option<&RepositoryInfo>, now: DateTime<Utc>, inactive_days: i64) -> bool {
    match repo {
        None => true,
        Some(repo) if repo.archived => true,
        Some(repo) => repo
            .pushed_at
            .is_some_and(|pushed_at| now - pushed_at > Duration::days(inactive_days)),
    }
}

impl SuppressionScorer for GitHubHealthScorer {
    fn should_suppress(
        &self,
        package: &PackageRecord,
        catalog: &dyn CatalogStore,
        auth: Option<&GitHubAuth>,
    ) -> Result<bool> {
        if !package.is_github() {
            return Ok(false);
        }
        let Some(slug) = repository_slug(&package.project_root) else {
            return Ok(false);
        };

        if catalog.importer_count(&package.import_path)? > 0 {
            return Ok(false);
        }

        let repo: Option<RepositoryInfo> = self
            .client
            .get_json(&format!("repos/{}", slug), auth)?;
        let unhealthy = is_unhealthy(repo.as_ref(), Utc::now(), self.inactive_days);
        debug!(
            "Repository {} for {} unhealthy: {}",
            slug, package.import_path, unhealthy
        );
        Ok(unhealthy)
    }
}
