use super::auth::GitHubAuth;
use super::client::GitHubClient;
use anyhow::Result;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::debug;

/// Changes reported by an update feed since a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateBatch {
    /// Cursor to resume from next time.
    pub cursor: String,
    /// Feed identifiers of the changed projects.
    pub changed: Vec<String>,
}

/// An external "recently changed" feed.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait UpdateFeed: Send + Sync {
    /// Everything that changed after `cursor`. An empty cursor lets the feed
    /// pick its own starting point.
    fn poll_updates(&self, cursor: &str) -> Result<UpdateBatch>;

    /// Catalog project root for a feed identifier.
    fn project_root(&self, id: &str) -> String;
}

/// How far back the first poll looks.
const INITIAL_LOOKBACK_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    full_name: String,
    pushed_at: Option<DateTime<Utc>>,
}

/// Recently pushed Go repositories, from the GitHub repository search API.
///
/// The cursor is the RFC 3339 push time of the newest repository seen.
pub struct GitHubUpdateFeed {
    client: GitHubClient,
    auth: Option<GitHubAuth>,
}

impl GitHubUpdateFeed {
    pub fn new(client: GitHubClient, auth: Option<GitHubAuth>) -> Self {
        Self { client, auth }
    }
}

fn format_cursor(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn search_path(cursor: &str, now: DateTime<Utc>) -> String {
    let since = if cursor.is_empty() {
        format_cursor(now - Duration::hours(INITIAL_LOOKBACK_HOURS))
    } else {
        cursor.to_string()
    };
    format!(
        "search/repositories?order=asc&sort=updated&per_page=100&q=fork:true+language:Go+pushed:>{}",
        since
    )
}

/// Fold search results into a batch. The cursor only ever moves forward.
fn collect_batch(cursor: &str, items: Vec<SearchItem>) -> UpdateBatch {
    let mut newest = DateTime::parse_from_rfc3339(cursor)
        .map(|dt| dt.with_timezone(&Utc))
        .ok();
    let mut changed = Vec::with_capacity(items.len());

    for item in items {
        if let Some(pushed_at) = item.pushed_at {
            if newest.map_or(true, |newest| pushed_at > newest) {
                newest = Some(pushed_at);
            }
        }
        changed.push(item.full_name);
    }

    UpdateBatch {
        cursor: newest.map(format_cursor).unwrap_or_else(|| cursor.to_string()),
        changed,
    }
}

impl UpdateFeed for GitHubUpdateFeed {
    fn poll_updates(&self, cursor: &str) -> Result<UpdateBatch> {
        let path = search_path(cursor, Utc::now());
        debug!("Polling GitHub updates: {}", path);

        let response: SearchResponse = self
            .client
            .get_json(&path, self.auth.as_ref())?
            .ok_or_else(|| anyhow::anyhow!("GitHub search endpoint not found"))?;

        Ok(collect_batch(cursor, response.items))
    }

    fn project_root(&self, id: &str) -> String {
        format!("github.com/{}", id)
    }
}
