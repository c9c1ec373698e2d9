use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub metrics_port: Option<u16>,
    pub doc_service_url: Option<String>,
    pub http_timeout_sec: Option<u64>,
    /// `client_id=...&client_secret=...`
    pub github_credentials: Option<String>,

    // Per-job settings
    pub background_jobs: Option<BackgroundJobsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackgroundJobsConfig {
    pub crawl: Option<CrawlConfig>,
    pub github_updates: Option<GitHubUpdatesConfig>,
    pub suppress_packages: Option<SuppressPackagesConfig>,
    pub job_history_cleanup: Option<JobHistoryCleanupConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CrawlConfig {
    pub interval_secs: Option<u64>,
    pub max_age_hours: Option<u64>,
    pub refresh_retry_divisor: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct GitHubUpdatesConfig {
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SuppressPackagesConfig {
    pub interval_secs: Option<u64>,
    pub workers: Option<usize>,
    pub inactive_days: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobHistoryCleanupConfig {
    pub interval_secs: Option<u64>,
    pub retention_days: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
