mod file_config;

pub use file_config::{
    BackgroundJobsConfig, CrawlConfig, FileConfig, GitHubUpdatesConfig, JobHistoryCleanupConfig,
    SuppressPackagesConfig,
};

use anyhow::{bail, Result};
use chrono::Utc;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub metrics_port: u16,
    pub doc_service_url: Option<String>,
    pub http_timeout_sec: u64,
    pub github_credentials: Option<String>,
    pub crawl_interval_secs: u64,
    pub github_interval_secs: u64,
    pub suppress_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    /// 0 disables the metrics endpoint.
    pub metrics_port: u16,
    /// Crawling is disabled when no document service is configured.
    pub doc_service_url: Option<String>,
    pub http_timeout_sec: u64,
    pub github_credentials: Option<String>,

    pub background_jobs: BackgroundJobsSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        let doc_service_url = file
            .doc_service_url
            .or_else(|| cli.doc_service_url.clone())
            .filter(|url| !url.trim().is_empty());
        let http_timeout_sec = file.http_timeout_sec.unwrap_or(cli.http_timeout_sec);
        let github_credentials = file
            .github_credentials
            .or_else(|| cli.github_credentials.clone());

        let jobs_file = file.background_jobs.unwrap_or_default();

        let crawl_file = jobs_file.crawl.unwrap_or_default();
        let crawl_defaults = CrawlSettings::default();
        let crawl = CrawlSettings {
            interval_secs: crawl_file.interval_secs.unwrap_or(cli.crawl_interval_secs),
            max_age_hours: crawl_file
                .max_age_hours
                .unwrap_or(crawl_defaults.max_age_hours),
            refresh_retry_divisor: crawl_file
                .refresh_retry_divisor
                .unwrap_or(crawl_defaults.refresh_retry_divisor),
        };
        if crawl.refresh_retry_divisor == 0 || i32::try_from(crawl.refresh_retry_divisor).is_err() {
            bail!(
                "background_jobs.crawl.refresh_retry_divisor must be between 1 and {}",
                i32::MAX
            );
        }
        let max_age = i64::try_from(crawl.max_age_hours)
            .ok()
            .and_then(chrono::Duration::try_hours);
        if max_age.map_or(true, |max_age| Utc::now().checked_add_signed(max_age).is_none()) {
            bail!(
                "background_jobs.crawl.max_age_hours is out of range: {}",
                crawl.max_age_hours
            );
        }

        let github_file = jobs_file.github_updates.unwrap_or_default();
        let github_updates = GitHubUpdatesSettings {
            interval_secs: github_file
                .interval_secs
                .unwrap_or(cli.github_interval_secs),
        };

        let suppress_file = jobs_file.suppress_packages.unwrap_or_default();
        let suppress_defaults = SuppressPackagesSettings::default();
        let suppress_packages = SuppressPackagesSettings {
            interval_secs: suppress_file
                .interval_secs
                .unwrap_or(cli.suppress_interval_secs),
            workers: suppress_file.workers.unwrap_or(suppress_defaults.workers),
            inactive_days: suppress_file
                .inactive_days
                .unwrap_or(suppress_defaults.inactive_days),
        };

        let cleanup_file = jobs_file.job_history_cleanup.unwrap_or_default();
        let cleanup_defaults = JobHistoryCleanupSettings::default();
        let job_history_cleanup = JobHistoryCleanupSettings {
            interval_secs: cleanup_file
                .interval_secs
                .unwrap_or(cleanup_defaults.interval_secs),
            retention_days: cleanup_file
                .retention_days
                .unwrap_or(cleanup_defaults.retention_days),
        };

        Ok(Self {
            db_dir,
            metrics_port,
            doc_service_url,
            http_timeout_sec,
            github_credentials,
            background_jobs: BackgroundJobsSettings {
                crawl,
                github_updates,
                suppress_packages,
                job_history_cleanup,
            },
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("catalog.db")
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackgroundJobsSettings {
    pub crawl: CrawlSettings,
    pub github_updates: GitHubUpdatesSettings,
    pub suppress_packages: SuppressPackagesSettings,
    pub job_history_cleanup: JobHistoryCleanupSettings,
}

/// Crawl job settings. An interval of 0 disables the job.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub interval_secs: u64,
    /// How long a crawled package stays fresh.
    pub max_age_hours: u64,
    /// A failed refresh is retried after `max_age / refresh_retry_divisor`.
    pub refresh_retry_divisor: u32,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            interval_secs: 0,
            max_age_hours: 24,
            refresh_retry_divisor: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GitHubUpdatesSettings {
    pub interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SuppressPackagesSettings {
    pub interval_secs: u64,
    /// Size of the scoring pool.
    pub workers: usize,
    /// Repositories without a push for this long are considered abandoned.
    pub inactive_days: u32,
}

impl Default for SuppressPackagesSettings {
    fn default() -> Self {
        Self {
            interval_secs: 0,
            workers: 4,
            inactive_days: 730, // two years
        }
    }
}

/// Trimming of the job run history. Unlike the other jobs it is enabled by
/// default.
#[derive(Debug, Clone)]
pub struct JobHistoryCleanupSettings {
    pub interval_secs: u64,
    /// Finished runs older than this are deleted.
    pub retention_days: u32,
}

impl Default for JobHistoryCleanupSettings {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            retention_days: 7,
        }
    }
}
