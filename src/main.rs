use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use docindex_scheduler::background_jobs::jobs::{
    CrawlJob, JobHistoryCleanupJob, SuppressPackagesJob, UpdatePollJob,
};
use docindex_scheduler::background_jobs::{BackgroundJob, JobContext, JobScheduler};
use docindex_scheduler::catalog_store::{CatalogStore, SqliteCatalogStore};
use docindex_scheduler::config::{self, AppConfig};
use docindex_scheduler::crawler::HttpDocumentFetcher;
use docindex_scheduler::github::{
    GitHubAuth, GitHubClient, GitHubHealthScorer, GitHubUpdateFeed, GITHUB_API_BASE,
};
use docindex_scheduler::job_store::{JobStore, SqliteJobStore};
use docindex_scheduler::metrics;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing database files (catalog.db, jobs.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// The port for the metrics server (Prometheus scraping). 0 disables it.
    #[clap(long, default_value_t = 9092)]
    pub metrics_port: u16,

    /// Base URL of the document service that fetches and renders packages.
    /// Crawling is disabled without it.
    #[clap(long)]
    pub doc_service_url: Option<String>,

    /// Timeout in seconds for outbound HTTP requests.
    #[clap(long, default_value_t = 30)]
    pub http_timeout_sec: u64,

    /// GitHub API credentials as `client_id=...&client_secret=...`.
    #[clap(long)]
    pub github_credentials: Option<String>,

    /// Seconds between crawl steps. Set to 0 to disable crawling.
    #[clap(long, default_value_t = 0)]
    pub crawl_interval_secs: u64,

    /// Seconds between update feed polls. Set to 0 to disable polling.
    #[clap(long, default_value_t = 0)]
    pub github_interval_secs: u64,

    /// Seconds between suppression passes. Set to 0 to disable suppression.
    #[clap(long, default_value_t = 0)]
    pub suppress_interval_secs: u64,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            metrics_port: args.metrics_port,
            doc_service_url: args.doc_service_url.clone(),
            http_timeout_sec: args.http_timeout_sec,
            github_credentials: args.github_credentials.clone(),
            crawl_interval_secs: args.crawl_interval_secs,
            github_interval_secs: args.github_interval_secs,
            suppress_interval_secs: args.suppress_interval_secs,
        }
    }
}

/// Build the configured jobs. Blocking HTTP clients are created here, so this
/// must run off the async runtime.
fn build_jobs(app_config: &AppConfig) -> Result<Vec<Arc<dyn BackgroundJob>>> {
    let settings = &app_config.background_jobs;
    let mut jobs: Vec<Arc<dyn BackgroundJob>> = Vec::new();

    match &app_config.doc_service_url {
        Some(url) => {
            info!("Document service configured at {}", url);
            let fetcher = HttpDocumentFetcher::new(url, app_config.http_timeout_sec)?;
            jobs.push(Arc::new(CrawlJob::new(
                settings.crawl.clone(),
                Arc::new(fetcher),
            )));
        }
        None => info!("No document service configured, crawling disabled"),
    }

    let auth = match &app_config.github_credentials {
        Some(credentials) => {
            GitHubAuth::parse(credentials).context("Invalid GitHub credentials")?
        }
        None => None,
    };
    if auth.is_none() {
        info!("No GitHub credentials configured, using anonymous rate limits");
    }

    let feed_client = GitHubClient::new(GITHUB_API_BASE, app_config.http_timeout_sec)?;
    jobs.push(Arc::new(UpdatePollJob::new(
        settings.github_updates.clone(),
        Arc::new(GitHubUpdateFeed::new(feed_client, auth)),
    )));

    let scorer_client = GitHubClient::new(GITHUB_API_BASE, app_config.http_timeout_sec)?;
    jobs.push(Arc::new(SuppressPackagesJob::new(
        settings.suppress_packages.clone(),
        Arc::new(GitHubHealthScorer::new(
            scorer_client,
            settings.suppress_packages.inactive_days,
        )),
        app_config.github_credentials.clone(),
    )));

    Ok(jobs)
}

async fn run_metrics_server(port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;
    Ok(axum::serve(listener, metrics::metrics_router()).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    info!(
        "docindex-scheduler v{} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  metrics_port: {}", app_config.metrics_port);
    info!("  doc_service_url: {:?}", app_config.doc_service_url);
    info!("  http_timeout_sec: {}", app_config.http_timeout_sec);

    info!(
        "Opening catalog database at {:?}...",
        app_config.catalog_db_path()
    );
    let catalog_store = Arc::new(SqliteCatalogStore::new(app_config.catalog_db_path())?);

    info!("Opening job history database at {:?}...", app_config.jobs_db_path());
    let job_store = Arc::new(SqliteJobStore::new(app_config.jobs_db_path())?);

    info!("Initializing metrics...");
    metrics::init_metrics();

    let jobs = {
        let app_config = app_config.clone();
        tokio::task::spawn_blocking(move || build_jobs(&app_config)).await??
    };

    let job_store = job_store as Arc<dyn JobStore>;
    let shutdown_token = CancellationToken::new();
    let mut scheduler = JobScheduler::new(
        job_store.clone(),
        shutdown_token.clone(),
        JobContext::new(catalog_store as Arc<dyn CatalogStore>),
    );
    for job in jobs {
        scheduler.register_job(job);
    }
    scheduler.register_job(Arc::new(JobHistoryCleanupJob::new(
        app_config.background_jobs.job_history_cleanup.clone(),
        job_store,
    )));
    info!(
        "Scheduler ready with {} jobs, ticking every {:?}",
        scheduler.job_count(),
        scheduler.tick_period()
    );

    if app_config.metrics_port > 0 {
        let port = app_config.metrics_port;
        info!("Metrics available at port {}!", port);
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(port).await {
                error!("Metrics server stopped: {:#}", e);
            }
        });
    }

    let scheduler_run = scheduler.run();
    tokio::pin!(scheduler_run);

    tokio::select! {
        _ = &mut scheduler_run => {
            info!("Scheduler stopped");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            // Wait for the in-flight job to finish
            scheduler_run.await;
            info!("Scheduler stopped");
        }
    }
    Ok(())
}
