use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all scheduler metrics
const PREFIX: &str = "docindex";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Job Metrics
    pub static ref JOB_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_runs_total"), "Total background job runs"),
        &["job_id", "status"]
    ).expect("Failed to create job_runs_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Background job run duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 1800.0]),
        &["job_id"]
    ).expect("Failed to create job_duration_seconds metric");

    pub static ref JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_job_running"), "Whether a background job is running"),
        &["job_id"]
    ).expect("Failed to create job_running metric");

    // Crawl Metrics
    pub static ref CRAWL_OUTCOMES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_crawl_outcomes_total"), "Crawl attempts by outcome"),
        &["kind", "outcome"]
    ).expect("Failed to create crawl_outcomes_total metric");

    // Update feed Metrics
    pub static ref FEED_CHANGES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_feed_changes_total"),
        "Changed projects received from the update feed"
    ).expect("Failed to create feed_changes_total metric");

    // Suppression Metrics
    pub static ref SUPPRESSION_VERDICTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_suppression_verdicts_total"), "Suppression scoring results"),
        &["verdict"]
    ).expect("Failed to create suppression_verdicts_total metric");

    // Process Metrics
    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(JOB_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(CRAWL_OUTCOMES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(FEED_CHANGES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SUPPRESSION_VERDICTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record a finished job run
pub fn record_job_run(job_id: &str, status: &str, duration: Duration) {
    JOB_RUNS_TOTAL.with_label_values(&[job_id, status]).inc();
    JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_job_running(job_id: &str, running: bool) {
    JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

/// Record a crawl attempt. `kind` is "new" or "refresh".
pub fn record_crawl_outcome(kind: &str, outcome: &str) {
    CRAWL_OUTCOMES_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();
}

pub fn record_feed_changes(count: usize) {
    FEED_CHANGES_TOTAL.inc_by(count as f64);
}

/// Record a suppression verdict: "suppressed", "kept" or "error".
pub fn record_suppression_verdict(verdict: &str) {
    SUPPRESSION_VERDICTS_TOTAL
        .with_label_values(&[verdict])
        .inc();
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // RSS is reported in kB
                    if let Some(kb) = line
                        .split_whitespace()
                        .nth(1)
                        .and_then(|kb| kb.parse::<f64>().ok())
                    {
                        PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                        return;
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Router serving `/metrics` and `/health`.
pub fn metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
}
