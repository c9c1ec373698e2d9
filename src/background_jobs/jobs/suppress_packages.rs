//! Package suppression background job.
//!
//! Scores every catalog package concurrently and hides the ones the scorer
//! flags. Packages are written back one at a time, re-read from the catalog
//! first so a crawl that landed while scoring is not overwritten with stale
//! data.

use crate::background_jobs::{BackgroundJob, JobContext, JobError};
use crate::catalog_store::CatalogStore;
use crate::config::SuppressPackagesSettings;
use crate::github::GitHubAuth;
use crate::metrics;
use crate::suppression::{score_packages, SuppressionScorer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuppressionSummary {
    pub scored: usize,
    pub suppressed: usize,
    pub errors: usize,
}

pub struct SuppressPackagesJob {
    settings: SuppressPackagesSettings,
    scorer: Arc<dyn SuppressionScorer>,
    /// Raw credentials in query form, parsed on every run.
    credentials: Option<String>,
}

impl SuppressPackagesJob {
    pub fn new(
        settings: SuppressPackagesSettings,
        scorer: Arc<dyn SuppressionScorer>,
        credentials: Option<String>,
    ) -> Self {
        Self {
            settings,
            scorer,
            credentials,
        }
    }

    fn auth(&self) -> Result<Option<GitHubAuth>, JobError> {
        match &self.credentials {
            None => Ok(None),
            Some(credentials) => GitHubAuth::parse(credentials)
                .map_err(|e| JobError::Config(format!("Invalid GitHub credentials: {:#}", e))),
        }
    }

    pub fn evaluate(&self, catalog: Arc<dyn CatalogStore>) -> Result<SuppressionSummary, JobError> {
        let auth = self.auth()?;

        let packages = catalog
            .all_packages()
            .map_err(|e| JobError::ExecutionFailed(format!("Failed to list packages: {:#}", e)))?;
        info!("Evaluating {} packages for suppression", packages.len());

        let verdicts = score_packages(
            Arc::clone(&self.scorer),
            Arc::clone(&catalog),
            auth,
            packages,
            self.settings.workers,
        )
        .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;

        let mut summary = SuppressionSummary::default();
        for verdict in verdicts {
            summary.scored += 1;
            let import_path = &verdict.package.import_path;

            let suppress = match verdict.suppress {
                Ok(suppress) => suppress,
                Err(e) => {
                    warn!("Failed to score {}: {:#}", import_path, e);
                    metrics::record_suppression_verdict("error");
                    summary.errors += 1;
                    continue;
                }
            };
            if !suppress {
                metrics::record_suppression_verdict("kept");
                continue;
            }
            metrics::record_suppression_verdict("suppressed");

            let entry = match catalog.get_package(import_path) {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    debug!("Package {} vanished before suppression, skipping", import_path);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to re-read {}: {:#}", import_path, e);
                    summary.errors += 1;
                    continue;
                }
            };

            match catalog.put_package(&entry.record.document(), None, true) {
                Ok(()) => {
                    debug!("Suppressed {}", import_path);
                    summary.suppressed += 1;
                }
                Err(e) => {
                    error!("Failed to store suppression of {}: {:#}", import_path, e);
                    summary.errors += 1;
                }
            }
        }

        Ok(summary)
    }
}

impl BackgroundJob for SuppressPackagesJob {
    fn id(&self) -> &'static str {
        "suppress_packages"
    }

    fn name(&self) -> &'static str {
        "Suppress Packages"
    }

    fn description(&self) -> &'static str {
        "Hide abandoned packages from listings and search"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.interval_secs)
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let summary = self.evaluate(Arc::clone(&ctx.catalog_store))?;
        info!(
            "Scored {} packages, suppressed {} ({} errors)",
            summary.scored, summary.suppressed, summary.errors
        );
        Ok(())
    }
}
