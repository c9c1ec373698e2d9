//! Concurrent suppression scoring.
//!
//! [`score_packages`] fans a package listing out over a bounded worker pool
//! and fans the verdicts back in through one channel, in completion order.

use crate::catalog_store::{CatalogStore, PackageRecord};
use crate::github::GitHubAuth;
use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

/// Decides whether a package should be hidden from listings and search.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait SuppressionScorer: Send + Sync {
    fn should_suppress(
        &self,
        package: &PackageRecord,
        catalog: &dyn CatalogStore,
        auth: Option<&GitHubAuth>,
    ) -> Result<bool>;
}

/// Outcome of scoring one package.
#[derive(Debug)]
pub struct SuppressionVerdict {
    pub package: PackageRecord,
    pub suppress: Result<bool>,
}

/// Verdicts as they complete. Ends once every package has been scored.
pub struct VerdictStream {
    receiver: Receiver<SuppressionVerdict>,
    producer: Option<JoinHandle<()>>,
}

impl Iterator for VerdictStream {
    type Item = SuppressionVerdict;

    fn next(&mut self) -> Option<Self::Item> {
        match self.receiver.recv() {
            Ok(verdict) => Some(verdict),
            Err(_) => {
                if let Some(producer) = self.producer.take() {
                    if producer.join().is_err() {
                        error!("Suppression producer thread panicked, verdicts may be missing");
                    }
                }
                None
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Score every package on a dedicated pool of `workers` threads.
pub fn score_packages(
    scorer: Arc<dyn SuppressionScorer>,
    catalog: Arc<dyn CatalogStore>,
    auth: Option<GitHubAuth>,
    packages: Vec<PackageRecord>,
    workers: usize,
) -> Result<VerdictStream> {
    let workers = workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("suppress-{}", i))
        .build()
        .context("Failed to build suppression scoring pool")?;

    let (tx, receiver) = mpsc::sync_channel::<SuppressionVerdict>(workers);
    debug!(
        "Scoring {} packages with {} workers",
        packages.len(),
        workers
    );

    let producer = std::thread::Builder::new()
        .name("suppress-producer".to_string())
        .spawn(move || {
            pool.install(|| {
                packages.into_par_iter().for_each_with(tx, |tx, package| {
                    let suppress = panic::catch_unwind(AssertUnwindSafe(|| {
                        scorer.should_suppress(&package, catalog.as_ref(), auth.as_ref())
                    }))
                    .unwrap_or_else(|payload| {
                        Err(anyhow!(
                            "Scorer panicked on {}: {}",
                            package.import_path,
                            panic_message(payload.as_ref())
                        ))
                    });
                    // The consumer may stop early; remaining verdicts are dropped
                    let _ = tx.send(SuppressionVerdict { package, suppress });
                });
            });
        })
        .context("Failed to spawn suppression producer thread")?;

    Ok(VerdictStream {
        receiver,
        producer: Some(producer),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::testing::FaultyCatalogStore;
    use anyhow::bail;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(import_path: &str) -> PackageRecord {
        PackageRecord {
            import_path: import_path.to_string(),
            project_root: import_path.to_string(),
            etag: String::new(),
            name: String::new(),
            synopsis: String::new(),
            imports: vec![],
            next_crawl: Utc::now(),
            suppressed: false,
        }
    }

    /// Suppresses paths ending in "dead", errors on paths ending in "bad".
    struct SuffixScorer {
        calls: AtomicUsize,
    }

    impl SuppressionScorer for SuffixScorer {
        fn should_suppress(
            &self,
            package: &PackageRecord,
            _catalog: &dyn CatalogStore,
            _auth: Option<&GitHubAuth>,
        ) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if package.import_path.ends_with("bad") {
                bail!("scoring failed for {}", package.import_path);
            }
            Ok(package.import_path.ends_with("dead"))
        }
    }

    /// Panics on one path, keeps every other package alive.
    struct PanickyScorer {
        panic_on: &'static str,
    }

    impl SuppressionScorer for PanickyScorer {
        fn should_suppress(
            &self,
            package: &PackageRecord,
            _catalog: &dyn CatalogStore,
            _auth: Option<&GitHubAuth>,
        ) -> Result<bool> {
            if package.import_path == self.panic_on {
                panic!("rate limit bookkeeping underflow");
            }
            Ok(false)
        }
    }

    #[test]
    fn every_package_yields_exactly_one_verdict() {
        let scorer = Arc::new(SuffixScorer {
            calls: AtomicUsize::new(0),
        });
        let packages: Vec<_> = (0..50)
            .map(|i| record(&format!("example.com/p{}", i)))
            .collect();

        let stream = score_packages(
            scorer.clone(),
            Arc::new(FaultyCatalogStore::new()),
            None,
            packages,
            4,
        )
        .unwrap();

        let seen: HashSet<String> = stream.map(|v| v.package.import_path).collect();
        assert_eq!(seen.len(), 50);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn errors_are_reported_per_package() {
        let scorer = Arc::new(SuffixScorer {
            calls: AtomicUsize::new(0),
        });
        let packages = vec![
            record("example.com/dead"),
            record("example.com/bad"),
            record("example.com/alive"),
        ];

        let mut verdicts: Vec<_> = score_packages(
            scorer,
            Arc::new(FaultyCatalogStore::new()),
            None,
            packages,
            2,
        )
        .unwrap()
        .collect();
        verdicts.sort_by(|a, b| a.package.import_path.cmp(&b.package.import_path));

        assert_eq!(verdicts[0].package.import_path, "example.com/alive");
        assert!(!verdicts[0].suppress.as_ref().unwrap());
        assert!(verdicts[1].suppress.is_err());
        assert!(*verdicts[2].suppress.as_ref().unwrap());
    }

    #[test]
    fn empty_listing_ends_immediately() {
        let scorer = Arc::new(SuffixScorer {
            calls: AtomicUsize::new(0),
        });
        let mut stream = score_packages(
            scorer,
            Arc::new(FaultyCatalogStore::new()),
            None,
            vec![],
            0,
        )
        .unwrap();
        assert!(stream.next().is_none());
    }

    #[test]
    fn scorer_panic_becomes_that_packages_error() {
        let packages: Vec<_> = (0..200)
            .map(|i| record(&format!("example.com/p{}", i)))
            .collect();

        let verdicts: Vec<_> = score_packages(
            Arc::new(PanickyScorer {
                panic_on: "example.com/p42",
            }),
            Arc::new(FaultyCatalogStore::new()),
            None,
            packages,
            1,
        )
        .unwrap()
        .collect();

        assert_eq!(verdicts.len(), 200);
        let failed: Vec<_> = verdicts.iter().filter(|v| v.suppress.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].package.import_path, "example.com/p42");
        let message = format!("{:#}", failed[0].suppress.as_ref().unwrap_err());
        assert!(message.contains("rate limit bookkeeping underflow"));
    }
}
