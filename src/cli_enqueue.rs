//! Adds import paths to the catalog's new-crawl queue.
//!
//! Paths previously marked as bad crawls are refused and reported; the exit
//! status is non-zero when any path was refused.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use docindex_scheduler::catalog_store::{CatalogStore, SqliteCatalogStore};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory containing catalog.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: PathBuf,

    /// Mark the queued paths as having subdirectories.
    #[clap(long)]
    pub has_subdirs: bool,

    /// Import paths to queue.
    #[clap(required = true)]
    pub import_paths: Vec<String>,
}

#[derive(Debug, Default)]
struct EnqueueReport {
    queued: usize,
    refused: Vec<String>,
}

fn enqueue(
    catalog: &dyn CatalogStore,
    import_paths: &[String],
    has_subdirs: bool,
) -> Result<EnqueueReport> {
    let mut report = EnqueueReport::default();
    for import_path in import_paths {
        let import_path = import_path.trim();
        if import_path.is_empty() {
            continue;
        }
        let accepted = catalog
            .add_new_crawl(import_path, has_subdirs)
            .with_context(|| format!("Failed to queue {}", import_path))?;
        if accepted {
            report.queued += 1;
        } else {
            report.refused.push(import_path.to_string());
        }
    }
    Ok(report)
}

fn main() -> Result<ExitCode> {
    let cli_args = CliArgs::parse();

    let catalog = SqliteCatalogStore::new(cli_args.db_dir.join("catalog.db"))?;
    let report = enqueue(&catalog, &cli_args.import_paths, cli_args.has_subdirs)?;

    for import_path in &report.refused {
        eprintln!("Refused {}: marked as a bad crawl", import_path);
    }
    println!("Queued {} import paths", report.queued);

    Ok(if report.refused.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
