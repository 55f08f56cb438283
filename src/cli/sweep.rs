use crate::config::parse::load_config;
use crate::retention::{RetentionSweeper, SweepOutcome};
use crate::storage::{DuckDbStorage, LogStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Run one retention sweep against the configured store and print what it removed.
pub async fn sweep(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = super::require_config(config_path);
    let config = load_config(&config_path)?;

    let storage = Arc::new(DuckDbStorage::new(&config.storage.path, &config.storage.table)?);
    storage.init_schema().await?;

    let sweeper = RetentionSweeper::new(storage, config.retention.clone());
    match sweeper.run().await {
        SweepOutcome::Disabled => {
            println!("Retention is disabled in {}", config_path.display());
        }
        SweepOutcome::AlreadyRunning(phase) => {
            println!("A sweep is already running ({:?})", phase);
        }
        SweepOutcome::Completed(report) => {
            println!("{:<12} {:>5} {:>26} {:>8} {:>8}", "SCOPE", "DAYS", "CUTOFF", "DELETED", "BATCHES");
            for scope in &report.scopes {
                println!(
                    "{:<12} {:>5} {:>26} {:>8} {:>8}",
                    scope.scope.to_string(),
                    scope.retention_days,
                    scope.cutoff.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                    scope.deleted,
                    scope.batches
                );
                if let Some(error) = &scope.error {
                    println!("  error: {}", error);
                }
            }
            println!();
            println!(
                "Deleted {} records in {} batches ({} ms)",
                report.total_deleted,
                report.batches,
                report.elapsed.as_millis()
            );
            if report.budget_exhausted {
                println!("Batch budget exhausted; run again to continue");
            }
        }
    }

    Ok(())
}
