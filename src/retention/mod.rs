pub mod sweeper;

pub use sweeper::{RetentionSweeper, ScopeReport, SweepOutcome, SweepPhase, SweepReport};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Run the sweeper every `every` until `shutdown` flips to true.
///
/// The first sweep runs one full interval after start.
pub async fn run_scheduled(
    sweeper: Arc<RetentionSweeper>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    info!(interval_secs = every.as_secs(), "Retention schedule started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sweeper.run().await {
                    SweepOutcome::Completed(report) => {
                        debug!(deleted = report.total_deleted, "Scheduled retention sweep completed");
                    }
                    SweepOutcome::AlreadyRunning(phase) => {
                        debug!(?phase, "Previous retention sweep still running, skipping tick");
                    }
                    SweepOutcome::Disabled => break,
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Retention schedule stopped");
}
