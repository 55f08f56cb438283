use crate::config::types::RetentionConfig;
use crate::event::Severity;
use crate::storage::{LogStore, RetentionScope};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Where a sweep currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    Idle,
    Scanning(RetentionScope),
    Deleting { scope: RetentionScope, batch: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeReport {
    pub scope: RetentionScope,
    pub retention_days: u32,
    pub cutoff: DateTime<Utc>,
    pub deleted: usize,
    pub batches: usize,
    /// Set when a batch for this scope failed; the sweep moved on to the next scope.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: std::time::Duration,
    pub total_deleted: usize,
    pub batches: usize,
    /// The run used its whole batch budget with expired records still left.
    pub budget_exhausted: bool,
    pub scopes: Vec<ScopeReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Disabled,
    /// Another sweep holds the run lock; carries the phase it was in.
    AlreadyRunning(SweepPhase),
    Completed(SweepReport),
}

/// Deletes expired records in bounded batches, one scope per severity plus a
/// catch-all for records with no recognizable level.
pub struct RetentionSweeper {
    store: Arc<dyn LogStore>,
    config: RetentionConfig,
    run_lock: tokio::sync::Mutex<()>,
    phase: Mutex<SweepPhase>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn LogStore>, config: RetentionConfig) -> Self {
        Self {
            store,
            config,
            run_lock: tokio::sync::Mutex::new(()),
            phase: Mutex::new(SweepPhase::Idle),
        }
    }

    /// Retention policy per scope, in sweep order.
    pub fn policies(&self) -> Vec<(RetentionScope, u32)> {
        Severity::ALL
            .iter()
            .map(|severity| (RetentionScope::Level(*severity), self.config.days_for(*severity)))
            .chain(std::iter::once((RetentionScope::Other, self.config.default_days)))
            .collect()
    }

    pub fn phase(&self) -> SweepPhase {
        self.phase
            .lock()
            .map(|phase| *phase)
            .unwrap_or(SweepPhase::Idle)
    }

    pub async fn run(&self) -> SweepOutcome {
        self.run_at(Utc::now()).await
    }

    /// Sweep with cutoffs computed from `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> SweepOutcome {
        if !self.config.enabled {
            debug!("Retention disabled, skipping sweep");
            return SweepOutcome::Disabled;
        }

        let Ok(_guard) = self.run_lock.try_lock() else {
            let phase = self.phase();
            debug!(?phase, "Retention sweep already running");
            return SweepOutcome::AlreadyRunning(phase);
        };

        let started = std::time::Instant::now();
        let started_at = Utc::now();
        let batch_size = self.config.batch_size.max(1);
        let max_batches = self.config.max_batches_per_run;

        info!(batch_size, max_batches, "Retention sweep started");

        let mut batches = 0usize;
        let mut total_deleted = 0usize;
        let mut stopped_at: Option<usize> = None;
        let mut scopes = Vec::new();
        let policies = self.policies();

        for (index, &(scope, days)) in policies.iter().enumerate() {
            if batches >= max_batches {
                stopped_at = Some(index);
                break;
            }

            self.set_phase(SweepPhase::Scanning(scope));
            let cutoff = now - Duration::days(i64::from(days));
            let mut report = ScopeReport {
                scope,
                retention_days: days,
                cutoff,
                deleted: 0,
                batches: 0,
                error: None,
            };

            loop {
                if batches >= max_batches {
                    stopped_at = Some(index);
                    break;
                }

                self.set_phase(SweepPhase::Deleting {
                    scope,
                    batch: report.batches + 1,
                });

                match self
                    .store
                    .batch_delete_older_than(scope, cutoff, batch_size)
                    .await
                {
                    Ok(ids) => {
                        if ids.is_empty() {
                            break;
                        }
                        batches += 1;
                        report.batches += 1;
                        report.deleted += ids.len();
                        total_deleted += ids.len();
                        debug!(%scope, deleted = ids.len(), "Deleted retention batch");
                        if ids.len() < batch_size {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(%scope, error = %e, "Retention batch failed, skipping scope");
                        report.error = Some(e.to_string());
                        break;
                    }
                }
            }

            if report.deleted > 0 || report.error.is_some() {
                info!(
                    %scope,
                    retention_days = days,
                    %cutoff,
                    deleted = report.deleted,
                    batches = report.batches,
                    "Retention scope swept"
                );
            }
            scopes.push(report);

            if stopped_at.is_some() {
                break;
            }
        }

        // Stopping on the budget only matters if something expired was left behind
        let budget_exhausted = match stopped_at {
            Some(index) => self.has_expired(&policies[index..], now).await,
            None => false,
        };

        self.set_phase(SweepPhase::Idle);

        let report = SweepReport {
            started_at,
            finished_at: Utc::now(),
            elapsed: started.elapsed(),
            total_deleted,
            batches,
            budget_exhausted,
            scopes,
        };

        if budget_exhausted {
            warn!(
                total_deleted,
                batches, "Retention sweep hit its batch budget, remaining records wait for the next run"
            );
        }
        info!(
            total_deleted,
            batches,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Retention sweep finished"
        );

        SweepOutcome::Completed(report)
    }

    async fn has_expired(&self, policies: &[(RetentionScope, u32)], now: DateTime<Utc>) -> bool {
        for &(scope, days) in policies {
            let cutoff = now - Duration::days(i64::from(days));
            match self.store.count_older_than(scope, cutoff).await {
                Ok(0) => {}
                Ok(_) => return true,
                Err(e) => {
                    warn!(%scope, error = %e, "Could not count remaining expired records");
                    return true;
                }
            }
        }
        false
    }

    fn set_phase(&self, phase: SweepPhase) {
        if let Ok(mut current) = self.phase.lock() {
            *current = phase;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DuckDbStorage, LogRecord};
    use uuid::Uuid;

    fn record(level: Option<&str>, age_days: i64, now: DateTime<Utc>) -> LogRecord {
        let at = now - Duration::days(age_days);
        LogRecord {
            id: Uuid::new_v4(),
            timestamp: at,
            level: level.unwrap_or_default().to_string(),
            message: "m".to_string(),
            exception: None,
            properties: None,
            raw_event: None,
            message_hash: Uuid::new_v4().simple().to_string(),
            first_occurrence: at,
            last_occurrence: at,
            occurrence_count: 1,
            dedup_window_minutes: 5,
        }
    }

    async fn seeded(records: &[LogRecord]) -> Arc<DuckDbStorage> {
        let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
        storage.init_schema().await.unwrap();
        storage.batch_insert(records).await.unwrap();
        storage
    }

    fn completed(outcome: SweepOutcome) -> SweepReport {
        match outcome {
            SweepOutcome::Completed(report) => report,
            other => panic!("expected completed sweep, got {:?}", other),
        }
    }

    #[test]
    fn test_policies_cover_every_severity_and_catch_all() {
        let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
        let sweeper = RetentionSweeper::new(storage, RetentionConfig::default());
        let policies = sweeper.policies();

        assert_eq!(policies.len(), Severity::ALL.len() + 1);
        assert!(policies.contains(&(RetentionScope::Level(Severity::Error), 90)));
        assert!(policies.contains(&(RetentionScope::Level(Severity::Debug), 7)));
        assert_eq!(policies.last(), Some(&(RetentionScope::Other, 30)));
    }

    #[tokio::test]
    async fn test_deletes_only_expired_records_per_level() {
        let now = Utc::now();
        let keep_error = record(Some("Error"), 60, now);
        let drop_debug = record(Some("Debug"), 8, now);
        let keep_debug = record(Some("Debug"), 6, now);
        let storage = seeded(&[keep_error.clone(), drop_debug.clone(), keep_debug.clone()]).await;
        let sweeper = RetentionSweeper::new(storage.clone(), RetentionConfig::default());

        let report = completed(sweeper.run_at(now).await);

        assert_eq!(report.total_deleted, 1);
        assert!(storage.get_record(drop_debug.id).await.unwrap().is_none());
        assert!(storage.get_record(keep_error.id).await.unwrap().is_some());
        assert!(storage.get_record(keep_debug.id).await.unwrap().is_some());
        assert_eq!(sweeper.phase(), SweepPhase::Idle);
    }

    #[tokio::test]
    async fn test_catch_all_scope_uses_default_days() {
        let now = Utc::now();
        let unknown = record(Some("Notice"), 31, now);
        let blank = record(None, 29, now);
        let storage = seeded(&[unknown.clone(), blank.clone()]).await;
        let sweeper = RetentionSweeper::new(storage.clone(), RetentionConfig::default());

        let report = completed(sweeper.run_at(now).await);

        assert_eq!(report.total_deleted, 1);
        assert!(storage.get_record(unknown.id).await.unwrap().is_none());
        assert!(storage.get_record(blank.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_budget_bounds_a_single_run() {
        let now = Utc::now();
        let records: Vec<LogRecord> = (0..10).map(|_| record(Some("Error"), 100, now)).collect();
        let storage = seeded(&records).await;
        let config = RetentionConfig {
            batch_size: 2,
            max_batches_per_run: 3,
            ..RetentionConfig::default()
        };
        let sweeper = RetentionSweeper::new(storage.clone(), config);

        let first = completed(sweeper.run_at(now).await);
        assert_eq!(first.total_deleted, 6);
        assert_eq!(first.batches, 3);
        assert!(first.budget_exhausted);

        let second = completed(sweeper.run_at(now).await);
        assert_eq!(second.total_deleted, 4);
        assert!(!second.budget_exhausted);

        let third = completed(sweeper.run_at(now).await);
        assert_eq!(third.total_deleted, 0);
    }

    #[tokio::test]
    async fn test_budget_spent_on_last_records_is_not_exhausted() {
        let now = Utc::now();
        let records: Vec<LogRecord> = (0..6).map(|_| record(Some("Error"), 100, now)).collect();
        let storage = seeded(&records).await;
        let config = RetentionConfig {
            batch_size: 2,
            max_batches_per_run: 3,
            ..RetentionConfig::default()
        };
        let sweeper = RetentionSweeper::new(storage, config);

        let report = completed(sweeper.run_at(now).await);

        assert_eq!(report.total_deleted, 6);
        assert_eq!(report.batches, 3);
        assert!(!report.budget_exhausted);
    }

    #[tokio::test]
    async fn test_disabled_retention_does_nothing() {
        let now = Utc::now();
        let old = record(Some("Debug"), 100, now);
        let storage = seeded(&[old.clone()]).await;
        let config = RetentionConfig {
            enabled: false,
            ..RetentionConfig::default()
        };
        let sweeper = RetentionSweeper::new(storage.clone(), config);

        assert_eq!(sweeper.run_at(now).await, SweepOutcome::Disabled);
        assert!(storage.get_record(old.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
        storage.init_schema().await.unwrap();
        let sweeper = RetentionSweeper::new(storage, RetentionConfig::default());

        let _held = sweeper.run_lock.lock().await;
        assert!(matches!(
            sweeper.run().await,
            SweepOutcome::AlreadyRunning(SweepPhase::Idle)
        ));
    }
}
