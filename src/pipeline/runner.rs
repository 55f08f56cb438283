use super::coordinator::BatchCoordinator;
use super::sink::{create_channel, LogSink, Receiver};
use crate::config::types::{Config, FlushConfig};
use crate::dedup::{run_eviction, DedupCache};
use crate::event::{EventFilter, LogEvent};
use crate::storage::LogStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const IDLE_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Errors that can occur while starting or stopping the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid filter pattern: {0}")]
    Filter(#[from] regex::Error),

    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Counters kept by the flush task over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub flushes: u64,
    pub failed_flushes: u64,
    pub events_written: u64,
    /// Events that never reached the store. When only the insert half of a
    /// flush fails, the repeats already merged into existing records count
    /// as written.
    pub events_lost: u64,
}

/// Run the flush task.
///
/// Drains the queue into a buffer and hands it to the coordinator when it
/// reaches `batch_size`, when the interval ticks, and once more on shutdown.
/// A failed flush drops its batch and is reported on stderr, never through
/// `tracing`, so a self-logging setup cannot feed its own failures back in.
pub async fn run_flusher(
    mut input: Receiver,
    coordinator: Arc<BatchCoordinator>,
    config: FlushConfig,
    mut shutdown: watch::Receiver<bool>,
) -> FlushStats {
    let batch_size = config.batch_size.max(1);
    let mut buffer: Vec<LogEvent> = Vec::with_capacity(batch_size);
    let mut stats = FlushStats::default();

    // No interval configured: flush on batch size and shutdown only
    let mut flush_interval = tokio::time::interval(config.interval.unwrap_or(IDLE_INTERVAL));
    flush_interval.tick().await;

    info!(batch_size, "Flush task started");

    loop {
        tokio::select! {
            result = input.recv() => {
                match result {
                    Some(event) => {
                        buffer.push(event);
                        if buffer.len() >= batch_size {
                            flush_buffer(&coordinator, &mut buffer, &mut stats).await;
                        }
                    }
                    None => {
                        info!("Event channel closed, flushing remaining events");
                        break;
                    }
                }
            }

            _ = flush_interval.tick() => {
                if !buffer.is_empty() {
                    flush_buffer(&coordinator, &mut buffer, &mut stats).await;
                }
            }

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    // Take whatever is already queued, then stop
                    while let Ok(event) = input.try_recv() {
                        buffer.push(event);
                    }
                    break;
                }
            }
        }
    }

    while !buffer.is_empty() {
        let rest = if buffer.len() > batch_size {
            buffer.split_off(batch_size)
        } else {
            Vec::new()
        };
        flush_buffer(&coordinator, &mut buffer, &mut stats).await;
        buffer = rest;
    }

    info!(
        flushes = stats.flushes,
        failed = stats.failed_flushes,
        written = stats.events_written,
        "Flush task stopped"
    );

    stats
}

async fn flush_buffer(
    coordinator: &BatchCoordinator,
    buffer: &mut Vec<LogEvent>,
    stats: &mut FlushStats,
) {
    let batch = std::mem::take(buffer);
    let count = batch.len() as u64;

    stats.flushes += 1;
    match coordinator.flush(batch, Utc::now()).await {
        Ok(report) => {
            stats.events_written += count;
            debug!(
                events = report.events,
                inserted = report.inserted,
                updated = report.updated,
                cache_hits = report.cache_hits,
                store_hits = report.store_hits,
                "Flushed event batch"
            );
        }
        Err(e) => {
            let persisted = e.persisted() as u64;
            stats.failed_flushes += 1;
            stats.events_written += persisted;
            stats.events_lost += count - persisted;
            eprintln!("logsift: failed to flush {} events: {}", count - persisted, e);
        }
    }
}

/// A running pipeline: the producer sink plus its background tasks.
pub struct Pipeline {
    sink: LogSink,
    coordinator: Arc<BatchCoordinator>,
    shutdown_tx: watch::Sender<bool>,
    flusher: JoinHandle<FlushStats>,
    eviction: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the flush task and, when deduplication is on, the cache eviction task.
    pub fn start(config: &Config, store: Arc<dyn LogStore>) -> Result<Self, PipelineError> {
        let filter = EventFilter::from_config(&config.filter)?;
        let (tx, rx) = create_channel(config.flush.buffer_limit);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let cache = DedupCache::new();
        let coordinator = Arc::new(BatchCoordinator::new(
            store,
            cache.clone(),
            config.dedup.clone(),
        ));

        let flusher = tokio::spawn(run_flusher(
            rx,
            coordinator.clone(),
            config.flush.clone(),
            shutdown_rx.clone(),
        ));

        let eviction = match (config.dedup.enabled, config.dedup.eviction_interval) {
            (true, Some(interval)) => Some(tokio::spawn(run_eviction(
                cache,
                interval,
                config.dedup.cache_ttl(),
                shutdown_rx,
            ))),
            _ => None,
        };

        info!(
            dedup = config.dedup.enabled,
            window_minutes = config.dedup.window_minutes,
            "Pipeline started"
        );

        Ok(Self {
            sink: LogSink::new(tx, filter),
            coordinator,
            shutdown_tx,
            flusher,
            eviction,
        })
    }

    pub fn sink(&self) -> LogSink {
        self.sink.clone()
    }

    pub fn coordinator(&self) -> &Arc<BatchCoordinator> {
        &self.coordinator
    }

    /// Stop background tasks. Events already queued get one final flush.
    pub async fn shutdown(self) -> Result<FlushStats, PipelineError> {
        let _ = self.shutdown_tx.send(true);
        let stats = self.flusher.await?;
        if let Some(eviction) = self.eviction {
            eviction.await?;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::StorageConfig;
    use crate::event::{identity_hash, Severity};
    use crate::storage::DuckDbStorage;

    fn test_config() -> Config {
        Config {
            storage: StorageConfig {
                path: ":memory:".into(),
                table: "app_logs".to_string(),
            },
            filter: Default::default(),
            dedup: Default::default(),
            flush: Default::default(),
            retention: Default::default(),
        }
    }

    async fn storage() -> Arc<DuckDbStorage> {
        let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
        storage.init_schema().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_shutdown_flushes_queued_events() {
        let storage = storage().await;
        let mut config = test_config();
        config.flush.interval = None;

        let pipeline = Pipeline::start(&config, storage.clone()).unwrap();
        let sink = pipeline.sink();
        for _ in 0..3 {
            sink.emit_event(LogEvent::new(Severity::Error, "disk full"));
        }

        let stats = pipeline.shutdown().await.unwrap();

        assert_eq!(stats.events_written, 3);
        let hash = identity_hash(&LogEvent::new(Severity::Error, "disk full"));
        let records = storage.find_by_hash(&hash).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].occurrence_count, 3);
    }

    #[tokio::test]
    async fn test_flushes_when_batch_is_full() {
        let storage = storage().await;
        let mut config = test_config();
        config.flush.batch_size = 2;
        config.flush.interval = None;

        let pipeline = Pipeline::start(&config, storage.clone()).unwrap();
        let sink = pipeline.sink();
        sink.emit_event(LogEvent::new(Severity::Error, "a"));
        sink.emit_event(LogEvent::new(Severity::Error, "b"));

        let hash = identity_hash(&LogEvent::new(Severity::Error, "b"));
        let mut found = false;
        for _ in 0..50 {
            if !storage.find_by_hash(&hash).await.unwrap().is_empty() {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(found, "batch was not flushed before shutdown");

        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_interval_flushes_partial_batch() {
        let storage = storage().await;
        let mut config = test_config();
        config.flush.interval = Some(Duration::from_millis(20));

        let pipeline = Pipeline::start(&config, storage.clone()).unwrap();
        pipeline
            .sink()
            .emit_event(LogEvent::new(Severity::Warning, "slow query"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let hash = identity_hash(&LogEvent::new(Severity::Warning, "slow query"));
        assert_eq!(storage.find_by_hash(&hash).await.unwrap().len(), 1);

        pipeline.shutdown().await.unwrap();
    }
}
