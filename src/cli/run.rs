use crate::config::parse::load_config;
use crate::event::LogEvent;
use crate::layer::SinkLayer;
use crate::pipeline::{LogSink, Pipeline};
use crate::retention::{run_scheduled, RetentionSweeper};
use crate::storage::{DuckDbStorage, LogStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("input error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: u64,
    pub submitted: u64,
    pub filtered: u64,
    pub malformed: u64,
}

/// Ingest NDJSON events until EOF or Ctrl+C.
///
/// The dedup window is measured back from each flush's wall-clock time, not
/// from the events' own timestamps. Replaying a file of historical events
/// therefore folds repeats only within a single flush; across flushes every
/// replayed event is already outside the window.
pub async fn run(
    config_path: Option<PathBuf>,
    input: Option<PathBuf>,
    self_log: Option<SinkLayer>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = super::require_config(config_path);
    run_pipeline(&config_path, input.as_deref(), self_log)
        .await
        .map_err(|e| e.into())
}

async fn run_pipeline(
    config_path: &Path,
    input: Option<&Path>,
    self_log: Option<SinkLayer>,
) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    info!(path = %config.storage.path.display(), table = %config.storage.table, "Initializing storage");
    let storage = Arc::new(DuckDbStorage::new(&config.storage.path, &config.storage.table)?);
    storage.init_schema().await?;

    let pipeline = Pipeline::start(&config, storage.clone())?;
    if let Some(layer) = self_log {
        layer.attach(pipeline.sink());
        info!("Forwarding application events into the pipeline");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention_handle = match config.retention.schedule {
        Some(every) if config.retention.enabled => {
            let sweeper = Arc::new(RetentionSweeper::new(storage.clone(), config.retention.clone()));
            Some(tokio::spawn(run_scheduled(sweeper, every, shutdown_rx)))
        }
        _ => None,
    };

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
        Some(path) => {
            info!(path = %path.display(), "Reading events from file");
            Box::new(BufReader::new(tokio::fs::File::open(path).await?))
        }
        None => {
            info!("Reading events from stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
    };

    let mut ingest_handle = tokio::spawn(ingest(reader, pipeline.sink()));

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            ingest_handle.abort();
        }
        result = &mut ingest_handle => {
            match result {
                Ok(Ok(stats)) => info!(
                    lines = stats.lines,
                    submitted = stats.submitted,
                    filtered = stats.filtered,
                    malformed = stats.malformed,
                    "Input exhausted"
                ),
                Ok(Err(e)) => error!(error = %e, "Input error"),
                Err(e) => error!(error = %e, "Ingest task join error"),
            }
        }
    }

    info!("Waiting for pipeline tasks to complete");
    let dropped = pipeline.sink().dropped();
    let flush_stats = pipeline.shutdown().await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = retention_handle {
        handle.await?;
    }

    if flush_stats.failed_flushes > 0 || dropped > 0 {
        warn!(
            failed_flushes = flush_stats.failed_flushes,
            events_lost = flush_stats.events_lost,
            dropped,
            "Some events were not persisted"
        );
    }
    info!(
        flushes = flush_stats.flushes,
        events_written = flush_stats.events_written,
        "Shutdown complete"
    );

    Ok(())
}

/// Feed newline-delimited JSON events into the sink until EOF.
///
/// Blank lines are skipped; malformed lines are logged and counted.
pub async fn ingest<R>(reader: R, sink: LogSink) -> Result<IngestStats, RunError>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = IngestStats::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        stats.lines += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<LogEvent>(line) {
            Ok(event) => {
                if sink.submit(event).await {
                    stats.submitted += 1;
                } else {
                    stats.filtered += 1;
                }
            }
            Err(e) => {
                stats.malformed += 1;
                warn!(line = stats.lines, error = %e, "Skipping malformed event");
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::FilterConfig;
    use crate::event::{EventFilter, Severity};
    use crate::pipeline::create_channel;

    #[tokio::test]
    async fn test_ingest_parses_ndjson() {
        let input = concat!(
            r#"{"severity":"error","message":"disk full","timestamp":"2026-01-01T00:00:00Z"}"#,
            "\n\n",
            "not json\n",
            r#"{"severity":"debug","message":"noise"}"#,
            "\n",
            r#"{"severity":"warn","message":"slow","properties":{"ms":900}}"#,
            "\n",
        );
        let filter = EventFilter::from_config(&FilterConfig {
            minimum_level: Severity::Information,
            ..FilterConfig::default()
        })
        .unwrap();
        let (tx, mut rx) = create_channel(16);

        let stats = ingest(input.as_bytes(), LogSink::new(tx, filter)).await.unwrap();

        assert_eq!(
            stats,
            IngestStats {
                lines: 5,
                submitted: 2,
                filtered: 1,
                malformed: 1,
            }
        );
        let first = rx.recv().await.unwrap();
        assert_eq!(first.severity, Severity::Error);
        assert_eq!(first.message_template, "");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.severity, Severity::Warning);
        assert_eq!(second.properties["ms"], 900);
    }
}
