use crate::event::{EventFilter, LogEvent, Severity};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

pub type Sender = mpsc::Sender<LogEvent>;
pub type Receiver = mpsc::Receiver<LogEvent>;

/// Bounded queue between producers and the flush task.
pub fn create_channel(buffer_limit: usize) -> (Sender, Receiver) {
    mpsc::channel(buffer_limit.max(1))
}

/// Producer-facing handle. Cheap to clone; every clone feeds the same queue.
///
/// `emit` never blocks and never fails: filtered events are discarded, and
/// when the queue is full or closed the event is dropped and counted.
#[derive(Debug, Clone)]
pub struct LogSink {
    sender: Sender,
    filter: Arc<EventFilter>,
    dropped: Arc<AtomicU64>,
    filtered: Arc<AtomicU64>,
}

impl LogSink {
    pub fn new(sender: Sender, filter: EventFilter) -> Self {
        Self {
            sender,
            filter: Arc::new(filter),
            dropped: Arc::new(AtomicU64::new(0)),
            filtered: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(
        &self,
        severity: Severity,
        message_template: impl Into<String>,
        rendered_message: impl Into<String>,
        exception: Option<String>,
        properties: BTreeMap<String, serde_json::Value>,
    ) {
        self.emit_event(LogEvent {
            severity,
            message_template: message_template.into(),
            message: rendered_message.into(),
            exception,
            properties,
            timestamp: Utc::now(),
        });
    }

    pub fn emit_event(&self, event: LogEvent) {
        if !self.filter.accept(&event) {
            self.filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Like [`emit_event`](Self::emit_event) but waits for queue capacity
    /// instead of dropping. For bulk importers, not for logging call sites.
    /// Returns false if the event was filtered out or the queue is closed.
    pub async fn submit(&self, event: LogEvent) -> bool {
        if !self.filter.accept(&event) {
            self.filtered.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if self.sender.send(event).await.is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Events lost to a full or closed queue.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events rejected by the filter.
    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::FilterConfig;

    fn sink_with(filter: EventFilter, capacity: usize) -> (LogSink, Receiver) {
        let (tx, rx) = create_channel(capacity);
        (LogSink::new(tx, filter), rx)
    }

    #[tokio::test]
    async fn test_emit_queues_accepted_event() {
        let (sink, mut rx) = sink_with(EventFilter::accept_all(), 4);
        sink.emit(
            Severity::Warning,
            "User {user} logged in",
            "User alice logged in",
            None,
            BTreeMap::from([("user".to_string(), serde_json::json!("alice"))]),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.severity, Severity::Warning);
        assert_eq!(event.message_template, "User {user} logged in");
        assert_eq!(event.message, "User alice logged in");
        assert_eq!(event.properties["user"], "alice");
    }

    #[tokio::test]
    async fn test_filtered_events_never_reach_queue() {
        let filter = EventFilter::from_config(&FilterConfig {
            minimum_level: Severity::Information,
            excluded_keywords: vec!["healthcheck".to_string()],
            excluded_patterns: vec![],
        })
        .unwrap();
        let (sink, mut rx) = sink_with(filter, 4);

        sink.emit_event(LogEvent::new(Severity::Debug, "noise"));
        sink.emit_event(LogEvent::new(Severity::Error, "HealthCheck failed"));
        sink.emit_event(LogEvent::new(Severity::Error, "disk full"));

        assert_eq!(rx.recv().await.unwrap().message, "disk full");
        assert!(rx.try_recv().is_err());
        assert_eq!(sink.filtered(), 2);
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let (sink, _rx) = sink_with(EventFilter::accept_all(), 2);
        for _ in 0..5 {
            sink.emit_event(LogEvent::new(Severity::Error, "disk full"));
        }
        assert_eq!(sink.dropped(), 3);
    }

    #[tokio::test]
    async fn test_submit_waits_for_capacity() {
        let (sink, mut rx) = sink_with(EventFilter::accept_all(), 1);
        sink.emit_event(LogEvent::new(Severity::Error, "first"));

        let producer = sink.clone();
        let handle = tokio::spawn(async move {
            producer.submit(LogEvent::new(Severity::Error, "second")).await
        });

        assert_eq!(rx.recv().await.unwrap().message, "first");
        assert!(handle.await.unwrap());
        assert_eq!(rx.recv().await.unwrap().message, "second");
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn test_closed_queue_does_not_panic() {
        let (sink, rx) = sink_with(EventFilter::accept_all(), 2);
        drop(rx);
        sink.emit_event(LogEvent::new(Severity::Error, "disk full"));
        assert_eq!(sink.dropped(), 1);
    }
}
