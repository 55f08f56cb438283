use crate::event::Severity;
use crate::pipeline::LogSink;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Targets whose events are never forwarded. Their own failures must not
/// become new events for the same pipeline.
const INTERNAL_TARGETS: &[&str] = &[
    "logsift::pipeline",
    "logsift::storage",
    "logsift::dedup",
    "logsift::retention",
    "logsift::layer",
];

/// `tracing` layer that forwards events into a [`LogSink`].
///
/// The layer can be installed before the pipeline exists; events seen before
/// [`SinkLayer::attach`] are ignored.
#[derive(Clone, Default)]
pub struct SinkLayer {
    sink: Arc<OnceLock<LogSink>>,
}

impl SinkLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(sink: LogSink) -> Self {
        let layer = Self::new();
        layer.attach(sink);
        layer
    }

    /// Start forwarding to `sink`. Returns false if a sink was already attached.
    pub fn attach(&self, sink: LogSink) -> bool {
        self.sink.set(sink).is_ok()
    }
}

fn is_internal(target: &str) -> bool {
    INTERNAL_TARGETS.iter().any(|prefix| target.starts_with(prefix))
}

fn severity_for(level: &Level) -> Severity {
    match *level {
        Level::TRACE => Severity::Verbose,
        Level::DEBUG => Severity::Debug,
        Level::INFO => Severity::Information,
        Level::WARN => Severity::Warning,
        Level::ERROR => Severity::Error,
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    exception: Option<String>,
    properties: BTreeMap<String, serde_json::Value>,
}

impl FieldVisitor {
    fn record_value(&mut self, field: &Field, value: serde_json::Value) {
        self.properties.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "exception" | "error" => self.exception = Some(value.to_string()),
            _ => self.record_value(field, value.into()),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, value.into());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let mut text = value.to_string();
        let mut source = value.source();
        while let Some(cause) = source {
            text.push_str(&format!("\ncaused by: {}", cause));
            source = cause.source();
        }
        match field.name() {
            "message" => self.message = Some(text),
            _ => self.exception = Some(text),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let text = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(text),
            "exception" | "error" => self.exception = Some(text),
            _ => self.record_value(field, text.into()),
        }
    }
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Some(sink) = self.sink.get() else {
            return;
        };
        let metadata = event.metadata();
        if is_internal(metadata.target()) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        visitor
            .properties
            .insert("target".to_string(), metadata.target().into());

        let message = visitor.message.unwrap_or_default();
        sink.emit(
            severity_for(metadata.level()),
            metadata.name(),
            message,
            visitor.exception,
            visitor.properties,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventFilter;
    use crate::pipeline::create_channel;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_forwards_event_fields() {
        let (tx, mut rx) = create_channel(8);
        let layer = SinkLayer::attached(LogSink::new(tx, EventFilter::accept_all()));
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "app::orders", order_id = 42u64, error = "timeout", "payment retry");
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.severity, Severity::Warning);
        assert_eq!(event.message, "payment retry");
        assert_eq!(event.exception.as_deref(), Some("timeout"));
        assert_eq!(event.properties["order_id"], 42);
        assert_eq!(event.properties["target"], "app::orders");
    }

    #[test]
    fn test_skips_internal_targets() {
        let (tx, mut rx) = create_channel(8);
        let layer = SinkLayer::attached(LogSink::new(tx, EventFilter::accept_all()));
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "logsift::storage::duckdb", "insert failed");
            tracing::error!(target: "logsift::pipeline::runner", "flush failed");
        });

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_detached_layer_ignores_events() {
        let layer = SinkLayer::new();
        let subscriber = tracing_subscriber::registry().with(layer.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("before attach");
        });

        let (tx, mut rx) = create_channel(8);
        assert!(layer.attach(LogSink::new(tx.clone(), EventFilter::accept_all())));
        assert!(!layer.attach(LogSink::new(tx, EventFilter::accept_all())));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(severity_for(&Level::TRACE), Severity::Verbose);
        assert_eq!(severity_for(&Level::INFO), Severity::Information);
        assert_eq!(severity_for(&Level::ERROR), Severity::Error);
    }
}
