pub mod filter;
pub mod hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub use filter::EventFilter;
pub use hash::identity_hash;

/// Log severity, ordered from least to most severe.
///
/// Deserializes case-insensitively through [`FromStr`], so `"Error"`,
/// `"error"` and `"ERROR"` are all accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Severity {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub const ALL: [Severity; 6] = [
        Severity::Verbose,
        Severity::Debug,
        Severity::Information,
        Severity::Warning,
        Severity::Error,
        Severity::Fatal,
    ];

    /// Name written to the `level` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Verbose => "Verbose",
            Severity::Debug => "Debug",
            Severity::Information => "Information",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown severity '{0}'")]
pub struct ParseSeverityError(String);

impl TryFrom<String> for Severity {
    type Error = ParseSeverityError;

    fn try_from(value: String) -> Result<Self, ParseSeverityError> {
        value.parse()
    }
}

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verbose" | "trace" => Ok(Severity::Verbose),
            "debug" => Ok(Severity::Debug),
            "information" | "info" => Ok(Severity::Information),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "fatal" | "critical" => Ok(Severity::Fatal),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// A structured log event handed to the pipeline by a producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub severity: Severity,
    #[serde(default)]
    pub message_template: String,
    pub message: String,
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            severity,
            message_template: message.clone(),
            message,
            exception: None,
            properties: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Verbose < Severity::Debug);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }

    #[test]
    fn test_severity_parse_aliases() {
        assert_eq!("INFO".parse::<Severity>().unwrap(), Severity::Information);
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("Trace".parse::<Severity>().unwrap(), Severity::Verbose);
        assert!("loud".parse::<Severity>().is_err());
    }

    #[test]
    fn test_event_severity_is_case_insensitive() {
        for (raw, expected) in [
            ("Error", Severity::Error),
            ("WARNING", Severity::Warning),
            ("Information", Severity::Information),
            ("iNfO", Severity::Information),
            ("trace", Severity::Verbose),
        ] {
            let line = format!(r#"{{"severity":"{}","message":"m"}}"#, raw);
            let event: LogEvent = serde_json::from_str(&line).unwrap();
            assert_eq!(event.severity, expected, "input {}", raw);
        }
        assert!(serde_json::from_str::<LogEvent>(r#"{"severity":"loud","message":"m"}"#).is_err());
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::Warning).unwrap(), r#""warning""#);
    }

    #[test]
    fn test_event_deserializes_with_defaults() {
        let event: LogEvent =
            serde_json::from_str(r#"{"severity":"error","message":"disk full"}"#).unwrap();
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.message, "disk full");
        assert!(event.exception.is_none());
        assert!(event.properties.is_empty());
    }
}
