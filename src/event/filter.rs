use super::{LogEvent, Severity};
use crate::config::types::FilterConfig;
use regex::{Regex, RegexBuilder};

/// Decides whether an event is worth persisting.
///
/// Holds no mutable state, so one instance can be shared by every producer.
#[derive(Debug, Clone)]
pub struct EventFilter {
    minimum_level: Severity,
    excluded_keywords: Vec<String>,
    excluded_patterns: Vec<Regex>,
}

impl EventFilter {
    pub fn from_config(config: &FilterConfig) -> Result<Self, regex::Error> {
        let excluded_patterns = config
            .excluded_patterns
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            minimum_level: config.minimum_level,
            excluded_keywords: config
                .excluded_keywords
                .iter()
                .filter(|k| !k.is_empty())
                .map(|k| k.to_lowercase())
                .collect(),
            excluded_patterns,
        })
    }

    /// Filter that accepts everything.
    pub fn accept_all() -> Self {
        Self {
            minimum_level: Severity::Verbose,
            excluded_keywords: Vec::new(),
            excluded_patterns: Vec::new(),
        }
    }

    pub fn accept(&self, event: &LogEvent) -> bool {
        if event.severity < self.minimum_level {
            return false;
        }
        !self.is_excluded(&event.message, event.exception.as_deref().unwrap_or(""))
    }

    fn is_excluded(&self, message: &str, exception: &str) -> bool {
        if !self.excluded_keywords.is_empty() {
            let message = message.to_lowercase();
            let exception = exception.to_lowercase();
            if self
                .excluded_keywords
                .iter()
                .any(|k| message.contains(k.as_str()) || exception.contains(k.as_str()))
            {
                return true;
            }
        }

        self.excluded_patterns
            .iter()
            .any(|re| re.is_match(message) || re.is_match(exception))
    }
}
