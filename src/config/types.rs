use crate::event::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_table() -> String {
    "app_logs".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_minimum_level")]
    pub minimum_level: Severity,
    #[serde(default)]
    pub excluded_keywords: Vec<String>,
    #[serde(default)]
    pub excluded_patterns: Vec<String>,
}

fn default_minimum_level() -> Severity {
    Severity::Verbose
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            minimum_level: default_minimum_level(),
            excluded_keywords: Vec::new(),
            excluded_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: u32,
    #[serde(with = "duration_format", default = "default_eviction_interval")]
    pub eviction_interval: Option<Duration>,
}

fn default_true() -> bool {
    true
}

fn default_window_minutes() -> u32 {
    5
}

fn default_cache_ttl_minutes() -> u32 {
    10
}

fn default_eviction_interval() -> Option<Duration> {
    Some(Duration::from_secs(5 * 60))
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_minutes: default_window_minutes(),
            cache_ttl_minutes: default_cache_ttl_minutes(),
            eviction_interval: default_eviction_interval(),
        }
    }
}

impl DedupConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.window_minutes))
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.cache_ttl_minutes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushConfig {
    #[serde(default = "default_flush_batch_size")]
    pub batch_size: usize,
    #[serde(with = "duration_format", default = "default_flush_interval")]
    pub interval: Option<Duration>,
    #[serde(default = "default_buffer_limit")]
    pub buffer_limit: usize,
}

fn default_flush_batch_size() -> usize {
    100
}

fn default_flush_interval() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

fn default_buffer_limit() -> usize {
    10000
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            batch_size: default_flush_batch_size(),
            interval: default_flush_interval(),
            buffer_limit: default_buffer_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_retention_days")]
    pub default_days: u32,
    #[serde(default = "default_level_days")]
    pub levels: BTreeMap<Severity, u32>,
    #[serde(default = "default_retention_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_batches")]
    pub max_batches_per_run: usize,
    /// How often `run` triggers a sweep; `infinite` leaves it to `logsift sweep`.
    #[serde(with = "duration_format", default)]
    pub schedule: Option<Duration>,
}

fn default_retention_days() -> u32 {
    30
}

fn default_level_days() -> BTreeMap<Severity, u32> {
    BTreeMap::from([
        (Severity::Verbose, 7),
        (Severity::Debug, 7),
        (Severity::Information, 30),
        (Severity::Warning, 60),
        (Severity::Error, 90),
        (Severity::Fatal, 90),
    ])
}

fn default_retention_batch_size() -> usize {
    500
}

fn default_max_batches() -> usize {
    10
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_days: default_retention_days(),
            levels: default_level_days(),
            batch_size: default_retention_batch_size(),
            max_batches_per_run: default_max_batches(),
            schedule: None,
        }
    }
}

impl RetentionConfig {
    /// Retention days for a level, falling back to `default_days`.
    pub fn days_for(&self, severity: Severity) -> u32 {
        self.levels.get(&severity).copied().unwrap_or(self.default_days)
    }
}

// Durations are written as "500ms", "5s", "5m", "24h" or "infinite"
mod duration_format {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&format_duration(*d)),
            None => serializer.serialize_str("infinite"),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "infinite" {
            Ok(None)
        } else {
            parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom)
        }
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }

        let (value_str, unit) = if let Some(v) = s.strip_suffix("ms") {
            (v, "ms")
        } else if let Some(v) = s.strip_suffix('s') {
            (v, "s")
        } else if let Some(v) = s.strip_suffix('m') {
            (v, "m")
        } else if let Some(v) = s.strip_suffix('h') {
            (v, "h")
        } else if let Some(v) = s.strip_suffix('d') {
            (v, "d")
        } else {
            return Err(format!("invalid duration format: {}", s));
        };

        let value: u64 = value_str
            .parse()
            .map_err(|_| format!("invalid numeric value: {}", value_str))?;

        Ok(match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => Duration::from_secs(value * 86400),
        })
    }

    fn format_duration(d: Duration) -> String {
        let secs = d.as_secs();
        if secs > 0 && secs % 86400 == 0 {
            format!("{}d", secs / 86400)
        } else if secs > 0 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs > 0 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else if secs > 0 && d.subsec_millis() == 0 {
            format!("{}s", secs)
        } else {
            format!("{}ms", d.as_millis())
        }
    }
}
