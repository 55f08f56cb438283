use crate::event::Severity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Relational persistence for deduplicated log records.
///
/// Every batch method is expected to apply its whole input atomically.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Find the most recent record per hash whose last occurrence is strictly
    /// after `window_start`.
    async fn batch_lookup_by_hash(
        &self,
        hashes: &[String],
        window_start: DateTime<Utc>,
    ) -> Result<HashMap<String, ExistingRecord>, StorageError>;

    async fn batch_insert(&self, records: &[LogRecord]) -> Result<(), StorageError>;

    async fn batch_update(&self, updates: &[RecordUpdate]) -> Result<(), StorageError>;

    /// Delete up to `limit` records in `scope` whose effective age is before
    /// `cutoff`, oldest first. Returns the ids that were deleted.
    async fn batch_delete_older_than(
        &self,
        scope: RetentionScope,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, StorageError>;

    /// Number of records in `scope` whose effective age is before `cutoff`.
    async fn count_older_than(
        &self,
        scope: RetentionScope,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StorageError>;

    async fn get_record(&self, id: Uuid) -> Result<Option<LogRecord>, StorageError>;

    async fn find_by_hash(&self, message_hash: &str) -> Result<Vec<LogRecord>, StorageError>;

    async fn count_by_level(&self) -> Result<Vec<LevelCount>, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored value: {0}")]
    InvalidData(String),
}

/// A persisted, possibly merged, log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub exception: Option<String>,
    pub properties: Option<String>,
    pub raw_event: Option<String>,
    pub message_hash: String,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub occurrence_count: i64,
    pub dedup_window_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingRecord {
    pub id: Uuid,
    pub last_occurrence: DateTime<Utc>,
}

/// Merge of repeat occurrences into an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordUpdate {
    pub id: Uuid,
    pub last_occurrence: DateTime<Utc>,
    pub increment_by: i64,
}

/// Which records a retention pass applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetentionScope {
    Level(Severity),
    /// Records with no level or a level that is not a known severity.
    Other,
}

impl std::fmt::Display for RetentionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetentionScope::Level(severity) => write!(f, "{}", severity),
            RetentionScope::Other => f.write_str("other"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelCount {
    pub level: Option<String>,
    pub records: i64,
    pub occurrences: i64,
}
