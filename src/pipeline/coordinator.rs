use crate::config::types::DedupConfig;
use crate::dedup::DedupCache;
use crate::event::{identity_hash, LogEvent};
use crate::storage::{LogRecord, LogStore, RecordUpdate, StorageError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FlushError {
    /// Nothing from the batch was persisted.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Repeats were committed but the new records were not.
    #[error("insert failed after {persisted} repeat occurrences were recorded: {source}")]
    PartialInsert {
        persisted: usize,
        #[source]
        source: StorageError,
    },
}

impl FlushError {
    /// Events of the failed batch that still reached the store.
    pub fn persisted(&self) -> usize {
        match self {
            FlushError::Storage(_) => 0,
            FlushError::PartialInsert { persisted, .. } => *persisted,
        }
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub events: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Distinct hashes resolved from the in-memory cache
    pub cache_hits: usize,
    /// Distinct hashes resolved by the store lookup
    pub store_hits: usize,
}

/// Occurrences of one identity hash within a single flush.
struct HashGroup {
    first: LogEvent,
    count: i64,
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
}

impl HashGroup {
    fn new(event: LogEvent) -> Self {
        Self {
            earliest: event.timestamp,
            latest: event.timestamp,
            first: event,
            count: 1,
        }
    }

    fn add(&mut self, event: &LogEvent) {
        self.count += 1;
        self.earliest = self.earliest.min(event.timestamp);
        self.latest = self.latest.max(event.timestamp);
    }
}

/// Turns buffered events into batched inserts and updates.
///
/// Flushes are serialized by an internal mutex so the cache and the store
/// never see two flushes interleave.
pub struct BatchCoordinator {
    store: Arc<dyn LogStore>,
    cache: DedupCache,
    dedup: DedupConfig,
    flush_lock: Mutex<()>,
}

impl BatchCoordinator {
    pub fn new(store: Arc<dyn LogStore>, cache: DedupCache, dedup: DedupConfig) -> Self {
        Self {
            store,
            cache,
            dedup,
            flush_lock: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    /// Persist a batch of already-filtered events.
    ///
    /// `now` anchors the dedup window while records keep their event
    /// timestamps, so events older than the window never match an existing
    /// record.
    pub async fn flush(
        &self,
        events: Vec<LogEvent>,
        now: DateTime<Utc>,
    ) -> Result<FlushReport, FlushError> {
        if events.is_empty() {
            return Ok(FlushReport::default());
        }

        let _guard = self.flush_lock.lock().await;

        if self.dedup.enabled {
            self.flush_deduplicated(events, now).await
        } else {
            self.flush_all(events).await
        }
    }

    async fn flush_all(&self, events: Vec<LogEvent>) -> Result<FlushReport, FlushError> {
        let records: Vec<LogRecord> = events
            .into_iter()
            .map(|event| {
                let hash = identity_hash(&event);
                let group = HashGroup::new(event);
                self.new_record(&hash, &group)
            })
            .collect();

        self.store.batch_insert(&records).await?;

        Ok(FlushReport {
            events: records.len(),
            inserted: records.len(),
            ..FlushReport::default()
        })
    }

    async fn flush_deduplicated(
        &self,
        events: Vec<LogEvent>,
        now: DateTime<Utc>,
    ) -> Result<FlushReport, FlushError> {
        let window_start = now - self.dedup.window();
        let mut report = FlushReport {
            events: events.len(),
            ..FlushReport::default()
        };

        // Group by hash, keeping first-seen order so inserts are deterministic
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, HashGroup> = HashMap::new();
        for event in events {
            let hash = identity_hash(&event);
            match groups.get_mut(&hash) {
                Some(group) => group.add(&event),
                None => {
                    order.push(hash.clone());
                    groups.insert(hash, HashGroup::new(event));
                }
            }
        }

        let mut repeats: Vec<(String, Uuid, DateTime<Utc>)> = Vec::new();
        let mut misses: Vec<String> = Vec::new();
        for hash in &order {
            match self.cache.lookup(hash, window_start) {
                Some(id) => {
                    report.cache_hits += 1;
                    repeats.push((hash.clone(), id, groups[hash].latest));
                }
                None => misses.push(hash.clone()),
            }
        }

        let found = self.store.batch_lookup_by_hash(&misses, window_start).await?;

        let mut new_hashes: Vec<String> = Vec::new();
        for hash in misses {
            match found.get(&hash) {
                Some(existing) => {
                    report.store_hits += 1;
                    let seen = groups[&hash].latest.max(existing.last_occurrence);
                    repeats.push((hash, existing.id, seen));
                }
                None => new_hashes.push(hash),
            }
        }

        let updates: Vec<RecordUpdate> = repeats
            .iter()
            .map(|(hash, id, _)| RecordUpdate {
                id: *id,
                last_occurrence: groups[hash].latest,
                increment_by: groups[hash].count,
            })
            .collect();

        let records: Vec<LogRecord> = new_hashes
            .iter()
            .map(|hash| self.new_record(hash, &groups[hash]))
            .collect();

        self.store.batch_update(&updates).await?;

        // The cache only learns about records the store has accepted
        for (hash, id, seen) in &repeats {
            self.cache.put(hash, *id, *seen);
        }

        if let Err(source) = self.store.batch_insert(&records).await {
            let persisted = updates.iter().map(|u| u.increment_by as usize).sum();
            return Err(FlushError::PartialInsert { persisted, source });
        }

        for record in &records {
            self.cache.put(&record.message_hash, record.id, record.last_occurrence);
        }

        report.updated = updates.len();
        report.inserted = records.len();
        Ok(report)
    }

    fn new_record(&self, hash: &str, group: &HashGroup) -> LogRecord {
        let event = &group.first;
        LogRecord {
            id: Uuid::new_v4(),
            timestamp: group.latest,
            level: event.severity.as_str().to_string(),
            message: event.message.clone(),
            exception: event.exception.clone(),
            properties: serialize_properties(event),
            raw_event: serialize_raw_event(event),
            message_hash: hash.to_string(),
            first_occurrence: group.earliest,
            last_occurrence: group.latest,
            occurrence_count: group.count,
            dedup_window_minutes: self.dedup.window_minutes,
        }
    }
}

/// Serialization failures store NULL rather than losing the record.
fn serialize_properties(event: &LogEvent) -> Option<String> {
    serde_json::to_string(&event.properties).ok()
}

fn serialize_raw_event(event: &LogEvent) -> Option<String> {
    serde_json::to_string(&serde_json::json!({
        "message_template": event.message_template,
        "level": event.severity.as_str(),
        "timestamp": event.timestamp,
    }))
    .ok()
}
