use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub record_id: Uuid,
    pub last_seen: DateTime<Utc>,
}

/// In-process map from identity hash to the record currently absorbing its
/// repeats.
///
/// Only an optimization in front of the store: a miss means "ask the store",
/// never "this is new". Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct DedupCache {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record id for `hash` if its entry was seen strictly after `window_start`.
    pub fn lookup(&self, hash: &str, window_start: DateTime<Utc>) -> Option<Uuid> {
        self.entries
            .get(hash)
            .filter(|entry| entry.last_seen > window_start)
            .map(|entry| entry.record_id)
    }

    pub fn put(&self, hash: &str, record_id: Uuid, seen_at: DateTime<Utc>) {
        self.entries
            .entry(hash.to_string())
            .and_modify(|entry| {
                // Same record: keep the newest sighting. New record: it replaces the old one.
                if entry.record_id != record_id || seen_at > entry.last_seen {
                    *entry = CacheEntry { record_id, last_seen: seen_at };
                }
            })
            .or_insert(CacheEntry { record_id, last_seen: seen_at });
    }

    /// Remove entries last seen before `now - ttl`. Returns how many were removed.
    pub fn evict_expired(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let cutoff = now - ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.last_seen >= cutoff);
        before.saturating_sub(self.entries.len())
    }

    pub fn get(&self, hash: &str) -> Option<CacheEntry> {
        self.entries.get(hash).map(|entry| *entry)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Periodically evict stale cache entries until `shutdown` flips to true.
///
/// Runs on its own timer and never touches the flush lock.
pub async fn run_eviction(
    cache: DedupCache,
    interval: std::time::Duration,
    ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = cache.evict_expired(Utc::now(), ttl);
                if removed > 0 {
                    debug!(removed, remaining = cache.len(), "Evicted expired dedup cache entries");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!("Dedup cache eviction stopped");
}
