pub mod cache;

pub use cache::{run_eviction, CacheEntry, DedupCache};
