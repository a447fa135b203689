//! Cache Module
//!
//! Bounded local mirror of remote entries: fingerprinted keys, miss
//! sentinels, LRU/LFU eviction trackers and the concurrency-safe cache map.

mod entry;
mod key;
mod lfu;
mod local;
mod lru;
mod stats;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::CacheEntry;
pub use key::{CacheKey, FINGERPRINT_LEN};
pub use lfu::LfuTracker;
pub use local::{LocalCache, UpdateOutcome};
pub use lru::LruTracker;
pub use stats::CacheStats;
