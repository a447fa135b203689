//! Cache Statistics Module
//!
//! Tracks local cache performance metrics: hits, misses, evictions and
//! entries removed or updated by the coherence protocol.

use serde::Serialize;

// == Cache Stats ==
/// Tracks local cache performance metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of reads answered from the local cache (sentinel hits included)
    pub hits: u64,
    /// Number of reads the local cache could not answer
    pub misses: u64,
    /// Number of entries evicted by the bounded eviction policy
    pub evictions: u64,
    /// Number of entries removed or replaced by coherence messages
    pub invalidations: u64,
    /// Current number of locally cached entries
    pub total_entries: usize,
}

impl CacheStats {
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the local hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub(crate) fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub(crate) fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub(crate) fn record_invalidation(&mut self) {
        self.invalidations += 1;
    }

    pub(crate) fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}
