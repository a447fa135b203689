//! Local Cache Module
//!
//! Bounded, concurrency-safe map from key fingerprints to cache entries with
//! a pluggable eviction policy. All operations are in-memory and
//! non-blocking; callers from application tasks and the message delivery
//! task share the same instance.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::cache::{CacheEntry, CacheKey, CacheStats, LfuTracker, LruTracker};
use crate::config::EvictionPolicy;

// == Update Outcome ==
/// Result of a guarded upsert from the message-receive path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The entry was written; carries the replaced entry, if any
    Applied(Option<CacheEntry>),
    /// A local write newer than the message exists; nothing changed
    Rejected,
}

// == Eviction Tracker ==
/// Access tracker matching the configured eviction policy.
#[derive(Debug)]
enum Tracker {
    NoOp,
    Lru(LruTracker),
    Lfu(LfuTracker),
}

impl Tracker {
    fn touch(&mut self, key: CacheKey) {
        match self {
            Tracker::NoOp => {}
            Tracker::Lru(lru) => lru.touch(key),
            Tracker::Lfu(lfu) => lfu.touch(key),
        }
    }

    fn remove(&mut self, key: &CacheKey) {
        match self {
            Tracker::NoOp => {}
            Tracker::Lru(lru) => lru.remove(key),
            Tracker::Lfu(lfu) => lfu.remove(key),
        }
    }

    fn evict_oldest(&mut self) -> Option<CacheKey> {
        match self {
            Tracker::NoOp => None,
            Tracker::Lru(lru) => lru.evict_oldest(),
            Tracker::Lfu(lfu) => lfu.evict_oldest(),
        }
    }

    fn clear(&mut self) {
        match self {
            Tracker::NoOp => {}
            Tracker::Lru(lru) => lru.clear(),
            Tracker::Lfu(lfu) => lfu.clear(),
        }
    }
}

// == Inner State ==
#[derive(Debug)]
struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    tracker: Tracker,
    capacity: usize,
    stats: CacheStats,
}

// == Local Cache ==
/// Bounded local mirror of remote entries, indexed by key fingerprint.
///
/// With a bounded policy and a non-zero capacity the cache never holds more
/// than `capacity` entries; eviction is silent and never touches the remote
/// store.
#[derive(Debug)]
pub struct LocalCache {
    inner: Mutex<Inner>,
}

impl LocalCache {
    // == Constructor ==
    /// Creates a local cache with the given policy and capacity.
    ///
    /// Capacity is ignored when the policy is [`EvictionPolicy::None`].
    pub fn new(policy: EvictionPolicy, capacity: usize) -> Self {
        let tracker = match policy {
            EvictionPolicy::None => Tracker::NoOp,
            EvictionPolicy::Lru => Tracker::Lru(LruTracker::new()),
            EvictionPolicy::Lfu => Tracker::Lfu(LfuTracker::new()),
        };
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tracker,
                capacity,
                stats: CacheStats::new(),
            }),
        }
    }

    /// Locks the inner state, recovering from a poisoned mutex.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // == Get ==
    /// Looks up a verified entry and refreshes its access recency.
    ///
    /// A fingerprint hit whose stored key does not match `encoded_key` is a
    /// collision and is reported as a miss. Sentinel entries are hits; the
    /// caller inspects [`CacheEntry::is_miss`].
    pub fn get(&self, key: &CacheKey, encoded_key: &[u8]) -> Option<CacheEntry> {
        let mut inner = self.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.verify_key(encoded_key) => {
                let entry = entry.clone();
                inner.tracker.touch(*key);
                inner.stats.record_hit();
                Some(entry)
            }
            _ => {
                inner.stats.record_miss();
                None
            }
        }
    }

    // == Peek ==
    /// Looks up an entry without touching recency or statistics.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lock().entries.get(key).cloned()
    }

    // == Put ==
    /// Inserts or replaces an entry, evicting past capacity.
    ///
    /// Returns the replaced entry, if any.
    pub fn put(&self, key: CacheKey, entry: CacheEntry) -> Option<CacheEntry> {
        let mut inner = self.lock();
        let previous = inner.entries.insert(key, entry);
        inner.tracker.touch(key);
        if previous.is_none() {
            Self::enforce_capacity(&mut inner);
        }
        previous
    }

    // == Guarded Upsert ==
    /// Applies an entry from a peer update unless a newer local write exists.
    ///
    /// The incoming entry's `write_seq` is compared against the resident
    /// entry; a resident entry with a strictly larger stamp wins.
    pub fn upsert_if_newer(&self, key: CacheKey, entry: CacheEntry) -> UpdateOutcome {
        let mut inner = self.lock();
        if let Some(existing) = inner.entries.get(&key) {
            if existing.write_seq > entry.write_seq {
                return UpdateOutcome::Rejected;
            }
        }
        let previous = inner.entries.insert(key, entry);
        inner.tracker.touch(key);
        inner.stats.record_invalidation();
        if previous.is_none() {
            Self::enforce_capacity(&mut inner);
        }
        UpdateOutcome::Applied(previous)
    }

    // == Remove ==
    /// Removes an entry, returning it if present.
    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut inner = self.lock();
        let removed = inner.entries.remove(key);
        if removed.is_some() {
            inner.tracker.remove(key);
        }
        removed
    }

    // == Invalidate ==
    /// Removes an entry on behalf of the coherence protocol.
    pub fn invalidate(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut inner = self.lock();
        let removed = inner.entries.remove(key);
        if removed.is_some() {
            inner.tracker.remove(key);
            inner.stats.record_invalidation();
        }
        removed
    }

    // == Clear ==
    /// Empties the cache, returning the number of dropped entries.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.tracker.clear();
        count
    }

    // == Drain ==
    /// Empties the cache on behalf of the protocol, returning the dropped
    /// entries so invalidation listeners can be notified.
    pub fn drain(&self) -> Vec<CacheEntry> {
        let mut inner = self.lock();
        let drained: Vec<CacheEntry> = inner.entries.drain().map(|(_, entry)| entry).collect();
        inner.tracker.clear();
        for _ in &drained {
            inner.stats.record_invalidation();
        }
        drained
    }

    // == Snapshot ==
    /// Returns a copy of all resident entries with their fingerprints.
    pub fn snapshot(&self) -> Vec<(CacheKey, CacheEntry)> {
        self.lock()
            .entries
            .iter()
            .map(|(key, entry)| (*key, entry.clone()))
            .collect()
    }

    // == Length ==
    /// Returns the current number of resident entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut inner = self.lock();
        let total = inner.entries.len();
        inner.stats.set_total_entries(total);
        inner.stats.clone()
    }

    /// Evicts entries until the cache fits its capacity.
    fn enforce_capacity(inner: &mut Inner) {
        if inner.capacity == 0 || matches!(inner.tracker, Tracker::NoOp) {
            return;
        }
        while inner.entries.len() > inner.capacity {
            match inner.tracker.evict_oldest() {
                Some(victim) => {
                    inner.entries.remove(&victim);
                    inner.stats.record_eviction();
                }
                None => break,
            }
        }
    }
}
