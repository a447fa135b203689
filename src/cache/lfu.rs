//! LFU Tracker Module
//!
//! Tracks access frequency for LFU eviction. Keys live in per-frequency
//! buckets, each bucket ordered by recency, so eviction picks the least
//! frequently used key and breaks ties toward the least recently used one.
//! Touch, remove and evict are O(1) in the number of tracked keys.

use std::collections::{BTreeMap, HashMap};

use crate::cache::CacheKey;

// == List Node ==
/// Links of one tracked key inside its frequency bucket.
#[derive(Debug, Clone, Copy)]
struct LfuNode {
    freq: u64,
    prev: Option<CacheKey>,
    next: Option<CacheKey>,
}

// == Frequency Bucket ==
/// One recency-ordered list of keys sharing an access frequency.
///
/// - Head = most recently used at this frequency
/// - Tail = least recently used at this frequency
#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    head: Option<CacheKey>,
    tail: Option<CacheKey>,
}

// == LFU Tracker ==
/// Tracks access frequency for LFU eviction.
#[derive(Debug, Default)]
pub struct LfuTracker {
    nodes: HashMap<CacheKey, LfuNode>,
    buckets: BTreeMap<u64, Bucket>,
}

impl LfuTracker {
    // == Constructor ==
    /// Creates a new empty LFU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Records an access: new keys start at frequency 1, known keys move up
    /// one frequency bucket and become most recent within it.
    pub fn touch(&mut self, key: CacheKey) {
        let freq = match self.unlink(&key) {
            Some(old_freq) => old_freq + 1,
            None => 1,
        };
        self.push_front(key, freq);
    }

    // == Remove ==
    /// Removes a key from the tracker. Unknown keys are ignored.
    pub fn remove(&mut self, key: &CacheKey) {
        self.unlink(key);
    }

    // == Evict Oldest ==
    /// Returns and removes the least frequently used key, breaking ties
    /// toward the least recently used one.
    pub fn evict_oldest(&mut self) -> Option<CacheKey> {
        let victim = {
            let (_, bucket) = self.buckets.iter().next()?;
            bucket.tail?
        };
        self.unlink(&victim);
        Some(victim)
    }

    // == Clear ==
    /// Drops all tracked keys.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.buckets.clear();
    }

    // == Length ==
    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Checks if a key is being tracked.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Returns the recorded access frequency of a key.
    pub fn frequency(&self, key: &CacheKey) -> Option<u64> {
        self.nodes.get(key).map(|node| node.freq)
    }

    // == Internal List Operations ==
    /// Detaches a key from its bucket, returning its old frequency.
    ///
    /// Empty buckets are dropped so the lowest map entry always holds keys.
    fn unlink(&mut self, key: &CacheKey) -> Option<u64> {
        let node = self.nodes.remove(key)?;
        if let Some(bucket) = self.buckets.get_mut(&node.freq) {
            match node.prev {
                Some(prev) => {
                    if let Some(prev_node) = self.nodes.get_mut(&prev) {
                        prev_node.next = node.next;
                    }
                }
                None => bucket.head = node.next,
            }
            match node.next {
                Some(next) => {
                    if let Some(next_node) = self.nodes.get_mut(&next) {
                        next_node.prev = node.prev;
                    }
                }
                None => bucket.tail = node.prev,
            }
            if bucket.head.is_none() {
                self.buckets.remove(&node.freq);
            }
        }
        Some(node.freq)
    }

    /// Inserts a key at the head of the bucket for the given frequency.
    fn push_front(&mut self, key: CacheKey, freq: u64) {
        let bucket = self.buckets.entry(freq).or_default();
        let node = LfuNode {
            freq,
            prev: None,
            next: bucket.head,
        };
        let old_head = bucket.head;
        bucket.head = Some(key);
        if bucket.tail.is_none() {
            bucket.tail = Some(key);
        }
        if let Some(old_head) = old_head {
            if let Some(head_node) = self.nodes.get_mut(&old_head) {
                head_node.prev = Some(key);
            }
        }
        self.nodes.insert(key, node);
    }
}
