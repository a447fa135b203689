//! LRU Tracker Module
//!
//! Tracks access recency for LRU eviction. Implemented as a doubly-linked
//! list whose links live inside a hash map node table, giving O(1) touch,
//! remove and evict.

use std::collections::HashMap;

use crate::cache::CacheKey;

// == List Node ==
/// Links of one tracked key. `prev` points toward the head (most recent).
#[derive(Debug, Clone, Copy)]
struct Node {
    prev: Option<CacheKey>,
    next: Option<CacheKey>,
}

// == LRU Tracker ==
/// Tracks access order for LRU eviction.
///
/// - Head = most recently used
/// - Tail = least recently used
#[derive(Debug, Default)]
pub struct LruTracker {
    nodes: HashMap<CacheKey, Node>,
    head: Option<CacheKey>,
    tail: Option<CacheKey>,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used.
    ///
    /// New keys are inserted at the head; known keys are moved there.
    pub fn touch(&mut self, key: CacheKey) {
        self.unlink(&key);
        self.push_front(key);
    }

    // == Remove ==
    /// Removes a key from the tracker. Unknown keys are ignored.
    pub fn remove(&mut self, key: &CacheKey) {
        self.unlink(key);
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    pub fn evict_oldest(&mut self) -> Option<CacheKey> {
        let oldest = self.tail?;
        self.unlink(&oldest);
        Some(oldest)
    }

    // == Peek Oldest ==
    /// Returns the least recently used key without removing it.
    pub fn peek_oldest(&self) -> Option<CacheKey> {
        self.tail
    }

    // == Clear ==
    /// Drops all tracked keys.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.head = None;
        self.tail = None;
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

    // == Internal List Operations ==
    /// Detaches a key from the list, fixing up its neighbors.
    fn unlink(&mut self, key: &CacheKey) -> bool {
        let node = match self.nodes.remove(key) {
            Some(node) => node,
            None => return false,
        };
        match node.prev {
            Some(prev) => {
                if let Some(prev_node) = self.nodes.get_mut(&prev) {
                    prev_node.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(next_node) = self.nodes.get_mut(&next) {
                    next_node.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }
        true
    }

    /// Inserts a key at the head of the list.
    fn push_front(&mut self, key: CacheKey) {
        let node = Node {
            prev: None,
            next: self.head,
        };
        if let Some(old_head) = self.head {
            if let Some(head_node) = self.nodes.get_mut(&old_head) {
                head_node.prev = Some(key);
            }
        }
        self.head = Some(key);
        if self.tail.is_none() {
            self.tail = Some(key);
        }
        self.nodes.insert(key, node);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn k(name: &str) -> CacheKey {
        CacheKey::of(name.as_bytes())
    }

    #[test]
    fn test_lru_new() {
        let lru = LruTracker::new();
        assert!(lru.is_empty());
        assert_eq!(lru.len(), 0);
        assert_eq!(lru.peek_oldest(), None);
    }

    #[test]
    fn test_lru_touch_new_keys() {
        let mut lru = LruTracker::new();

        lru.touch(k("key1"));
        lru.touch(k("key2"));
        lru.touch(k("key3"));

        assert_eq!(lru.len(), 3);
        // key1 is oldest (added first)
        assert_eq!(lru.peek_oldest(), Some(k("key1")));
    }

    #[test]
    fn test_lru_touch_existing_key() {
        let mut lru = LruTracker::new();

        lru.touch(k("key1"));
        lru.touch(k("key2"));
        lru.touch(k("key3"));

        // Touch key1 again - should move to front
        lru.touch(k("key1"));

        assert_eq!(lru.len(), 3);
        // key2 is now oldest
        assert_eq!(lru.peek_oldest(), Some(k("key2")));
    }

    #[test]
    fn test_lru_evict_oldest() {
        let mut lru = LruTracker::new();

        lru.touch(k("key1"));
        lru.touch(k("key2"));
        lru.touch(k("key3"));

        assert_eq!(lru.evict_oldest(), Some(k("key1")));
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.evict_oldest(), Some(k("key2")));
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn test_lru_evict_empty() {
        let mut lru = LruTracker::new();
        assert_eq!(lru.evict_oldest(), None);
    }

    #[test]
    fn test_lru_remove_middle() {
        let mut lru = LruTracker::new();

        lru.touch(k("key1"));
        lru.touch(k("key2"));
        lru.touch(k("key3"));

        lru.remove(&k("key2"));

        assert_eq!(lru.len(), 2);
        assert!(!lru.contains(&k("key2")));
        assert_eq!(lru.evict_oldest(), Some(k("key1")));
        assert_eq!(lru.evict_oldest(), Some(k("key3")));
    }

    #[test]
    fn test_lru_remove_nonexistent_key() {
        let mut lru = LruTracker::new();

        lru.touch(k("key1"));
        lru.remove(&k("nonexistent"));

        assert_eq!(lru.len(), 1);
        assert!(lru.contains(&k("key1")));
    }

    #[test]
    fn test_lru_order_after_multiple_touches() {
        let mut lru = LruTracker::new();

        lru.touch(k("a"));
        lru.touch(k("b"));
        lru.touch(k("c"));

        // Re-touch in a different order: a, then c, then b
        lru.touch(k("a"));
        lru.touch(k("c"));
        lru.touch(k("b"));

        // Eviction order is oldest first: a, c, b
        assert_eq!(lru.evict_oldest(), Some(k("a")));
        assert_eq!(lru.evict_oldest(), Some(k("c")));
        assert_eq!(lru.evict_oldest(), Some(k("b")));
    }

    #[test]
    fn test_lru_touch_same_key_multiple_times() {
        let mut lru = LruTracker::new();

        lru.touch(k("key1"));
        lru.touch(k("key1"));
        lru.touch(k("key1"));

        assert_eq!(lru.len(), 1);
        assert_eq!(lru.evict_oldest(), Some(k("key1")));
        assert!(lru.is_empty());
    }

    #[test]
    fn test_lru_clear() {
        let mut lru = LruTracker::new();

        lru.touch(k("key1"));
        lru.touch(k("key2"));
        lru.clear();

        assert!(lru.is_empty());
        assert_eq!(lru.evict_oldest(), None);
    }

    #[test]
    fn test_lru_single_entry_links() {
        let mut lru = LruTracker::new();

        lru.touch(k("only"));
        assert_eq!(lru.peek_oldest(), Some(k("only")));

        lru.touch(k("only"));
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.evict_oldest(), Some(k("only")));
        assert_eq!(lru.peek_oldest(), None);
    }
}
