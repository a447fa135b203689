//! Configuration Module
//!
//! Options controlling eviction, coherence and reconnection behavior of a
//! local cached map instance. All options are plain values selected at
//! construction time; nothing here reads the environment.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::store::{MapLoader, MapWriter};

// == Eviction Policy ==
/// Policy used to bound the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Unbounded cache, `cache_size` is ignored
    None,
    /// Evict the least recently accessed entry
    Lru,
    /// Evict the least frequently accessed entry, ties broken by recency
    Lfu,
}

// == Sync Strategy ==
/// Policy governing how local writes are propagated to peer instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Writes are not announced; peer caches drift until they re-read
    None,
    /// Writes publish the affected key fingerprints so peers drop their copies
    Invalidate,
    /// Writes publish the new values so peers update in place
    Update,
}

// == Reconnection Strategy ==
/// Policy applied to the local cache after the messaging channel recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionStrategy {
    /// Keep serving whatever is cached; staleness is accepted
    None,
    /// Flush the entire local cache on resubscription
    Clear,
    /// Re-fetch every cached key from the store on resubscription
    Load,
}

// == Write Mode ==
/// How writes are mirrored to an external [`MapWriter`], when one is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Writer is invoked inline, after the store mutation
    WriteThrough,
    /// Writer calls are queued and flushed in batches by a background task
    WriteBehind,
}

// == Cache Options ==
/// Options for a [`LocalCachedMap`](crate::map::LocalCachedMap) instance.
///
/// Defaults mirror the conservative choices of the defaults constructor:
/// unbounded cache, invalidation-based sync, no reconnection reconciliation,
/// misses not stored.
#[derive(Clone)]
pub struct CacheOptions {
    /// Eviction policy for the local cache
    pub eviction_policy: EvictionPolicy,
    /// Maximum number of locally cached entries, 0 = unbounded
    pub cache_size: usize,
    /// Write propagation policy
    pub sync_strategy: SyncStrategy,
    /// Reconciliation policy after a messaging outage
    pub reconnection_strategy: ReconnectionStrategy,
    /// Store a sentinel entry for keys absent from the store
    pub store_cache_miss: bool,
    /// How writes reach the external writer, if one is configured
    pub write_mode: WriteMode,
    /// Flush threshold for write-behind batching
    pub write_behind_batch_size: usize,
    /// Maximum delay before a partial write-behind batch is flushed
    pub write_behind_delay: Duration,
    /// Optional external loader consulted on combined cache+store misses
    pub loader: Option<Arc<dyn MapLoader>>,
    /// Optional external writer mirroring store mutations
    pub writer: Option<Arc<dyn MapWriter>>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            eviction_policy: EvictionPolicy::None,
            cache_size: 0,
            sync_strategy: SyncStrategy::Invalidate,
            reconnection_strategy: ReconnectionStrategy::None,
            store_cache_miss: false,
            write_mode: WriteMode::WriteThrough,
            write_behind_batch_size: 50,
            write_behind_delay: Duration::from_millis(1000),
            loader: None,
            writer: None,
        }
    }
}

impl CacheOptions {
    /// Creates options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the eviction policy.
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Sets the maximum number of locally cached entries (0 = unbounded).
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Sets the write propagation policy.
    pub fn with_sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.sync_strategy = strategy;
        self
    }

    /// Sets the reconnection reconciliation policy.
    pub fn with_reconnection_strategy(mut self, strategy: ReconnectionStrategy) -> Self {
        self.reconnection_strategy = strategy;
        self
    }

    /// Enables or disables storing miss sentinels.
    pub fn with_store_cache_miss(mut self, store: bool) -> Self {
        self.store_cache_miss = store;
        self
    }

    /// Sets the external loader.
    pub fn with_loader(mut self, loader: Arc<dyn MapLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Sets the external writer and its write mode.
    pub fn with_writer(mut self, writer: Arc<dyn MapWriter>, mode: WriteMode) -> Self {
        self.writer = Some(writer);
        self.write_mode = mode;
        self
    }

    /// Sets the write-behind flush threshold.
    pub fn with_write_behind_batch_size(mut self, size: usize) -> Self {
        self.write_behind_batch_size = size;
        self
    }

    /// Sets the maximum delay before a partial write-behind batch is flushed.
    pub fn with_write_behind_delay(mut self, delay: Duration) -> Self {
        self.write_behind_delay = delay;
        self
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("eviction_policy", &self.eviction_policy)
            .field("cache_size", &self.cache_size)
            .field("sync_strategy", &self.sync_strategy)
            .field("reconnection_strategy", &self.reconnection_strategy)
            .field("store_cache_miss", &self.store_cache_miss)
            .field("write_mode", &self.write_mode)
            .field("write_behind_batch_size", &self.write_behind_batch_size)
            .field("write_behind_delay", &self.write_behind_delay)
            .field("loader", &self.loader.as_ref().map(|_| "<loader>"))
            .field("writer", &self.writer.as_ref().map(|_| "<writer>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let options = CacheOptions::default();
        assert_eq!(options.eviction_policy, EvictionPolicy::None);
        assert_eq!(options.cache_size, 0);
        assert_eq!(options.sync_strategy, SyncStrategy::Invalidate);
        assert_eq!(options.reconnection_strategy, ReconnectionStrategy::None);
        assert!(!options.store_cache_miss);
        assert_eq!(options.write_mode, WriteMode::WriteThrough);
    }

    #[test]
    fn test_options_builder() {
        let options = CacheOptions::new()
            .with_eviction_policy(EvictionPolicy::Lfu)
            .with_cache_size(5)
            .with_sync_strategy(SyncStrategy::Update)
            .with_reconnection_strategy(ReconnectionStrategy::Clear)
            .with_store_cache_miss(true)
            .with_write_behind_batch_size(10)
            .with_write_behind_delay(Duration::from_millis(200));

        assert_eq!(options.eviction_policy, EvictionPolicy::Lfu);
        assert_eq!(options.cache_size, 5);
        assert_eq!(options.sync_strategy, SyncStrategy::Update);
        assert_eq!(options.reconnection_strategy, ReconnectionStrategy::Clear);
        assert!(options.store_cache_miss);
        assert_eq!(options.write_behind_batch_size, 10);
        assert_eq!(options.write_behind_delay, Duration::from_millis(200));
    }
}
