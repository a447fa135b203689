//! Reconnection Handler Module
//!
//! Reacts to messaging-channel connectivity transitions. While the channel
//! is down the local cache keeps serving (staleness accrues); once the
//! subscription is re-established the configured strategy decides how the
//! cache is reconciled against the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::bus::{ConnectionState, ConnectionStateListener};
use crate::cache::{CacheEntry, LocalCache};
use crate::config::ReconnectionStrategy;
use crate::store::Store;

// == Reconnection Handler ==
/// Applies the reconnection strategy on connectivity transitions.
pub struct ReconnectionHandler {
    strategy: ReconnectionStrategy,
    cache: Arc<LocalCache>,
    store: Arc<dyn Store>,
    synced: AtomicBool,
}

impl ReconnectionHandler {
    /// Creates a handler for one map instance.
    pub fn new(
        strategy: ReconnectionStrategy,
        cache: Arc<LocalCache>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            strategy,
            cache,
            store,
            synced: AtomicBool::new(true),
        }
    }

    /// Returns false between a disconnect and the completed reconciliation.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Relaxed)
    }

    // == Reconciliation ==
    /// Runs the configured strategy after resubscription.
    async fn reconcile(&self) {
        match self.strategy {
            ReconnectionStrategy::None => {
                debug!("reconnected, reconciliation disabled");
            }
            ReconnectionStrategy::Clear => {
                let dropped = self.cache.clear();
                info!(dropped, "reconnected, local cache flushed");
            }
            ReconnectionStrategy::Load => {
                self.reload().await;
            }
        }
    }

    /// Re-fetches every cached key from the store in one batch; replaces
    /// stale values and evicts keys no longer present remotely.
    async fn reload(&self) {
        let snapshot = self.cache.snapshot();
        if snapshot.is_empty() {
            info!("reconnected, nothing cached to reload");
            return;
        }
        let keys: Vec<Vec<u8>> = snapshot
            .iter()
            .map(|(_, entry)| entry.encoded_key.clone())
            .collect();
        let values = match self.store.get_all(&keys).await {
            Ok(values) => values,
            Err(error) => {
                warn!(%error, "reload after reconnect failed, cached entries may be stale");
                return;
            }
        };
        let mut refreshed = 0usize;
        let mut evicted = 0usize;
        for ((fingerprint, entry), value) in snapshot.into_iter().zip(values) {
            match value {
                Some(value) => {
                    // Stamp 0: a reload is a read fill, not a local write
                    self.cache
                        .put(fingerprint, CacheEntry::new(entry.encoded_key, value, 0));
                    refreshed += 1;
                }
                None if entry.is_miss() => {
                    // Sentinel still accurate, leave it in place
                }
                None => {
                    self.cache.remove(&fingerprint);
                    evicted += 1;
                }
            }
        }
        info!(refreshed, evicted, "reconnected, local cache reloaded from store");
    }
}

#[async_trait]
impl ConnectionStateListener for ReconnectionHandler {
    async fn on_state_change(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {}
            ConnectionState::Disconnected => {
                self.synced.store(false, Ordering::Relaxed);
                warn!("invalidation channel lost, cache serving with staleness risk");
            }
            ConnectionState::Reconnected => {
                self.reconcile().await;
                self.synced.store(true, Ordering::Relaxed);
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::config::EvictionPolicy;
    use crate::store::MemoryStore;

    fn cached(cache: &LocalCache, key: &str, value: &str) -> CacheKey {
        let encoded = key.as_bytes().to_vec();
        let fingerprint = CacheKey::of(&encoded);
        cache.put(
            fingerprint,
            CacheEntry::new(encoded, value.as_bytes().to_vec(), 1),
        );
        fingerprint
    }

    #[tokio::test]
    async fn test_disconnect_marks_unsynced() {
        let cache = Arc::new(LocalCache::new(EvictionPolicy::None, 0));
        let store = Arc::new(MemoryStore::new());
        let handler = ReconnectionHandler::new(ReconnectionStrategy::None, cache, store);

        assert!(handler.is_synced());
        handler
            .on_state_change(ConnectionState::Disconnected)
            .await;
        assert!(!handler.is_synced());
        handler.on_state_change(ConnectionState::Reconnected).await;
        assert!(handler.is_synced());
    }

    #[tokio::test]
    async fn test_clear_strategy_flushes_cache() {
        let cache = Arc::new(LocalCache::new(EvictionPolicy::None, 0));
        let store = Arc::new(MemoryStore::new());
        cached(&cache, "k1", "v1");
        cached(&cache, "k2", "v2");

        let handler =
            ReconnectionHandler::new(ReconnectionStrategy::Clear, cache.clone(), store);
        handler.on_state_change(ConnectionState::Reconnected).await;

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_load_strategy_refreshes_and_evicts() {
        let cache = Arc::new(LocalCache::new(EvictionPolicy::None, 0));
        let store = Arc::new(MemoryStore::new());

        let stale = cached(&cache, "stale", "old");
        let gone = cached(&cache, "gone", "whatever");
        store
            .put(b"stale".to_vec(), b"new".to_vec())
            .await
            .unwrap();

        let handler = ReconnectionHandler::new(
            ReconnectionStrategy::Load,
            cache.clone(),
            store.clone(),
        );
        handler.on_state_change(ConnectionState::Reconnected).await;

        assert_eq!(
            cache.peek(&stale).unwrap().value.as_deref(),
            Some(&b"new"[..])
        );
        assert!(cache.peek(&gone).is_none());
    }

    #[tokio::test]
    async fn test_load_strategy_keeps_accurate_sentinels() {
        let cache = Arc::new(LocalCache::new(EvictionPolicy::None, 0));
        let store = Arc::new(MemoryStore::new());

        let fingerprint = CacheKey::of(b"absent");
        cache.put(fingerprint, CacheEntry::miss(b"absent".to_vec(), 1));

        let handler =
            ReconnectionHandler::new(ReconnectionStrategy::Load, cache.clone(), store);
        handler.on_state_change(ConnectionState::Reconnected).await;

        assert!(cache.peek(&fingerprint).unwrap().is_miss());
    }

    #[tokio::test]
    async fn test_load_strategy_survives_store_failure() {
        let cache = Arc::new(LocalCache::new(EvictionPolicy::None, 0));
        let store = Arc::new(MemoryStore::new());
        cached(&cache, "k", "v");
        store.set_offline(true);

        let handler =
            ReconnectionHandler::new(ReconnectionStrategy::Load, cache.clone(), store);
        handler.on_state_change(ConnectionState::Reconnected).await;

        // Entries are kept rather than dropped when the reload fails
        assert_eq!(cache.len(), 1);
        assert!(handler.is_synced());
    }
}
