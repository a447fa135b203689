//! Coherence Protocol Module
//!
//! The write/invalidation protocol keeping peer caches of the same logical
//! map consistent. Local writes are applied to the local cache synchronously
//! and then announced on the map's channel according to the sync strategy;
//! incoming messages are applied idempotently on the delivery task.
//!
//! Propagation is fire-and-forget: a publish failure after a successful
//! store write is logged and swallowed, leaving a bounded staleness window
//! that the reconnection handler closes once the channel recovers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{Bus, BusSubscriber};
use crate::cache::{CacheEntry, CacheKey, LocalCache, UpdateOutcome};
use crate::config::SyncStrategy;
use crate::protocol::message::{CoherenceMessage, MessageKind};

/// Identifier of a registered invalidation listener.
pub type ListenerId = u64;

// == Invalidate Listener ==
/// Observer of entries removed or replaced by the coherence protocol.
///
/// Invoked synchronously from the path that changed the cache: the local
/// write path when a write is announced, or the message delivery task for
/// incoming traffic. `value` is present only when a peer update carried one.
pub trait InvalidateListener: Send + Sync {
    fn on_invalidate(&self, encoded_key: &[u8], value: Option<&[u8]>);
}

// == Coherence Protocol ==
/// Per-instance protocol state: origin id, logical write clock, strategy.
pub struct CoherenceProtocol {
    origin_id: Uuid,
    /// Logical clock stamping local writes; advanced past any stamp seen on
    /// the wire so cross-instance comparisons approximate causality
    seq: AtomicU64,
    sync_strategy: SyncStrategy,
    channel: String,
    cache: Arc<LocalCache>,
    bus: Arc<dyn Bus>,
    listeners: Mutex<HashMap<ListenerId, Arc<dyn InvalidateListener>>>,
    next_listener_id: AtomicU64,
}

impl CoherenceProtocol {
    // == Constructor ==
    /// Creates protocol state for one map instance.
    pub fn new(
        channel: String,
        sync_strategy: SyncStrategy,
        cache: Arc<LocalCache>,
        bus: Arc<dyn Bus>,
    ) -> Self {
        Self {
            origin_id: Uuid::new_v4(),
            seq: AtomicU64::new(0),
            sync_strategy,
            channel,
            cache,
            bus,
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Unique id of this instance, used for self-filtering.
    pub fn origin_id(&self) -> Uuid {
        self.origin_id
    }

    /// Returns the next local write stamp.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Advances the clock past a stamp observed on the wire.
    fn observe_seq(&self, seen: u64) {
        self.seq.fetch_max(seen, Ordering::Relaxed);
    }

    fn lock_listeners(&self) -> MutexGuard<'_, HashMap<ListenerId, Arc<dyn InvalidateListener>>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // == Listener Registry ==
    /// Registers an invalidation listener, returning its id.
    pub fn add_listener(&self, listener: Arc<dyn InvalidateListener>) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.lock_listeners().insert(id, listener);
        id
    }

    /// Removes a listener. Safe against concurrent delivery.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.lock_listeners().remove(&id).is_some()
    }

    /// Notifies all listeners outside the registry lock.
    fn fire(&self, encoded_key: &[u8], value: Option<&[u8]>) {
        let listeners: Vec<_> = self.lock_listeners().values().cloned().collect();
        for listener in listeners {
            listener.on_invalidate(encoded_key, value);
        }
    }

    // == Write Path ==
    /// Runs after the store accepted a batch of writes: applies them to the
    /// local cache with fresh stamps, then announces them per strategy.
    pub async fn on_store_put(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) {
        let mut stamped = Vec::with_capacity(entries.len());
        for (encoded_key, value) in entries {
            let seq = self.next_seq();
            let fingerprint = CacheKey::of(&encoded_key);
            self.cache.put(
                fingerprint,
                CacheEntry::new(encoded_key.clone(), value.clone(), seq),
            );
            stamped.push((encoded_key, value, seq));
        }
        match self.sync_strategy {
            SyncStrategy::None => {}
            SyncStrategy::Invalidate => {
                let keys: Vec<(CacheKey, u64)> = stamped
                    .iter()
                    .map(|(encoded_key, _, seq)| (CacheKey::of(encoded_key), *seq))
                    .collect();
                self.publish(CoherenceMessage::invalidate(self.origin_id, keys))
                    .await;
                for (encoded_key, _, _) in &stamped {
                    self.fire(encoded_key, None);
                }
            }
            SyncStrategy::Update => {
                self.publish(CoherenceMessage::update(self.origin_id, stamped.clone()))
                    .await;
                for (encoded_key, value, _) in &stamped {
                    self.fire(encoded_key, Some(value));
                }
            }
        }
    }

    /// Runs after the store accepted removals: drops local entries and
    /// announces an invalidation (removals never carry substitute values).
    pub async fn on_store_remove(&self, encoded_keys: Vec<Vec<u8>>) {
        let mut keys = Vec::with_capacity(encoded_keys.len());
        for encoded_key in &encoded_keys {
            let seq = self.next_seq();
            let fingerprint = CacheKey::of(encoded_key);
            self.cache.remove(&fingerprint);
            keys.push((fingerprint, seq));
        }
        if self.sync_strategy != SyncStrategy::None {
            self.publish(CoherenceMessage::invalidate(self.origin_id, keys))
                .await;
            for encoded_key in &encoded_keys {
                self.fire(encoded_key, None);
            }
        }
    }

    /// Runs after the store was cleared: flushes the local cache and
    /// announces a whole-map clear instead of enumerating keys.
    pub async fn on_store_clear(&self) {
        let drained = self.cache.drain();
        if self.sync_strategy != SyncStrategy::None {
            self.publish(CoherenceMessage::clear(self.origin_id)).await;
            for entry in &drained {
                self.fire(&entry.encoded_key, None);
            }
        }
    }

    /// Publishes a message, swallowing failures.
    async fn publish(&self, message: CoherenceMessage) {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "failed to encode coherence message, peers will drift");
                return;
            }
        };
        if let Err(error) = self.bus.publish(&self.channel, payload).await {
            warn!(
                channel = %self.channel,
                %error,
                "coherence publish failed, convergence deferred to reconnection"
            );
        }
    }

    // == Receive Path ==
    /// Applies one decoded message. Idempotent under duplicate delivery.
    pub fn apply(&self, message: CoherenceMessage) {
        if message.origin_id == self.origin_id {
            // Local cache was already updated synchronously on the write path
            return;
        }
        debug!(kind = ?message.kind, origin = %message.origin_id, entries = message.entries.len(),
            "applying coherence message");
        match message.kind {
            MessageKind::Clear => {
                for entry in self.cache.drain() {
                    self.fire(&entry.encoded_key, None);
                }
            }
            MessageKind::Invalidate | MessageKind::Expire => {
                for entry in &message.entries {
                    self.observe_seq(entry.seq);
                    if let Some(removed) = self.cache.invalidate(&entry.key) {
                        self.fire(&removed.encoded_key, None);
                    }
                }
            }
            MessageKind::Update => {
                for entry in &message.entries {
                    self.observe_seq(entry.seq);
                    let (encoded_key, value) = match (&entry.encoded_key, &entry.value) {
                        (Some(encoded_key), Some(value)) => (encoded_key, value),
                        _ => {
                            // Degrade an incomplete update to an invalidation
                            if let Some(removed) = self.cache.invalidate(&entry.key) {
                                self.fire(&removed.encoded_key, None);
                            }
                            continue;
                        }
                    };
                    let candidate =
                        CacheEntry::new(encoded_key.clone(), value.clone(), entry.seq);
                    match self.cache.upsert_if_newer(entry.key, candidate) {
                        UpdateOutcome::Applied(_) => {
                            self.fire(encoded_key, Some(value));
                        }
                        UpdateOutcome::Rejected => {
                            debug!(key = %entry.key, "stale peer update rejected");
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl BusSubscriber for CoherenceProtocol {
    async fn on_message(&self, payload: Vec<u8>) {
        match CoherenceMessage::decode(&payload) {
            Ok(message) => self.apply(message),
            Err(error) => {
                warn!(%error, bytes = payload.len(), "dropping malformed coherence message");
            }
        }
    }
}
