//! Local Cached Map Module
//!
//! The map-like facade composing the local cache, the coherence protocol,
//! the reconnection handler and the remote store. Reads are served from the
//! local cache when possible; writes always reach the store first and are
//! then applied locally and announced to peers.
//!
//! Keys and values are encoded with serde_json before they reach the store
//! or the wire; the core below this facade only ever sees bytes.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::{Bus, SubscriptionId};
use crate::cache::{CacheEntry, CacheKey, CacheStats, LocalCache};
use crate::config::{CacheOptions, WriteMode};
use crate::error::{NearMapError, Result};
use crate::protocol::{CoherenceProtocol, InvalidateListener, ListenerId, ReconnectionHandler};
use crate::store::Store;
use crate::tasks::{spawn_write_behind_task, WriteBehindOp, WriteBehindQueue};

// == Channel Naming ==
/// Invalidation channel for a map name.
///
/// The braces make the channel hash-tag match the map's keys, so both stay
/// co-routable under key-based sharding.
pub fn topic_name(map_name: &str) -> String {
    format!("{{{}}}:topic", map_name)
}

// == Local Cached Map ==
/// Map facade over a shared store with a coherent local near cache.
///
/// Instances of the same logical map (same `name`, same store and bus) keep
/// their local caches consistent through the coherence protocol; see
/// [`CacheOptions`] for the consistency/performance knobs.
pub struct LocalCachedMap<K, V> {
    name: String,
    options: CacheOptions,
    store: Arc<dyn Store>,
    bus: Arc<dyn Bus>,
    cache: Arc<LocalCache>,
    protocol: Arc<CoherenceProtocol>,
    reconnection: Arc<ReconnectionHandler>,
    subscription: SubscriptionId,
    write_behind: Mutex<Option<WriteBehindQueue>>,
    closed: AtomicBool,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> LocalCachedMap<K, V>
where
    K: Serialize + Send + Sync,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    // == Constructor ==
    /// Creates a map instance and subscribes it to the invalidation channel.
    pub async fn new(
        name: impl Into<String>,
        store: Arc<dyn Store>,
        bus: Arc<dyn Bus>,
        options: CacheOptions,
    ) -> Result<Self> {
        let name = name.into();
        let channel = topic_name(&name);
        let cache = Arc::new(LocalCache::new(options.eviction_policy, options.cache_size));
        let protocol = Arc::new(CoherenceProtocol::new(
            channel.clone(),
            options.sync_strategy,
            Arc::clone(&cache),
            Arc::clone(&bus),
        ));
        let subscription = bus.subscribe(&channel, protocol.clone()).await?;
        let reconnection = Arc::new(ReconnectionHandler::new(
            options.reconnection_strategy,
            Arc::clone(&cache),
            Arc::clone(&store),
        ));
        bus.add_state_listener(reconnection.clone()).await;

        let write_behind = match (&options.writer, options.write_mode) {
            (Some(writer), WriteMode::WriteBehind) => Some(spawn_write_behind_task(
                Arc::clone(writer),
                options.write_behind_batch_size,
                options.write_behind_delay,
            )),
            _ => None,
        };

        info!(map = %name, origin = %protocol.origin_id(), "local cached map created");
        Ok(Self {
            name,
            options,
            store,
            bus,
            cache,
            protocol,
            reconnection,
            subscription,
            write_behind: Mutex::new(write_behind),
            closed: AtomicBool::new(false),
            _marker: PhantomData,
        })
    }

    // == Accessors ==
    /// Logical map name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invalidation channel this instance is subscribed to.
    pub fn channel_name(&self) -> String {
        topic_name(&self.name)
    }

    /// Unique id of this instance on the wire.
    pub fn origin_id(&self) -> Uuid {
        self.protocol.origin_id()
    }

    /// Options this instance was created with.
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Number of locally cached entries (sentinels included).
    pub fn cached_size(&self) -> usize {
        self.cache.len()
    }

    /// Local cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// False between a channel outage and the completed reconciliation.
    pub fn is_synced(&self) -> bool {
        self.reconnection.is_synced()
    }

    // == Codec ==
    fn encode_key(&self, key: &K) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(key)?)
    }

    fn encode_value(value: &V) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode_value(bytes: &[u8]) -> Result<V> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            Err(NearMapError::Shutdown)
        } else {
            Ok(())
        }
    }

    // == Read Path ==
    /// Reads a value, serving from the local cache when possible.
    ///
    /// A cached miss sentinel answers `None` without a store round trip.
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        self.ensure_open()?;
        let encoded_key = self.encode_key(key)?;
        let fingerprint = CacheKey::of(&encoded_key);
        if let Some(entry) = self.cache.get(&fingerprint, &encoded_key) {
            return match entry.value {
                Some(bytes) => Ok(Some(Self::decode_value(&bytes)?)),
                None => Ok(None),
            };
        }
        match self.fetch_and_fill(encoded_key, fingerprint).await? {
            Some(bytes) => Ok(Some(Self::decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Reads several keys, batching the store fetch for the uncached subset.
    pub async fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>>
    where
        K: Clone + Eq + std::hash::Hash,
    {
        self.ensure_open()?;
        let mut found = HashMap::new();
        let mut missing: Vec<(K, Vec<u8>, CacheKey)> = Vec::new();

        for key in keys {
            let encoded_key = self.encode_key(key)?;
            let fingerprint = CacheKey::of(&encoded_key);
            match self.cache.get(&fingerprint, &encoded_key) {
                Some(entry) => {
                    if let Some(bytes) = entry.value {
                        found.insert(key.clone(), Self::decode_value(&bytes)?);
                    }
                    // Sentinel hit: the key is known absent, skip it
                }
                None => missing.push((key.clone(), encoded_key, fingerprint)),
            }
        }

        if !missing.is_empty() {
            let encoded_keys: Vec<Vec<u8>> =
                missing.iter().map(|(_, encoded, _)| encoded.clone()).collect();
            let values = self.store.get_all(&encoded_keys).await?;
            for ((key, encoded_key, fingerprint), value) in missing.into_iter().zip(values) {
                match value {
                    Some(bytes) => {
                        self.cache.put(
                            fingerprint,
                            CacheEntry::new(encoded_key, bytes.clone(), 0),
                        );
                        found.insert(key, Self::decode_value(&bytes)?);
                    }
                    None => {
                        if let Some(bytes) =
                            self.consult_loader(&encoded_key).await?
                        {
                            found.insert(key, Self::decode_value(&bytes)?);
                        } else if self.options.store_cache_miss {
                            self.cache.put(fingerprint, CacheEntry::miss(encoded_key, 0));
                        }
                    }
                }
            }
        }
        Ok(found)
    }

    /// Checks for a key without decoding more than necessary.
    pub async fn contains_key(&self, key: &K) -> Result<bool> {
        self.ensure_open()?;
        let encoded_key = self.encode_key(key)?;
        let fingerprint = CacheKey::of(&encoded_key);
        if let Some(entry) = self.cache.get(&fingerprint, &encoded_key) {
            return Ok(!entry.is_miss());
        }
        Ok(self.fetch_and_fill(encoded_key, fingerprint).await?.is_some())
    }

    /// Store fetch on a local miss: fills the cache, consults the loader and
    /// stores a miss sentinel when configured.
    ///
    /// Read fills are stamped 0 so that any peer update may replace them; a
    /// stamp is reserved for genuine local writes.
    async fn fetch_and_fill(
        &self,
        encoded_key: Vec<u8>,
        fingerprint: CacheKey,
    ) -> Result<Option<Vec<u8>>> {
        match self.store.get(&encoded_key).await? {
            Some(bytes) => {
                self.cache
                    .put(fingerprint, CacheEntry::new(encoded_key, bytes.clone(), 0));
                Ok(Some(bytes))
            }
            None => {
                if let Some(bytes) = self.consult_loader(&encoded_key).await? {
                    return Ok(Some(bytes));
                }
                if self.options.store_cache_miss {
                    self.cache
                        .put(fingerprint, CacheEntry::miss(encoded_key, 0));
                }
                Ok(None)
            }
        }
    }

    /// Asks the external loader for an absent key; a loaded value is written
    /// through to the store and announced like a local write.
    async fn consult_loader(&self, encoded_key: &[u8]) -> Result<Option<Vec<u8>>> {
        let loader = match &self.options.loader {
            Some(loader) => loader,
            None => return Ok(None),
        };
        match loader.load(encoded_key).await? {
            Some(bytes) => {
                self.store
                    .put(encoded_key.to_vec(), bytes.clone())
                    .await?;
                self.protocol
                    .on_store_put(vec![(encoded_key.to_vec(), bytes.clone())])
                    .await;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    // == Write Path ==
    /// Writes a value, returning the previous one.
    ///
    /// The store is mutated first; only on success is the write applied to
    /// the local cache and announced to peers, so a failed store write
    /// leaves no trace anywhere.
    pub async fn put(&self, key: &K, value: &V) -> Result<Option<V>> {
        self.ensure_open()?;
        let encoded_key = self.encode_key(key)?;
        let encoded_value = Self::encode_value(value)?;
        let previous = self
            .store
            .put(encoded_key.clone(), encoded_value.clone())
            .await?;
        self.protocol
            .on_store_put(vec![(encoded_key.clone(), encoded_value.clone())])
            .await;
        self.mirror_write(encoded_key, encoded_value).await;
        previous.map(|bytes| Self::decode_value(&bytes)).transpose()
    }

    /// Writes a value without fetching the previous one back.
    ///
    /// Returns true if the key was new.
    pub async fn fast_put(&self, key: &K, value: &V) -> Result<bool> {
        self.ensure_open()?;
        let encoded_key = self.encode_key(key)?;
        let encoded_value = Self::encode_value(value)?;
        let previous = self
            .store
            .put(encoded_key.clone(), encoded_value.clone())
            .await?;
        self.protocol
            .on_store_put(vec![(encoded_key.clone(), encoded_value.clone())])
            .await;
        self.mirror_write(encoded_key, encoded_value).await;
        Ok(previous.is_none())
    }

    /// Writes a batch of entries in one store round trip and announces them
    /// in a single coherence message.
    pub async fn put_all(&self, entries: &[(K, V)]) -> Result<()> {
        self.ensure_open()?;
        if entries.is_empty() {
            return Ok(());
        }
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            encoded.push((self.encode_key(key)?, Self::encode_value(value)?));
        }
        self.store.put_all(encoded.clone()).await?;
        self.protocol.on_store_put(encoded.clone()).await;
        for (encoded_key, encoded_value) in encoded {
            self.mirror_write(encoded_key, encoded_value).await;
        }
        Ok(())
    }

    /// Removes a key, returning the previous value.
    pub async fn remove(&self, key: &K) -> Result<Option<V>> {
        self.ensure_open()?;
        let encoded_key = self.encode_key(key)?;
        let previous = self.store.remove(&encoded_key).await?;
        self.protocol
            .on_store_remove(vec![encoded_key.clone()])
            .await;
        self.mirror_delete(encoded_key).await;
        previous.map(|bytes| Self::decode_value(&bytes)).transpose()
    }

    /// Removes several keys in one store round trip, without fetching the
    /// previous values. Returns how many existed.
    pub async fn fast_remove(&self, keys: &[K]) -> Result<u64> {
        self.ensure_open()?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut encoded_keys = Vec::with_capacity(keys.len());
        for key in keys {
            encoded_keys.push(self.encode_key(key)?);
        }
        let removed = self.store.remove_many(&encoded_keys).await?;
        self.protocol.on_store_remove(encoded_keys.clone()).await;
        for encoded_key in encoded_keys {
            self.mirror_delete(encoded_key).await;
        }
        Ok(removed)
    }

    /// Writes a value only if the key is currently absent.
    ///
    /// Returns the existing value otherwise. The check and the write are two
    /// store round trips; last-writer-wins races between instances resolve
    /// through the store like any concurrent put.
    pub async fn put_if_absent(&self, key: &K, value: &V) -> Result<Option<V>> {
        self.ensure_open()?;
        if let Some(existing) = self.get(key).await? {
            return Ok(Some(existing));
        }
        self.put(key, value).await?;
        Ok(None)
    }

    /// Replaces the value of an existing key, returning the previous value,
    /// or does nothing if the key is absent.
    pub async fn replace(&self, key: &K, value: &V) -> Result<Option<V>> {
        self.ensure_open()?;
        let encoded_key = self.encode_key(key)?;
        // The store is the source of truth for existence, not the cache
        let current = match self.store.get(&encoded_key).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let encoded_value = Self::encode_value(value)?;
        self.store
            .put(encoded_key.clone(), encoded_value.clone())
            .await?;
        self.protocol
            .on_store_put(vec![(encoded_key.clone(), encoded_value.clone())])
            .await;
        self.mirror_write(encoded_key, encoded_value).await;
        Ok(Some(Self::decode_value(&current)?))
    }

    /// Replaces the value only if it currently equals `expected`
    /// (compared in encoded form). Returns whether the swap happened.
    pub async fn compare_and_replace(&self, key: &K, expected: &V, value: &V) -> Result<bool> {
        self.ensure_open()?;
        let encoded_key = self.encode_key(key)?;
        let expected_bytes = Self::encode_value(expected)?;
        match self.store.get(&encoded_key).await? {
            Some(current) if current == expected_bytes => {
                let encoded_value = Self::encode_value(value)?;
                self.store
                    .put(encoded_key.clone(), encoded_value.clone())
                    .await?;
                self.protocol
                    .on_store_put(vec![(encoded_key.clone(), encoded_value.clone())])
                    .await;
                self.mirror_write(encoded_key, encoded_value).await;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Combines the current value with `value` through `remap`, following
    /// `Map::merge` semantics: absent keys take `value` directly, a `None`
    /// from `remap` removes the key.
    pub async fn merge<F>(&self, key: &K, value: V, remap: F) -> Result<Option<V>>
    where
        F: FnOnce(V, V) -> Option<V> + Send,
    {
        self.ensure_open()?;
        let encoded_key = self.encode_key(key)?;
        match self.store.get(&encoded_key).await? {
            None => {
                let encoded_value = Self::encode_value(&value)?;
                self.store
                    .put(encoded_key.clone(), encoded_value.clone())
                    .await?;
                self.protocol
                    .on_store_put(vec![(encoded_key.clone(), encoded_value.clone())])
                    .await;
                self.mirror_write(encoded_key, encoded_value).await;
                Ok(Some(value))
            }
            Some(current) => {
                let current = Self::decode_value(&current)?;
                match remap(current, value) {
                    Some(merged) => {
                        let encoded_value = Self::encode_value(&merged)?;
                        self.store
                            .put(encoded_key.clone(), encoded_value.clone())
                            .await?;
                        self.protocol
                            .on_store_put(vec![(encoded_key.clone(), encoded_value.clone())])
                            .await;
                        self.mirror_write(encoded_key, encoded_value).await;
                        Ok(Some(merged))
                    }
                    None => {
                        self.store.remove(&encoded_key).await?;
                        self.protocol
                            .on_store_remove(vec![encoded_key.clone()])
                            .await;
                        self.mirror_delete(encoded_key).await;
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Removes every entry of the logical map, locally and remotely.
    pub async fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        self.store.clear().await?;
        self.protocol.on_store_clear().await;
        Ok(())
    }

    /// Deletes the logical map, returning whether it held any entries.
    pub async fn delete(&self) -> Result<bool> {
        self.ensure_open()?;
        let existed = self.store.len().await? > 0;
        self.store.clear().await?;
        self.protocol.on_store_clear().await;
        Ok(existed)
    }

    /// Sets a time-to-live on a stored key.
    pub async fn expire(&self, key: &K, ttl: Duration) -> Result<bool> {
        self.ensure_open()?;
        let encoded_key = self.encode_key(key)?;
        self.store.expire(&encoded_key, ttl).await
    }

    // == Local-Only Operations ==
    /// Empties the local cache without touching the store or the channel.
    pub fn clear_local_cache(&self) -> usize {
        self.cache.clear()
    }

    /// Checks whether a key is resident in the local cache, without
    /// refreshing its recency.
    pub fn is_locally_cached(&self, key: &K) -> Result<bool> {
        let encoded_key = self.encode_key(key)?;
        let fingerprint = CacheKey::of(&encoded_key);
        Ok(self
            .cache
            .peek(&fingerprint)
            .map(|entry| entry.verify_key(&encoded_key))
            .unwrap_or(false))
    }

    /// Number of entries in the remote store.
    pub async fn size(&self) -> Result<usize> {
        self.ensure_open()?;
        self.store.len().await
    }

    // == Listeners ==
    /// Registers an invalidation listener.
    pub fn add_invalidate_listener(&self, listener: Arc<dyn InvalidateListener>) -> ListenerId {
        self.protocol.add_listener(listener)
    }

    /// Removes an invalidation listener.
    pub fn remove_invalidate_listener(&self, id: ListenerId) -> bool {
        self.protocol.remove_listener(id)
    }

    // == Shutdown ==
    /// Unsubscribes from the channel and stops background tasks.
    ///
    /// In-flight publishes may be lost; the store already reflects every
    /// completed write.
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.bus.unsubscribe(self.subscription).await?;
        let queue = self
            .write_behind
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(queue) = queue {
            queue.shutdown().await;
        }
        info!(map = %self.name, "local cached map shut down");
        Ok(())
    }

    // == Writer Mirroring ==
    async fn mirror_write(&self, encoded_key: Vec<u8>, encoded_value: Vec<u8>) {
        let writer = match &self.options.writer {
            Some(writer) => writer,
            None => return,
        };
        match self.options.write_mode {
            WriteMode::WriteThrough => {
                if let Err(error) = writer.write_batch(vec![(encoded_key, encoded_value)]).await {
                    warn!(map = %self.name, %error, "write-through mirror failed");
                }
            }
            WriteMode::WriteBehind => {
                let guard = self
                    .write_behind
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(queue) = guard.as_ref() {
                    queue.enqueue(WriteBehindOp::Write {
                        key: encoded_key,
                        value: encoded_value,
                    });
                }
            }
        }
    }

    async fn mirror_delete(&self, encoded_key: Vec<u8>) {
        let writer = match &self.options.writer {
            Some(writer) => writer,
            None => return,
        };
        match self.options.write_mode {
            WriteMode::WriteThrough => {
                if let Err(error) = writer.delete_batch(vec![encoded_key]).await {
                    warn!(map = %self.name, %error, "write-through delete mirror failed");
                }
            }
            WriteMode::WriteBehind => {
                let guard = self
                    .write_behind
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(queue) = guard.as_ref() {
                    queue.enqueue(WriteBehindOp::Delete { key: encoded_key });
                }
            }
        }
    }
}

// == Counter Maps ==
impl<K> LocalCachedMap<K, i64>
where
    K: Serialize + Send + Sync,
{
    /// Atomically-in-order adds `delta` to a numeric value, treating an
    /// absent key as 0, and returns the new value.
    ///
    /// Fails with [`NearMapError::Overflow`] instead of wrapping; the
    /// stored value is left untouched.
    pub async fn add_and_get(&self, key: &K, delta: i64) -> Result<i64> {
        self.ensure_open()?;
        let encoded_key = self.encode_key(key)?;
        let current = self
            .store
            .get(&encoded_key)
            .await?
            .map(|bytes| Self::decode_value(&bytes))
            .transpose()?
            .unwrap_or(0);
        let next = current.checked_add(delta).ok_or(NearMapError::Overflow)?;
        let encoded_value = serde_json::to_vec(&next)?;
        self.store
            .put(encoded_key.clone(), encoded_value.clone())
            .await?;
        self.protocol
            .on_store_put(vec![(encoded_key.clone(), encoded_value.clone())])
            .await;
        self.mirror_write(encoded_key, encoded_value).await;
        Ok(next)
    }
}
