//! Store Module
//!
//! The remote store collaborator seen by the near-cache core, plus the
//! optional external loader/writer seams. Keys and values are codec-encoded
//! byte sequences; the core never inspects them.
//!
//! [`MemoryStore`] is a process-local reference implementation with TTL
//! support, used by the integration tests and usable as an embedded backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{NearMapError, Result};

// == Store Trait ==
/// Remote key-value store collaborator.
///
/// The store is the source of truth: facade writes always reach it before
/// any local cache mutation or invalidation publish.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads a value.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Reads several values in one round trip, in key order.
    async fn get_all(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Writes a value, returning the previous one.
    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<Option<Vec<u8>>>;

    /// Writes several values in one round trip.
    async fn put_all(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()>;

    /// Removes a key, returning the previous value.
    async fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Removes several keys, returning how many existed.
    async fn remove_many(&self, keys: &[Vec<u8>]) -> Result<u64>;

    /// Removes every key.
    async fn clear(&self) -> Result<()>;

    /// Returns the number of stored keys.
    async fn len(&self) -> Result<usize>;

    /// Sets a time-to-live on a key. Returns false if the key is absent.
    async fn expire(&self, key: &[u8], ttl: Duration) -> Result<bool>;
}

// == Map Loader ==
/// External loader consulted when both the local cache and the store miss.
#[async_trait]
pub trait MapLoader: Send + Sync {
    /// Loads the value for a key, or `None` if the source has no entry.
    async fn load(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

// == Map Writer ==
/// External writer mirroring store mutations (write-through or write-behind).
///
/// Writer calls are side effects: failures are logged by the caller and
/// never fail the originating map operation.
#[async_trait]
pub trait MapWriter: Send + Sync {
    /// Mirrors a batch of writes.
    async fn write_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()>;

    /// Mirrors a batch of deletions.
    async fn delete_batch(&self, keys: Vec<Vec<u8>>) -> Result<()>;
}

// == Stored Value ==
#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

// == Memory Store ==
/// In-process [`Store`] implementation.
///
/// Entries expire lazily on access and no expiry notification is ever
/// published; `Expire` coherence messages come from store backends that
/// push expiry events. The store counts read round trips and can be
/// switched offline, which makes every operation fail; both hooks exist
/// for the integration tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<Vec<u8>, StoredValue>>,
    read_ops: AtomicU64,
    offline: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read round trips (`get` + `get_all` calls) served so far.
    pub fn read_ops(&self) -> u64 {
        self.read_ops.load(Ordering::Relaxed)
    }

    /// Switches the store offline or back online.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::Relaxed) {
            Err(NearMapError::Store("store unreachable".into()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Vec<u8>, StoredValue>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reads one key under the lock, dropping it if expired.
    fn read_one(entries: &mut HashMap<Vec<u8>, StoredValue>, key: &[u8]) -> Option<Vec<u8>> {
        match entries.get(key) {
            Some(stored) if stored.is_expired() => {
                entries.remove(key);
                None
            }
            Some(stored) => Some(stored.value.clone()),
            None => None,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_online()?;
        self.read_ops.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.lock();
        Ok(Self::read_one(&mut entries, key))
    }

    async fn get_all(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        self.check_online()?;
        self.read_ops.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.lock();
        Ok(keys
            .iter()
            .map(|key| Self::read_one(&mut entries, key))
            .collect())
    }

    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<Option<Vec<u8>>> {
        self.check_online()?;
        let mut entries = self.lock();
        let previous = Self::read_one(&mut entries, &key);
        entries.insert(
            key,
            StoredValue {
                value,
                expires_at: None,
            },
        );
        Ok(previous)
    }

    async fn put_all(&self, batch: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        self.check_online()?;
        let mut entries = self.lock();
        for (key, value) in batch {
            entries.insert(
                key,
                StoredValue {
                    value,
                    expires_at: None,
                },
            );
        }
        Ok(())
    }

    async fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_online()?;
        let mut entries = self.lock();
        let previous = Self::read_one(&mut entries, key);
        entries.remove(key);
        Ok(previous)
    }

    async fn remove_many(&self, keys: &[Vec<u8>]) -> Result<u64> {
        self.check_online()?;
        let mut entries = self.lock();
        let mut removed = 0;
        for key in keys {
            if Self::read_one(&mut entries, key).is_some() {
                entries.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.check_online()?;
        self.lock().clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        self.check_online()?;
        let mut entries = self.lock();
        entries.retain(|_, stored| !stored.is_expired());
        Ok(entries.len())
    }

    async fn expire(&self, key: &[u8], ttl: Duration) -> Result<bool> {
        self.check_online()?;
        let mut entries = self.lock();
        if Self::read_one(&mut entries, key).is_none() {
            return Ok(false);
        }
        if let Some(stored) = entries.get_mut(key) {
            stored.expires_at = Some(Instant::now() + ttl);
        }
        Ok(true)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = MemoryStore::new();

        assert!(store.put(b"k".to_vec(), b"v1".to_vec()).await.unwrap().is_none());
        assert_eq!(
            store.put(b"k".to_vec(), b"v2".to_vec()).await.unwrap(),
            Some(b"v1".to_vec())
        );
        assert_eq!(store.get(b"k").await.unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.remove(b"k").await.unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_all_preserves_order() {
        let store = MemoryStore::new();
        store.put(b"a".to_vec(), b"1".to_vec()).await.unwrap();
        store.put(b"c".to_vec(), b"3".to_vec()).await.unwrap();

        let values = store
            .get_all(&[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![Some(b"1".to_vec()), None, Some(b"3".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_expire() {
        let store = MemoryStore::new();
        store.put(b"k".to_vec(), b"v".to_vec()).await.unwrap();

        assert!(store.expire(b"k", Duration::from_millis(20)).await.unwrap());
        assert!(!store.expire(b"missing", Duration::from_secs(1)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get(b"k").await.unwrap(), None);
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_fails_everything() {
        let store = MemoryStore::new();
        store.put(b"k".to_vec(), b"v".to_vec()).await.unwrap();
        store.set_offline(true);

        assert!(store.get(b"k").await.is_err());
        assert!(store.put(b"k".to_vec(), b"v".to_vec()).await.is_err());
        assert!(store.clear().await.is_err());

        store.set_offline(false);
        assert_eq!(store.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_read_ops_counter() {
        let store = MemoryStore::new();
        store.put(b"k".to_vec(), b"v".to_vec()).await.unwrap();

        store.get(b"k").await.unwrap();
        store.get_all(&[b"k".to_vec()]).await.unwrap();

        assert_eq!(store.read_ops(), 2);
    }

    #[tokio::test]
    async fn test_remove_many() {
        let store = MemoryStore::new();
        store.put(b"a".to_vec(), b"1".to_vec()).await.unwrap();
        store.put(b"b".to_vec(), b"2".to_vec()).await.unwrap();

        let removed = store
            .remove_many(&[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len().await.unwrap(), 0);
    }
}
