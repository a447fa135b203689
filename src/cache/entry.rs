//! Cache Entry Module
//!
//! Defines the structure for individual local cache entries, including the
//! stored-miss sentinel used when `store_cache_miss` is enabled.

// == Cache Entry ==
/// A single local cache entry.
///
/// The original encoded key is retained alongside the value so a fingerprint
/// hit can be verified; a verified mismatch is treated as a miss and never
/// returns another key's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Codec-encoded key bytes, used for collision verification
    pub encoded_key: Vec<u8>,
    /// Codec-encoded value bytes; `None` marks a stored miss
    pub value: Option<Vec<u8>>,
    /// Sequence stamp of the write that produced this entry
    pub write_seq: u64,
}

impl CacheEntry {
    // == Constructors ==
    /// Creates an entry holding a value.
    pub fn new(encoded_key: Vec<u8>, value: Vec<u8>, write_seq: u64) -> Self {
        Self {
            encoded_key,
            value: Some(value),
            write_seq,
        }
    }

    /// Creates a stored-miss sentinel for an absent key.
    pub fn miss(encoded_key: Vec<u8>, write_seq: u64) -> Self {
        Self {
            encoded_key,
            value: None,
            write_seq,
        }
    }

    // == Is Miss ==
    /// Returns true if this entry is a stored-miss sentinel.
    pub fn is_miss(&self) -> bool {
        self.value.is_none()
    }

    // == Verify ==
    /// Checks that this entry was produced by the given encoded key.
    ///
    /// Fingerprints are truncated hashes, so two keys can map to the same
    /// cache slot. A failed verification must be handled as a cache miss.
    pub fn verify_key(&self, encoded_key: &[u8]) -> bool {
        self.encoded_key == encoded_key
    }
}
