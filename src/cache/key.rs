//! Cache Key Module
//!
//! Fixed-size fingerprints of codec-encoded keys. The fingerprint is the
//! local cache index and the identifier carried on the wire in invalidation
//! messages, keeping the protocol codec-agnostic and bandwidth-efficient.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of bytes kept from the key digest.
pub const FINGERPRINT_LEN: usize = 16;

// == Cache Key ==
/// Fingerprint of an encoded key: the first 16 bytes of its SHA-256 digest.
///
/// Fingerprints may collide, so entries retain the original encoded key and
/// every fingerprint hit is verified against it before data is returned.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey([u8; FINGERPRINT_LEN]);

impl CacheKey {
    // == Constructor ==
    /// Computes the fingerprint of an encoded key.
    pub fn of(encoded_key: &[u8]) -> Self {
        let digest = Sha256::digest(encoded_key);
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&digest[..FINGERPRINT_LEN]);
        Self(bytes)
    }

    /// Returns the raw fingerprint bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let a = CacheKey::of(b"key1");
        let b = CacheKey::of(b"key1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinct_keys() {
        let a = CacheKey::of(b"key1");
        let b = CacheKey::of(b"key2");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_empty_key() {
        // Empty input still produces a full-length fingerprint
        let key = CacheKey::of(b"");
        assert_eq!(key.as_bytes().len(), FINGERPRINT_LEN);
    }

    #[test]
    fn test_display_is_hex() {
        let key = CacheKey::of(b"abc");
        let text = key.to_string();
        assert_eq!(text.len(), FINGERPRINT_LEN * 2);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_serde_roundtrip() {
        let key = CacheKey::of(b"wire-key");
        let json = serde_json::to_string(&key).unwrap();
        let back: CacheKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }
}
