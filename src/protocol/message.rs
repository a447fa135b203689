//! Coherence Message Module
//!
//! Wire shape of the invalidation traffic. Messages carry key fingerprints
//! rather than encoded keys, keeping the channel codec-agnostic and cheap.
//! Payloads are serde_json encoded; anything that fails to decode is dropped
//! by the receiver.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::CacheKey;
use crate::error::Result;

// == Message Kind ==
/// Discriminates the coherence message variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Drop any cached copy of the listed fingerprints
    Invalidate,
    /// Replace cached copies with the carried values
    Update,
    /// Drop the entire local cache
    Clear,
    /// The store expired the listed keys; always honored
    Expire,
}

// == Message Entry ==
/// One affected key within a coherence message.
///
/// `seq` is the producer's logical write stamp, used by receivers to keep a
/// delayed update from clobbering a fresher local write. Invalidations carry
/// only the fingerprint; updates additionally carry the encoded key and the
/// new value, since the receiver must be able to verify and fill its slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub key: CacheKey,
    pub encoded_key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub seq: u64,
}

// == Coherence Message ==
/// A single message on a map's invalidation channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoherenceMessage {
    pub kind: MessageKind,
    /// Instance that produced the message; receivers drop their own
    pub origin_id: Uuid,
    pub entries: Vec<MessageEntry>,
}

impl CoherenceMessage {
    // == Constructors ==
    /// Builds an invalidation for a set of written keys.
    pub fn invalidate(origin_id: Uuid, keys: impl IntoIterator<Item = (CacheKey, u64)>) -> Self {
        Self {
            kind: MessageKind::Invalidate,
            origin_id,
            entries: keys
                .into_iter()
                .map(|(key, seq)| MessageEntry {
                    key,
                    encoded_key: None,
                    value: None,
                    seq,
                })
                .collect(),
        }
    }

    /// Builds an update carrying the written keys and their new values.
    pub fn update(
        origin_id: Uuid,
        entries: impl IntoIterator<Item = (Vec<u8>, Vec<u8>, u64)>,
    ) -> Self {
        Self {
            kind: MessageKind::Update,
            origin_id,
            entries: entries
                .into_iter()
                .map(|(encoded_key, value, seq)| MessageEntry {
                    key: CacheKey::of(&encoded_key),
                    encoded_key: Some(encoded_key),
                    value: Some(value),
                    seq,
                })
                .collect(),
        }
    }

    /// Builds a whole-map clear.
    pub fn clear(origin_id: Uuid) -> Self {
        Self {
            kind: MessageKind::Clear,
            origin_id,
            entries: Vec::new(),
        }
    }

    /// Builds a store-expiry notification.
    ///
    /// Expiry originates from the store rather than a peer instance, so the
    /// origin is the nil id and never matches a receiver's own.
    pub fn expire(keys: impl IntoIterator<Item = CacheKey>) -> Self {
        Self {
            kind: MessageKind::Expire,
            origin_id: Uuid::nil(),
            entries: keys
                .into_iter()
                .map(|key| MessageEntry {
                    key,
                    encoded_key: None,
                    value: None,
                    seq: 0,
                })
                .collect(),
        }
    }

    // == Wire Codec ==
    /// Encodes the message for publishing.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a received payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_roundtrip() {
        let origin = Uuid::new_v4();
        let key = CacheKey::of(b"k1");
        let message = CoherenceMessage::invalidate(origin, [(key, 4)]);

        let decoded = CoherenceMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.kind, MessageKind::Invalidate);
        assert_eq!(decoded.entries[0].key, key);
        assert_eq!(decoded.entries[0].value, None);
    }

    #[test]
    fn test_update_carries_key_and_value() {
        let origin = Uuid::new_v4();
        let message = CoherenceMessage::update(origin, [(b"k1".to_vec(), b"v".to_vec(), 9)]);

        assert_eq!(message.kind, MessageKind::Update);
        assert_eq!(message.entries[0].key, CacheKey::of(b"k1"));
        assert_eq!(message.entries[0].encoded_key.as_deref(), Some(&b"k1"[..]));
        assert_eq!(message.entries[0].value.as_deref(), Some(&b"v"[..]));
        assert_eq!(message.entries[0].seq, 9);
    }

    #[test]
    fn test_clear_has_no_entries() {
        let message = CoherenceMessage::clear(Uuid::new_v4());
        assert_eq!(message.kind, MessageKind::Clear);
        assert!(message.entries.is_empty());
    }

    #[test]
    fn test_expire_uses_nil_origin() {
        let message = CoherenceMessage::expire([CacheKey::of(b"k")]);
        assert_eq!(message.origin_id, Uuid::nil());
        assert_eq!(message.kind, MessageKind::Expire);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(CoherenceMessage::decode(b"not json").is_err());
        assert!(CoherenceMessage::decode(b"{\"kind\":\"Nope\"}").is_err());
    }
}
