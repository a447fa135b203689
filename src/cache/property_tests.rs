//! Property-Based Tests for Cache Module
//!
//! Uses proptest to verify cache correctness under arbitrary operation
//! sequences.

use proptest::prelude::*;

use crate::cache::{CacheEntry, CacheKey, LocalCache, UpdateOutcome};
use crate::config::EvictionPolicy;

// == Strategies ==
/// Generates encoded keys from a small alphabet so sequences revisit keys.
fn encoded_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    "[a-f0-9]{1,8}".prop_map(|s| s.into_bytes())
}

fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    "[a-zA-Z0-9 ]{0,64}".prop_map(|s| s.into_bytes())
}

/// One cache operation.
#[derive(Debug, Clone)]
enum CacheOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Get { key: Vec<u8> },
    Invalidate { key: Vec<u8> },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (encoded_key_strategy(), value_strategy())
            .prop_map(|(key, value)| CacheOp::Put { key, value }),
        encoded_key_strategy().prop_map(|key| CacheOp::Get { key }),
        encoded_key_strategy().prop_map(|key| CacheOp::Invalidate { key }),
    ]
}

fn apply(cache: &LocalCache, op: &CacheOp) {
    match op {
        CacheOp::Put { key, value } => {
            let fingerprint = CacheKey::of(key);
            cache.put(fingerprint, CacheEntry::new(key.clone(), value.clone(), 0));
        }
        CacheOp::Get { key } => {
            let fingerprint = CacheKey::of(key);
            let _ = cache.get(&fingerprint, key);
        }
        CacheOp::Invalidate { key } => {
            let fingerprint = CacheKey::of(key);
            let _ = cache.invalidate(&fingerprint);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // A bounded cache never holds more entries than its capacity, no matter
    // what sequence of operations it sees.
    #[test]
    fn prop_lru_bounded_residency(
        ops in prop::collection::vec(cache_op_strategy(), 1..100),
        capacity in 1usize..10,
    ) {
        let cache = LocalCache::new(EvictionPolicy::Lru, capacity);
        for op in &ops {
            apply(&cache, op);
            prop_assert!(cache.len() <= capacity);
        }
    }

    #[test]
    fn prop_lfu_bounded_residency(
        ops in prop::collection::vec(cache_op_strategy(), 1..100),
        capacity in 1usize..10,
    ) {
        let cache = LocalCache::new(EvictionPolicy::Lfu, capacity);
        for op in &ops {
            apply(&cache, op);
            prop_assert!(cache.len() <= capacity);
        }
    }

    // The unbounded policy never evicts: every distinct key written and not
    // invalidated stays resident.
    #[test]
    fn prop_unbounded_cache_keeps_everything(
        ops in prop::collection::vec(cache_op_strategy(), 1..100),
    ) {
        let cache = LocalCache::new(EvictionPolicy::None, 0);
        let mut resident = std::collections::HashSet::new();
        for op in &ops {
            apply(&cache, op);
            match op {
                CacheOp::Put { key, .. } => { resident.insert(key.clone()); }
                CacheOp::Invalidate { key } => { resident.remove(key); }
                CacheOp::Get { .. } => {}
            }
        }
        prop_assert_eq!(cache.len(), resident.len());
        for key in &resident {
            prop_assert!(cache.get(&CacheKey::of(key), key).is_some());
        }
        prop_assert_eq!(cache.stats().evictions, 0);
    }

    // Fingerprints are a pure function of the encoded key.
    #[test]
    fn prop_fingerprint_deterministic(key in encoded_key_strategy()) {
        prop_assert_eq!(CacheKey::of(&key), CacheKey::of(&key));
    }

    // A resident entry only answers for the exact encoded key it was
    // written under.
    #[test]
    fn prop_key_verification(key in encoded_key_strategy(), value in value_strategy()) {
        let cache = LocalCache::new(EvictionPolicy::None, 0);
        let fingerprint = CacheKey::of(&key);
        cache.put(fingerprint, CacheEntry::new(key.clone(), value, 0));

        prop_assert!(cache.get(&fingerprint, &key).is_some());
        let mut other = key.clone();
        other.push(b'!');
        prop_assert!(cache.get(&fingerprint, &other).is_none());
    }

    // For any sequence of gets against a known resident set, hit and miss
    // counters add up exactly.
    #[test]
    fn prop_statistics_accuracy(
        writes in prop::collection::hash_set(encoded_key_strategy(), 0..20),
        reads in prop::collection::vec(encoded_key_strategy(), 1..50),
    ) {
        let cache = LocalCache::new(EvictionPolicy::None, 0);
        for key in &writes {
            cache.put(CacheKey::of(key), CacheEntry::new(key.clone(), b"v".to_vec(), 0));
        }

        let mut expected_hits = 0u64;
        let mut expected_misses = 0u64;
        for key in &reads {
            if cache.get(&CacheKey::of(key), key).is_some() {
                expected_hits += 1;
            } else {
                expected_misses += 1;
            }
        }

        let stats = cache.stats();
        prop_assert_eq!(stats.hits, expected_hits);
        prop_assert_eq!(stats.misses, expected_misses);
        prop_assert_eq!(stats.hits + stats.misses, reads.len() as u64);
    }

    // An update stamped older than the resident local write never lands,
    // and a rejection leaves the resident entry untouched.
    #[test]
    fn prop_stale_updates_never_land(
        key in encoded_key_strategy(),
        local_seq in 1u64..1000,
        update_seq in 0u64..1000,
    ) {
        let cache = LocalCache::new(EvictionPolicy::None, 0);
        let fingerprint = CacheKey::of(&key);
        cache.put(
            fingerprint,
            CacheEntry::new(key.clone(), b"local".to_vec(), local_seq),
        );

        let outcome = cache.upsert_if_newer(
            fingerprint,
            CacheEntry::new(key.clone(), b"remote".to_vec(), update_seq),
        );

        let resident = cache.peek(&fingerprint).unwrap();
        if update_seq < local_seq {
            prop_assert!(matches!(outcome, UpdateOutcome::Rejected));
            prop_assert_eq!(resident.value.as_deref(), Some(&b"local"[..]));
            prop_assert_eq!(resident.write_seq, local_seq);
        } else {
            prop_assert!(matches!(outcome, UpdateOutcome::Applied(_)));
            prop_assert_eq!(resident.value.as_deref(), Some(&b"remote"[..]));
        }
    }
}
