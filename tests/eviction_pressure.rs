//! Eviction and expiration tests under memory pressure.
//!
//! These exercise the arena directly through the engine: LRU victim
//! selection, budget enforcement, page reclamation across size classes,
//! disabled-eviction failure, and lazy TTL reclaim.

use std::time::Duration;

use cachet::{CacheEngine, CacheError, EngineConfig, Payload, Ttl, hash_key};

/// Generate a verifiable value with a position-dependent pattern.
fn generate_value(size: usize, seed: u8) -> Vec<u8> {
    (0..size).map(|i| (i as u8).wrapping_add(seed)).collect()
}

/// Verify a value matches the expected pattern.
fn verify_value(data: &[u8], expected_size: usize, seed: u8) -> bool {
    data.len() == expected_size
        && data
            .iter()
            .enumerate()
            .all(|(i, &b)| b == (i as u8).wrapping_add(seed))
}

fn pressure_engine(pages: usize) -> CacheEngine {
    CacheEngine::new(
        EngineConfig::new()
            .with_memory_limit(pages * 4096)
            .with_page_size(4096)
            .with_initial_hash_capacity(64),
    )
    .expect("engine construction failed")
}

#[test]
fn test_budget_is_never_exceeded() {
    let mut cache = pressure_engine(8);

    for i in 0..500 {
        let key = format!("key{i:04}");
        let value = generate_value(512 + (i % 1024), (i % 251) as u8);
        cache
            .set(key.as_bytes(), hash_key(key.as_bytes()), Payload::new(&value))
            .expect("set failed under pressure");

        let snap = cache.publish_stats();
        assert!(
            snap.bytes_used <= 8 * 4096,
            "budget exceeded: {} bytes",
            snap.bytes_used
        );
    }

    let snap = cache.publish_stats();
    assert!(snap.evictions > 0, "no evictions under pressure");
    assert!(snap.curr_items > 0);
}

#[test]
fn test_lru_items_evicted_first() {
    let mut cache = pressure_engine(4);

    // Same-sized values keep everything in one class.
    let value = generate_value(900, 1);
    for i in 0..8 {
        let key = format!("key{i}");
        cache
            .set(key.as_bytes(), hash_key(key.as_bytes()), Payload::new(&value))
            .unwrap();
    }

    // Keep key0 hot while new stores force evictions.
    assert!(cache.get(b"key0", hash_key(b"key0")).is_some());
    for i in 8..14 {
        let key = format!("key{i}");
        cache
            .set(key.as_bytes(), hash_key(key.as_bytes()), Payload::new(&value))
            .unwrap();
    }

    // The refreshed key survived; the cold ones around it did not.
    let view = cache.get(b"key0", hash_key(b"key0")).expect("hot key evicted");
    assert!(verify_value(view.value(), 900, 1));
    assert!(cache.get(b"key1", hash_key(b"key1")).is_none());
    assert!(cache.get(b"key2", hash_key(b"key2")).is_none());
}

#[test]
fn test_disabled_evictions_fail_with_out_of_memory() {
    let mut cache = CacheEngine::new(
        EngineConfig::new()
            .with_memory_limit(2 * 4096)
            .with_page_size(4096)
            .with_initial_hash_capacity(16)
            .with_evictions(false),
    )
    .unwrap();

    let value = generate_value(900, 0);
    let mut stored = 0;
    let error = loop {
        let key = format!("key{stored:03}");
        match cache.set(key.as_bytes(), hash_key(key.as_bytes()), Payload::new(&value)) {
            Ok(()) => stored += 1,
            Err(e) => break e,
        }
        assert!(stored < 100, "allocation never failed");
    };

    assert_eq!(error, CacheError::OutOfMemory);
    assert!(stored > 0);
    assert_eq!(cache.publish_stats().evictions, 0);

    // Deleting makes room again.
    assert!(cache.delete(b"key000", hash_key(b"key000")));
    cache
        .set(b"fresh", hash_key(b"fresh"), Payload::new(&value))
        .expect("set after delete failed");
}

#[test]
fn test_item_larger_than_page_is_rejected() {
    let mut cache = pressure_engine(8);
    let oversized = generate_value(4096, 0); // + header + key > one page
    assert_eq!(
        cache.set(b"big", hash_key(b"big"), Payload::new(&oversized)),
        Err(CacheError::ItemTooLarge)
    );

    // A value that fits within a page (minus header and key) is stored.
    let fitting = generate_value(4000, 3);
    cache
        .set(b"big", hash_key(b"big"), Payload::new(&fitting))
        .expect("page-sized item rejected");
    let view = cache.get(b"big", hash_key(b"big")).unwrap();
    assert!(verify_value(view.value(), 4000, 3));
}

#[test]
fn test_memory_flows_between_classes() {
    let mut cache = pressure_engine(4);

    // Fill the whole arena with small items...
    for i in 0..200 {
        let key = format!("small{i:03}");
        cache
            .set(key.as_bytes(), hash_key(key.as_bytes()), Payload::new(b"tiny"))
            .unwrap();
    }

    // ...then demand it all back for large ones.
    let large = generate_value(3000, 9);
    for i in 0..4 {
        let key = format!("large{i}");
        cache
            .set(key.as_bytes(), hash_key(key.as_bytes()), Payload::new(&large))
            .expect("large store failed after small fill");
    }

    for i in 0..4 {
        let key = format!("large{i}");
        let view = cache
            .get(key.as_bytes(), hash_key(key.as_bytes()))
            .expect("large item missing");
        assert!(verify_value(view.value(), 3000, 9));
    }
}

#[test]
fn test_expired_items_are_reclaimed_lazily() {
    let mut cache = pressure_engine(8);

    cache
        .set(
            b"ephemeral",
            hash_key(b"ephemeral"),
            Payload::new(b"value").with_ttl(Ttl::After(Duration::ZERO)),
        )
        .unwrap();

    // Still physically present until observed.
    assert_eq!(cache.publish_stats().curr_items, 1);

    assert!(cache.get(b"ephemeral", hash_key(b"ephemeral")).is_none());

    let snap = cache.publish_stats();
    assert_eq!(snap.curr_items, 0);
    assert_eq!(snap.expirations, 1);
    assert_eq!(snap.get_misses, 1);
    assert_eq!(snap.bytes_used, 0);
}

#[test]
fn test_expired_item_reclaimed_by_any_command() {
    let mut cache = pressure_engine(8);

    let expired = Payload::new(b"old").with_ttl(Ttl::After(Duration::ZERO));
    let keys: [&[u8]; 4] = [b"d", b"t", b"i", b"a"];
    for key in keys {
        cache.set(key, hash_key(key), expired).unwrap();
    }

    // Each command treats the expired entry as absent.
    assert!(!cache.delete(b"d", hash_key(b"d")));
    assert!(!cache.touch(b"t", hash_key(b"t"), Ttl::Never));
    assert_eq!(cache.incr(b"i", hash_key(b"i"), 1).unwrap(), None);
    assert!(!cache.append(b"a", hash_key(b"a"), Payload::new(b"x")).unwrap());

    let snap = cache.publish_stats();
    assert_eq!(snap.curr_items, 0);
    assert_eq!(snap.expirations, 4);
}

#[test]
fn test_long_ttl_items_survive() {
    let mut cache = pressure_engine(8);
    cache
        .set(
            b"durable",
            hash_key(b"durable"),
            Payload::new(b"value").with_ttl(Ttl::After(Duration::from_secs(3600))),
        )
        .unwrap();

    let view = cache.get(b"durable", hash_key(b"durable")).unwrap();
    assert_eq!(view.value(), b"value");
    assert_eq!(cache.publish_stats().expirations, 0);
}
