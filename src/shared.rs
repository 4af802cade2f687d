//! Coarse-locked wrapper for sharing one engine across threads.
//!
//! The engine itself runs commands on `&mut self`. When several worker
//! threads must share a single instance, the whole of each command -
//! lookup, eviction, mutation, statistics - has to be atomic with respect
//! to other observers, so this wrapper takes one mutex acquisition per
//! command and nothing finer.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Ttl;
use crate::engine::{CacheEngine, CasOutcome, Payload};
use crate::error::CacheResult;
use crate::stats::StatsSnapshot;

/// An owned copy of a stored item, as returned by [`SharedEngine::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedItem {
    /// The stored value bytes.
    pub value: Vec<u8>,
    /// The caller-defined flags stored with the item.
    pub flags: u32,
    /// The item's version (CAS token).
    pub version: u64,
}

/// Thread-safe handle to a [`CacheEngine`].
///
/// Clones share the same engine. Every command serializes behind a single
/// mutex; hits copy the value out so the lock is never held by a caller.
#[derive(Debug, Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<CacheEngine>>,
}

impl SharedEngine {
    /// Create a shared engine from a configuration.
    pub fn new(config: crate::EngineConfig) -> CacheResult<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(CacheEngine::new(config)?)),
        })
    }

    /// Wrap an existing engine.
    pub fn from_engine(engine: CacheEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Look up a key, copying the value out.
    pub fn get(&self, key: &[u8], hash: u64) -> Option<OwnedItem> {
        let mut engine = self.inner.lock();
        engine.get(key, hash).map(|view| OwnedItem {
            value: view.value().to_vec(),
            flags: view.flags(),
            version: view.version(),
        })
    }

    /// Store unconditionally.
    pub fn set(&self, key: &[u8], hash: u64, payload: Payload<'_>) -> CacheResult<()> {
        self.inner.lock().set(key, hash, payload)
    }

    /// Store only if absent.
    pub fn add(&self, key: &[u8], hash: u64, payload: Payload<'_>) -> CacheResult<bool> {
        self.inner.lock().add(key, hash, payload)
    }

    /// Store only if present.
    pub fn replace(&self, key: &[u8], hash: u64, payload: Payload<'_>) -> CacheResult<bool> {
        self.inner.lock().replace(key, hash, payload)
    }

    /// Compare-and-swap at an expected version.
    pub fn cas(
        &self,
        key: &[u8],
        hash: u64,
        payload: Payload<'_>,
        expected_version: u64,
    ) -> CacheResult<CasOutcome> {
        self.inner.lock().cas(key, hash, payload, expected_version)
    }

    /// Remove a key.
    pub fn delete(&self, key: &[u8], hash: u64) -> bool {
        self.inner.lock().delete(key, hash)
    }

    /// Update a key's expiration.
    pub fn touch(&self, key: &[u8], hash: u64, ttl: Ttl) -> bool {
        self.inner.lock().touch(key, hash, ttl)
    }

    /// Increment a numeric value.
    pub fn incr(&self, key: &[u8], hash: u64, delta: u64) -> CacheResult<Option<u64>> {
        self.inner.lock().incr(key, hash, delta)
    }

    /// Decrement a numeric value, saturating at zero.
    pub fn decr(&self, key: &[u8], hash: u64, delta: u64) -> CacheResult<Option<u64>> {
        self.inner.lock().decr(key, hash, delta)
    }

    /// Concatenate after an existing value.
    pub fn append(&self, key: &[u8], hash: u64, payload: Payload<'_>) -> CacheResult<bool> {
        self.inner.lock().append(key, hash, payload)
    }

    /// Concatenate before an existing value.
    pub fn prepend(&self, key: &[u8], hash: u64, payload: Payload<'_>) -> CacheResult<bool> {
        self.inner.lock().prepend(key, hash, payload)
    }

    /// Invalidate every current entry.
    pub fn flush_all(&self) {
        self.inner.lock().flush_all()
    }

    /// Snapshot counters and gauges.
    pub fn publish_stats(&self) -> StatsSnapshot {
        self.inner.lock().publish_stats()
    }

    /// Zero all counters. Cache contents are unaffected.
    pub fn reset_stats(&self) {
        self.inner.lock().stats().reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;
    use crate::hash::hash_key;

    fn shared() -> SharedEngine {
        SharedEngine::new(
            EngineConfig::new()
                .with_memory_limit(4 * 1024 * 1024)
                .with_page_size(4096)
                .with_initial_hash_capacity(16),
        )
        .unwrap()
    }

    #[test]
    fn test_basic_roundtrip() {
        let cache = shared();
        cache.set(b"k", hash_key(b"k"), Payload::new(b"v")).unwrap();
        let item = cache.get(b"k", hash_key(b"k")).unwrap();
        assert_eq!(item.value, b"v");
        assert!(cache.delete(b"k", hash_key(b"k")));
        assert!(cache.get(b"k", hash_key(b"k")).is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let cache = shared();
        let other = cache.clone();
        cache.set(b"k", hash_key(b"k"), Payload::new(b"v")).unwrap();
        assert!(other.get(b"k", hash_key(b"k")).is_some());
    }

    #[test]
    fn test_concurrent_writers() {
        let cache = shared();
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let key = format!("t{t}-key{i}");
                        cache
                            .set(key.as_bytes(), hash_key(key.as_bytes()), Payload::new(b"value"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let snap = cache.publish_stats();
        assert_eq!(snap.cmd_set, 1000);
        assert_eq!(snap.curr_items, 1000);
    }

    #[test]
    fn test_concurrent_counter_increments() {
        let cache = shared();
        cache.set(b"n", hash_key(b"n"), Payload::new(b"0")).unwrap();

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        cache.incr(b"n", hash_key(b"n"), 1).unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let item = cache.get(b"n", hash_key(b"n")).unwrap();
        assert_eq!(item.value, b"400");
    }
}
