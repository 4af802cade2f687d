//! The cache engine: memcached-style command semantics over the arena and
//! hash index.
//!
//! Commands take the key and its caller-computed 64-bit digest, plus a
//! [`Payload`] where a value is being stored. Every command runs to
//! completion on `&mut self`; see [`SharedEngine`](crate::SharedEngine)
//! for the coarse-locked multi-threaded wrapper.
//!
//! # Liveness
//!
//! An item is *dead* once its expiration has passed or it predates the
//! last `flush_all` (tracked as a version watermark). Dead items are
//! treated as absent by every command and are physically reclaimed by the
//! first lookup that observes them (lazy expiration).
//!
//! # Mutation discipline
//!
//! Value-changing commands (set, cas, incr/decr, append/prepend) write the
//! new item into a fresh slot and swap the index entry over, releasing the
//! old slot afterwards. Only `touch` patches an item in place, and even it
//! advances the version.

use tracing::debug;

use crate::arena::Arena;
use crate::clock::{self, Ttl};
use crate::config::EngineConfig;
use crate::error::{CacheError, CacheResult};
use crate::handle::ItemHandle;
use crate::index::HashIndex;
use crate::item::{self, MAX_KEY_LEN, MAX_VALUE_LEN};
use crate::numeric;
use crate::stats::{Gauges, StatsRegistry, StatsSnapshot};

/// A value to store, with its caller-defined flags and TTL.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    value: &'a [u8],
    flags: u32,
    ttl: Ttl,
}

impl<'a> Payload<'a> {
    /// A payload with zero flags that never expires.
    pub fn new(value: &'a [u8]) -> Self {
        Self {
            value,
            flags: 0,
            ttl: Ttl::Never,
        }
    }

    /// Set the 32-bit opaque flags stored and returned verbatim.
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Set the time-to-live.
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Borrowed view of a stored item returned by [`CacheEngine::get`].
#[derive(Debug)]
pub struct ItemView<'a> {
    value: &'a [u8],
    flags: u32,
    version: u64,
}

impl ItemView<'_> {
    /// The stored value bytes.
    pub fn value(&self) -> &[u8] {
        self.value
    }

    /// The caller-defined flags stored with the item.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// The item's version, usable as the expected version of a later
    /// [`CacheEngine::cas`].
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Outcome of a [`CacheEngine::cas`] command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The key was found at the expected version; the new value is stored.
    Stored,
    /// The key was found but its version did not match ("badval").
    BadVersion,
    /// The key was not found.
    NotFound,
}

impl CasOutcome {
    /// Whether the key was found.
    pub fn found(&self) -> bool {
        !matches!(self, CasOutcome::NotFound)
    }

    /// Whether the new value was stored.
    pub fn stored(&self) -> bool {
        matches!(self, CasOutcome::Stored)
    }
}

/// Single-threaded memcached-style cache engine.
#[derive(Debug)]
pub struct CacheEngine {
    arena: Arena,
    index: HashIndex,
    stats: StatsRegistry,
    /// Last version handed out; the next mutation gets `last + 1`.
    version: u64,
    /// Items with `version <= flush_watermark` are dead.
    flush_watermark: u64,
}

impl CacheEngine {
    /// Create an engine from a configuration.
    pub fn new(config: EngineConfig) -> CacheResult<Self> {
        config.validate()?;
        let sizes = crate::config::SizeClasses::generate(&config)?;
        Ok(Self {
            arena: Arena::new(&config, sizes),
            index: HashIndex::new(config.initial_hash_capacity),
            stats: StatsRegistry::new(),
            version: 0,
            flush_watermark: 0,
        })
    }

    /// The engine's statistics registry (for `reset`).
    pub fn stats(&self) -> &StatsRegistry {
        &self.stats
    }

    /// Snapshot every counter plus gauges derived from live state.
    pub fn publish_stats(&self) -> StatsSnapshot {
        self.stats.snapshot(Gauges {
            curr_items: self.index.item_count() as u64,
            hash_capacity: self.index.capacity() as u64,
            hash_is_expanding: self.index.is_expanding(),
            bytes_used: self.arena.bytes_used(),
            total_pages: self.arena.page_count() as u64,
            free_pages: self.arena.free_page_count() as u64,
        })
    }

    /// Maximum storable item size (header + key + value).
    pub fn max_item_size(&self) -> usize {
        self.arena.max_item_size()
    }

    // ====================================================================
    // Commands
    // ====================================================================

    /// Look up a key. A hit refreshes the item's LRU position.
    pub fn get(&mut self, key: &[u8], hash: u64) -> Option<ItemView<'_>> {
        match self.lookup_live(key, hash) {
            Some(handle) => {
                self.arena.touch_lru(handle);
                self.stats.record_get(true);
                let header = self.arena.header(handle);
                Some(ItemView {
                    value: self.arena.value(handle),
                    flags: header.flags,
                    version: header.version,
                })
            }
            None => {
                self.stats.record_get(false);
                None
            }
        }
    }

    /// Store unconditionally, overwriting any existing entry.
    pub fn set(&mut self, key: &[u8], hash: u64, payload: Payload<'_>) -> CacheResult<()> {
        check_key(key)?;
        let handle = self.alloc_and_write(key, hash, payload.value, payload.flags, payload.ttl)?;
        let existed = self.swap_in(key, hash, handle);
        self.stats.record_set(existed);
        Ok(())
    }

    /// Store only if the key is absent. Returns whether it stored.
    pub fn add(&mut self, key: &[u8], hash: u64, payload: Payload<'_>) -> CacheResult<bool> {
        check_key(key)?;
        if self.lookup_live(key, hash).is_some() {
            self.stats.record_add(false);
            return Ok(false);
        }
        let handle = self.alloc_and_write(key, hash, payload.value, payload.flags, payload.ttl)?;
        self.index.insert(hash, handle);
        self.stats.record_add(true);
        Ok(true)
    }

    /// Store only if the key is present. Returns whether it stored.
    pub fn replace(&mut self, key: &[u8], hash: u64, payload: Payload<'_>) -> CacheResult<bool> {
        check_key(key)?;
        if self.lookup_live(key, hash).is_none() {
            self.stats.record_replace(false);
            return Ok(false);
        }
        let handle = self.alloc_and_write(key, hash, payload.value, payload.flags, payload.ttl)?;
        self.swap_in(key, hash, handle);
        self.stats.record_replace(true);
        Ok(true)
    }

    /// Compare-and-swap: store only if the key is present at the expected
    /// version.
    pub fn cas(
        &mut self,
        key: &[u8],
        hash: u64,
        payload: Payload<'_>,
        expected_version: u64,
    ) -> CacheResult<CasOutcome> {
        check_key(key)?;
        let Some(handle) = self.lookup_live(key, hash) else {
            self.stats.record_cas_miss();
            return Ok(CasOutcome::NotFound);
        };
        if self.arena.header(handle).version != expected_version {
            self.stats.record_cas_badval();
            return Ok(CasOutcome::BadVersion);
        }
        let new = self.alloc_and_write(key, hash, payload.value, payload.flags, payload.ttl)?;
        self.swap_in(key, hash, new);
        self.stats.record_cas_stored();
        Ok(CasOutcome::Stored)
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&mut self, key: &[u8], hash: u64) -> bool {
        match self.lookup_live(key, hash) {
            Some(handle) => {
                self.index.remove(hash, handle);
                self.arena.release(handle);
                self.stats.record_delete(true);
                true
            }
            None => {
                self.stats.record_delete(false);
                false
            }
        }
    }

    /// Update a key's expiration without touching its value. The version
    /// still advances. Returns whether the key was present.
    pub fn touch(&mut self, key: &[u8], hash: u64, ttl: Ttl) -> bool {
        match self.lookup_live(key, hash) {
            Some(handle) => {
                let expire_at = ttl.expire_at(clock::now_secs());
                self.arena.set_expire_at(handle, expire_at);
                let version = self.next_version();
                self.arena.set_version(handle, version);
                self.arena.touch_lru(handle);
                self.stats.record_touch(true);
                true
            }
            None => {
                self.stats.record_touch(false);
                false
            }
        }
    }

    /// Add `delta` to a numeric value, wrapping modulo 2^64.
    ///
    /// `Ok(None)` means the key was absent; no item is created.
    /// [`CacheError::NotNumeric`] means the stored value is not an
    /// unsigned decimal integer.
    pub fn incr(&mut self, key: &[u8], hash: u64, delta: u64) -> CacheResult<Option<u64>> {
        self.arithmetic(key, hash, delta, false)
    }

    /// Subtract `delta` from a numeric value, saturating at zero.
    pub fn decr(&mut self, key: &[u8], hash: u64, delta: u64) -> CacheResult<Option<u64>> {
        self.arithmetic(key, hash, delta, true)
    }

    /// Concatenate bytes after an existing value. The existing entry's
    /// flags and expiration are preserved; the payload's are ignored.
    /// Returns whether it stored (false = key absent).
    pub fn append(&mut self, key: &[u8], hash: u64, payload: Payload<'_>) -> CacheResult<bool> {
        self.concat(key, hash, payload.value, false)
    }

    /// Concatenate bytes before an existing value. See [`append`].
    ///
    /// [`append`]: CacheEngine::append
    pub fn prepend(&mut self, key: &[u8], hash: u64, payload: Payload<'_>) -> CacheResult<bool> {
        self.concat(key, hash, payload.value, true)
    }

    /// Invalidate every current entry. O(1): entries die by version
    /// watermark and are reclaimed lazily as lookups observe them.
    pub fn flush_all(&mut self) {
        self.flush_watermark = self.version;
        self.stats.record_flush();
        debug!(watermark = self.flush_watermark, "flush_all");
    }

    // ====================================================================
    // Internals
    // ====================================================================

    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Whether the item at `handle` is expired or flushed.
    fn is_dead(&self, handle: ItemHandle, now: u32) -> bool {
        let header = self.arena.header(handle);
        header.version <= self.flush_watermark || clock::is_expired(header.expire_at, now)
    }

    /// Find a live item, reclaiming it (and reporting a miss) if the
    /// lookup observes that it is dead.
    fn lookup_live(&mut self, key: &[u8], hash: u64) -> Option<ItemHandle> {
        let handle = self.index.find(hash, key, &self.arena)?;
        if self.is_dead(handle, clock::now_secs()) {
            self.index.remove(hash, handle);
            self.arena.release(handle);
            self.stats.record_expiration();
            return None;
        }
        Some(handle)
    }

    /// Allocate a slot (evicting if necessary), stamp a fresh version, and
    /// write the item.
    fn alloc_and_write(
        &mut self,
        key: &[u8],
        hash: u64,
        value: &[u8],
        flags: u32,
        ttl: Ttl,
    ) -> CacheResult<ItemHandle> {
        if value.len() > MAX_VALUE_LEN {
            return Err(CacheError::ItemTooLarge);
        }
        let size = item::item_size(key.len(), value.len());
        let handle = self
            .arena
            .allocate_with_eviction(size, &mut self.index, &self.stats)?;
        let expire_at = ttl.expire_at(clock::now_secs());
        let version = self.next_version();
        self.arena
            .write_item(handle, key, value, flags, expire_at, hash, version);
        Ok(handle)
    }

    /// Point the index at a freshly written item, releasing any entry it
    /// replaces. Returns whether an entry was replaced.
    ///
    /// The presence check runs after allocation: eviction inside
    /// `alloc_and_write` may already have removed the old entry for this
    /// key, and a dead old entry is reclaimed here rather than replaced.
    fn swap_in(&mut self, key: &[u8], hash: u64, new: ItemHandle) -> bool {
        match self.lookup_live(key, hash) {
            Some(old) => {
                let replaced = self.index.replace(hash, old, new);
                debug_assert!(replaced, "live entry vanished during swap");
                self.arena.release(old);
                true
            }
            None => {
                self.index.insert(hash, new);
                false
            }
        }
    }

    fn arithmetic(
        &mut self,
        key: &[u8],
        hash: u64,
        delta: u64,
        decrement: bool,
    ) -> CacheResult<Option<u64>> {
        let Some(handle) = self.lookup_live(key, hash) else {
            if decrement {
                self.stats.record_decr(false);
            } else {
                self.stats.record_incr(false);
            }
            return Ok(None);
        };

        let Some(current) = numeric::parse_decimal(self.arena.value(handle)) else {
            if decrement {
                self.stats.record_decr_malformed();
            } else {
                self.stats.record_incr_malformed();
            }
            return Err(CacheError::NotNumeric);
        };

        let updated = if decrement {
            current.saturating_sub(delta)
        } else {
            current.wrapping_add(delta)
        };

        let mut buf = [0u8; 20];
        let len = numeric::format_decimal(updated, &mut buf);
        let header = self.arena.header(handle);
        let new = self.rewrite(key, hash, &buf[..len], header.flags, header.expire_at)?;
        self.swap_in(key, hash, new);

        if decrement {
            self.stats.record_decr(true);
        } else {
            self.stats.record_incr(true);
        }
        Ok(Some(updated))
    }

    fn concat(
        &mut self,
        key: &[u8],
        hash: u64,
        extra: &[u8],
        prepend: bool,
    ) -> CacheResult<bool> {
        check_key(key)?;
        let Some(handle) = self.lookup_live(key, hash) else {
            if prepend {
                self.stats.record_prepend(false);
            } else {
                self.stats.record_append(false);
            }
            return Ok(false);
        };

        // Copy out before allocating: eviction inside the allocation may
        // reuse the old slot.
        let header = self.arena.header(handle);
        let existing = self.arena.value(handle);
        let mut combined = Vec::with_capacity(existing.len() + extra.len());
        if prepend {
            combined.extend_from_slice(extra);
            combined.extend_from_slice(existing);
        } else {
            combined.extend_from_slice(existing);
            combined.extend_from_slice(extra);
        }

        let new = self.rewrite(key, hash, &combined, header.flags, header.expire_at)?;
        self.swap_in(key, hash, new);

        if prepend {
            self.stats.record_prepend(true);
        } else {
            self.stats.record_append(true);
        }
        Ok(true)
    }

    /// Allocate and write an item that keeps an existing entry's absolute
    /// expiration (arithmetic and concatenation paths).
    fn rewrite(
        &mut self,
        key: &[u8],
        hash: u64,
        value: &[u8],
        flags: u32,
        expire_at: u32,
    ) -> CacheResult<ItemHandle> {
        if value.len() > MAX_VALUE_LEN {
            return Err(CacheError::ItemTooLarge);
        }
        let size = item::item_size(key.len(), value.len());
        let handle = self
            .arena
            .allocate_with_eviction(size, &mut self.index, &self.stats)?;
        let version = self.next_version();
        self.arena
            .write_item(handle, key, value, flags, expire_at, hash, version);
        Ok(handle)
    }
}

fn check_key(key: &[u8]) -> CacheResult<()> {
    if key.is_empty() {
        return Err(CacheError::EmptyKey);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(CacheError::KeyTooLong);
    }
    Ok(())
}
