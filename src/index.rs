//! Hash index mapping key digests to item handles.
//!
//! Separate-chaining table with power-of-two capacity. Entries hold the
//! full 64-bit digest plus the item handle; a lookup matches on digest
//! first, then confirms the actual key bytes through a [`KeyVerifier`]
//! (collisions are never resolved by digest alone).
//!
//! # Expansion
//!
//! When an insert brings the item count up to the bucket count (load
//! factor 1.0), a table of double capacity is allocated and the old table
//! is drained through an explicit migration cursor. Every index operation
//! first advances the cursor by a bounded slice, so no single call
//! rehashes more than [`MIGRATION_SLICE`] buckets; small tables finish
//! within the operation that triggered growth. While the old table exists,
//! lookups and removals consult it for buckets the cursor has not reached.
//! Capacity never shrinks.

use crate::handle::ItemHandle;
use tracing::debug;

/// Buckets migrated per index operation during an expansion.
const MIGRATION_SLICE: usize = 64;

/// Confirms that the item at a handle actually carries a key.
///
/// The index stores digests, not key bytes; the arena implements this seam
/// so a digest match can be confirmed against the stored key.
pub trait KeyVerifier {
    /// Whether the item at `handle` has exactly this key.
    fn verify(&self, handle: ItemHandle, key: &[u8]) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    hash: u64,
    handle: ItemHandle,
}

type Bucket = Vec<Entry>;

#[derive(Debug)]
struct Migration {
    buckets: Vec<Bucket>,
    /// Buckets below this index have been drained into the new table.
    cursor: usize,
}

/// Key-digest to item-handle index with online capacity growth.
#[derive(Debug)]
pub(crate) struct HashIndex {
    buckets: Vec<Bucket>,
    old: Option<Migration>,
    items: usize,
}

#[inline]
fn bucket_of(hash: u64, capacity: usize) -> usize {
    (hash as usize) & (capacity - 1)
}

impl HashIndex {
    /// Create an index with the given initial capacity (a power of two,
    /// validated by the engine configuration).
    pub(crate) fn new(initial_capacity: usize) -> Self {
        debug_assert!(initial_capacity.is_power_of_two());
        Self {
            buckets: vec![Vec::new(); initial_capacity],
            old: None,
            items: 0,
        }
    }

    /// Current capacity in buckets. Reports the new table's capacity while
    /// an expansion is in progress.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Number of live entries.
    #[inline]
    pub(crate) fn item_count(&self) -> usize {
        self.items
    }

    /// Whether a capacity expansion is still migrating entries.
    #[inline]
    pub(crate) fn is_expanding(&self) -> bool {
        self.old.is_some()
    }

    /// Look up a key. The digest narrows the search; the verifier confirms
    /// the key bytes.
    pub(crate) fn find(
        &mut self,
        hash: u64,
        key: &[u8],
        verifier: &impl KeyVerifier,
    ) -> Option<ItemHandle> {
        self.migrate_slice();

        let bucket = &self.buckets[bucket_of(hash, self.buckets.len())];
        for entry in bucket {
            if entry.hash == hash && verifier.verify(entry.handle, key) {
                return Some(entry.handle);
            }
        }

        if let Some(old) = &self.old {
            let idx = bucket_of(hash, old.buckets.len());
            if idx >= old.cursor {
                for entry in &old.buckets[idx] {
                    if entry.hash == hash && verifier.verify(entry.handle, key) {
                        return Some(entry.handle);
                    }
                }
            }
        }
        None
    }

    /// Insert a new entry. The caller must have established that the key
    /// is absent (every command looks up before inserting).
    pub(crate) fn insert(&mut self, hash: u64, handle: ItemHandle) {
        self.migrate_slice();

        let idx = bucket_of(hash, self.buckets.len());
        self.buckets[idx].push(Entry { hash, handle });
        self.items += 1;

        self.maybe_expand();
    }

    /// Swap the handle of an existing entry, keeping its digest. Returns
    /// false if no entry matches `(hash, old)`.
    pub(crate) fn replace(&mut self, hash: u64, old: ItemHandle, new: ItemHandle) -> bool {
        self.migrate_slice();

        let idx = bucket_of(hash, self.buckets.len());
        for entry in &mut self.buckets[idx] {
            if entry.hash == hash && entry.handle == old {
                entry.handle = new;
                return true;
            }
        }

        if let Some(migration) = &mut self.old {
            let idx = bucket_of(hash, migration.buckets.len());
            if idx >= migration.cursor {
                for entry in &mut migration.buckets[idx] {
                    if entry.hash == hash && entry.handle == old {
                        entry.handle = new;
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Remove the entry matching `(hash, handle)`. Matching on the handle
    /// rather than the key makes removal exact even if another live item
    /// shares the digest.
    pub(crate) fn remove(&mut self, hash: u64, handle: ItemHandle) -> bool {
        self.migrate_slice();

        let idx = bucket_of(hash, self.buckets.len());
        let bucket = &mut self.buckets[idx];
        if let Some(pos) = bucket
            .iter()
            .position(|e| e.hash == hash && e.handle == handle)
        {
            bucket.swap_remove(pos);
            self.items -= 1;
            return true;
        }

        if let Some(migration) = &mut self.old {
            let idx = bucket_of(hash, migration.buckets.len());
            if idx >= migration.cursor {
                let bucket = &mut migration.buckets[idx];
                if let Some(pos) = bucket
                    .iter()
                    .position(|e| e.hash == hash && e.handle == handle)
                {
                    bucket.swap_remove(pos);
                    self.items -= 1;
                    return true;
                }
            }
        }
        false
    }

    /// Start an expansion if the load factor has reached 1.0 and none is
    /// already running.
    fn maybe_expand(&mut self) {
        if self.old.is_some() || self.items < self.buckets.len() {
            return;
        }
        let capacity = self.buckets.len();
        debug!(capacity, items = self.items, "hash index expansion started");
        let old_buckets = std::mem::replace(&mut self.buckets, vec![Vec::new(); capacity * 2]);
        self.old = Some(Migration {
            buckets: old_buckets,
            cursor: 0,
        });
        // The first slice runs inside the triggering insert, which fully
        // migrates small tables before the command returns.
        self.migrate_slice();
    }

    /// Advance the migration cursor by at most one slice.
    fn migrate_slice(&mut self) {
        let Some(mut migration) = self.old.take() else {
            return;
        };

        let end = (migration.cursor + MIGRATION_SLICE).min(migration.buckets.len());
        let capacity = self.buckets.len();
        for idx in migration.cursor..end {
            for entry in migration.buckets[idx].drain(..) {
                self.buckets[bucket_of(entry.hash, capacity)].push(entry);
            }
        }
        migration.cursor = end;

        if migration.cursor < migration.buckets.len() {
            self.old = Some(migration);
        } else {
            debug!(capacity, "hash index expansion complete");
        }
    }
}
