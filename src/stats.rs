//! Command and outcome statistics.
//!
//! [`StatsRegistry`] is an explicit per-engine counter set under the
//! `cache` domain: one relaxed atomic per metric, a `record_*` helper per
//! command outcome, `reset`, and a snapshot operation that merges the live
//! counters with gauges derived from the engine's current state.
//!
//! Counters are atomics so an operator thread can snapshot or reset a
//! registry while a worker owns the engine.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-engine counters for every command and outcome.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    cmd_get: AtomicU64,
    get_hits: AtomicU64,
    get_misses: AtomicU64,
    cmd_set: AtomicU64,
    set_new: AtomicU64,
    set_existing: AtomicU64,
    cmd_add: AtomicU64,
    add_stored: AtomicU64,
    add_not_stored: AtomicU64,
    cmd_replace: AtomicU64,
    replace_stored: AtomicU64,
    replace_not_stored: AtomicU64,
    cmd_cas: AtomicU64,
    cas_stored: AtomicU64,
    cas_badval: AtomicU64,
    cas_misses: AtomicU64,
    cmd_delete: AtomicU64,
    delete_hits: AtomicU64,
    delete_misses: AtomicU64,
    cmd_touch: AtomicU64,
    touch_hits: AtomicU64,
    touch_misses: AtomicU64,
    cmd_incr: AtomicU64,
    incr_hits: AtomicU64,
    incr_misses: AtomicU64,
    cmd_decr: AtomicU64,
    decr_hits: AtomicU64,
    decr_misses: AtomicU64,
    cmd_append: AtomicU64,
    append_stored: AtomicU64,
    append_misses: AtomicU64,
    cmd_prepend: AtomicU64,
    prepend_stored: AtomicU64,
    prepend_misses: AtomicU64,
    cmd_flush: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StatsRegistry {
    /// Create a registry with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a GET and whether it hit.
    #[inline]
    pub(crate) fn record_get(&self, hit: bool) {
        bump(&self.cmd_get);
        bump(if hit { &self.get_hits } else { &self.get_misses });
    }

    /// Record a SET and whether it overwrote an existing entry.
    #[inline]
    pub(crate) fn record_set(&self, existed: bool) {
        bump(&self.cmd_set);
        bump(if existed {
            &self.set_existing
        } else {
            &self.set_new
        });
    }

    /// Record an ADD and whether it stored.
    #[inline]
    pub(crate) fn record_add(&self, stored: bool) {
        bump(&self.cmd_add);
        bump(if stored {
            &self.add_stored
        } else {
            &self.add_not_stored
        });
    }

    /// Record a REPLACE and whether it stored.
    #[inline]
    pub(crate) fn record_replace(&self, stored: bool) {
        bump(&self.cmd_replace);
        bump(if stored {
            &self.replace_stored
        } else {
            &self.replace_not_stored
        });
    }

    /// Record a CAS that stored.
    #[inline]
    pub(crate) fn record_cas_stored(&self) {
        bump(&self.cmd_cas);
        bump(&self.cas_stored);
    }

    /// Record a CAS that found the key but missed the version.
    #[inline]
    pub(crate) fn record_cas_badval(&self) {
        bump(&self.cmd_cas);
        bump(&self.cas_badval);
    }

    /// Record a CAS on a missing key.
    #[inline]
    pub(crate) fn record_cas_miss(&self) {
        bump(&self.cmd_cas);
        bump(&self.cas_misses);
    }

    /// Record a DELETE and whether it hit.
    #[inline]
    pub(crate) fn record_delete(&self, hit: bool) {
        bump(&self.cmd_delete);
        bump(if hit {
            &self.delete_hits
        } else {
            &self.delete_misses
        });
    }

    /// Record a TOUCH and whether it hit.
    #[inline]
    pub(crate) fn record_touch(&self, hit: bool) {
        bump(&self.cmd_touch);
        bump(if hit {
            &self.touch_hits
        } else {
            &self.touch_misses
        });
    }

    /// Record an INCR and whether it hit.
    #[inline]
    pub(crate) fn record_incr(&self, hit: bool) {
        bump(&self.cmd_incr);
        bump(if hit { &self.incr_hits } else { &self.incr_misses });
    }

    /// Record an INCR that found a non-numeric value. Only the command
    /// counter moves - a malformed value is neither a hit nor a miss.
    #[inline]
    pub(crate) fn record_incr_malformed(&self) {
        bump(&self.cmd_incr);
    }

    /// Record a DECR and whether it hit.
    #[inline]
    pub(crate) fn record_decr(&self, hit: bool) {
        bump(&self.cmd_decr);
        bump(if hit { &self.decr_hits } else { &self.decr_misses });
    }

    /// Record a DECR that found a non-numeric value.
    #[inline]
    pub(crate) fn record_decr_malformed(&self) {
        bump(&self.cmd_decr);
    }

    /// Record an APPEND and whether it stored.
    #[inline]
    pub(crate) fn record_append(&self, stored: bool) {
        bump(&self.cmd_append);
        bump(if stored {
            &self.append_stored
        } else {
            &self.append_misses
        });
    }

    /// Record a PREPEND and whether it stored.
    #[inline]
    pub(crate) fn record_prepend(&self, stored: bool) {
        bump(&self.cmd_prepend);
        bump(if stored {
            &self.prepend_stored
        } else {
            &self.prepend_misses
        });
    }

    /// Record a FLUSH_ALL.
    #[inline]
    pub(crate) fn record_flush(&self) {
        bump(&self.cmd_flush);
    }

    /// Record an eviction.
    #[inline]
    pub(crate) fn record_eviction(&self) {
        bump(&self.evictions);
    }

    /// Record a lazy-expiration reclaim.
    #[inline]
    pub(crate) fn record_expiration(&self) {
        bump(&self.expirations);
    }

    /// Reset all counters to zero. Cache contents are unaffected.
    pub fn reset(&self) {
        let all = [
            &self.cmd_get,
            &self.get_hits,
            &self.get_misses,
            &self.cmd_set,
            &self.set_new,
            &self.set_existing,
            &self.cmd_add,
            &self.add_stored,
            &self.add_not_stored,
            &self.cmd_replace,
            &self.replace_stored,
            &self.replace_not_stored,
            &self.cmd_cas,
            &self.cas_stored,
            &self.cas_badval,
            &self.cas_misses,
            &self.cmd_delete,
            &self.delete_hits,
            &self.delete_misses,
            &self.cmd_touch,
            &self.touch_hits,
            &self.touch_misses,
            &self.cmd_incr,
            &self.incr_hits,
            &self.incr_misses,
            &self.cmd_decr,
            &self.decr_hits,
            &self.decr_misses,
            &self.cmd_append,
            &self.append_stored,
            &self.append_misses,
            &self.cmd_prepend,
            &self.prepend_stored,
            &self.prepend_misses,
            &self.cmd_flush,
            &self.evictions,
            &self.expirations,
        ];
        for counter in all {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Snapshot the counters, merging in gauges from the engine.
    pub(crate) fn snapshot(&self, gauges: Gauges) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            cmd_get: load(&self.cmd_get),
            get_hits: load(&self.get_hits),
            get_misses: load(&self.get_misses),
            cmd_set: load(&self.cmd_set),
            set_new: load(&self.set_new),
            set_existing: load(&self.set_existing),
            cmd_add: load(&self.cmd_add),
            add_stored: load(&self.add_stored),
            add_not_stored: load(&self.add_not_stored),
            cmd_replace: load(&self.cmd_replace),
            replace_stored: load(&self.replace_stored),
            replace_not_stored: load(&self.replace_not_stored),
            cmd_cas: load(&self.cmd_cas),
            cas_stored: load(&self.cas_stored),
            cas_badval: load(&self.cas_badval),
            cas_misses: load(&self.cas_misses),
            cmd_delete: load(&self.cmd_delete),
            delete_hits: load(&self.delete_hits),
            delete_misses: load(&self.delete_misses),
            cmd_touch: load(&self.cmd_touch),
            touch_hits: load(&self.touch_hits),
            touch_misses: load(&self.touch_misses),
            cmd_incr: load(&self.cmd_incr),
            incr_hits: load(&self.incr_hits),
            incr_misses: load(&self.incr_misses),
            cmd_decr: load(&self.cmd_decr),
            decr_hits: load(&self.decr_hits),
            decr_misses: load(&self.decr_misses),
            cmd_append: load(&self.cmd_append),
            append_stored: load(&self.append_stored),
            append_misses: load(&self.append_misses),
            cmd_prepend: load(&self.cmd_prepend),
            prepend_stored: load(&self.prepend_stored),
            prepend_misses: load(&self.prepend_misses),
            cmd_flush: load(&self.cmd_flush),
            evictions: load(&self.evictions),
            expirations: load(&self.expirations),
            curr_items: gauges.curr_items,
            hash_capacity: gauges.hash_capacity,
            hash_is_expanding: gauges.hash_is_expanding,
            bytes_used: gauges.bytes_used,
            total_pages: gauges.total_pages,
            free_pages: gauges.free_pages,
        }
    }
}

/// Gauges derived from live engine state at publish time.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Gauges {
    pub curr_items: u64,
    pub hash_capacity: u64,
    pub hash_is_expanding: bool,
    pub bytes_used: u64,
    pub total_pages: u64,
    pub free_pages: u64,
}

/// Point-in-time view of every counter and gauge in the `cache` domain.
#[derive(Debug, Clone, Copy, Default)]
#[allow(missing_docs)]
pub struct StatsSnapshot {
    pub cmd_get: u64,
    pub get_hits: u64,
    pub get_misses: u64,
    pub cmd_set: u64,
    pub set_new: u64,
    pub set_existing: u64,
    pub cmd_add: u64,
    pub add_stored: u64,
    pub add_not_stored: u64,
    pub cmd_replace: u64,
    pub replace_stored: u64,
    pub replace_not_stored: u64,
    pub cmd_cas: u64,
    pub cas_stored: u64,
    pub cas_badval: u64,
    pub cas_misses: u64,
    pub cmd_delete: u64,
    pub delete_hits: u64,
    pub delete_misses: u64,
    pub cmd_touch: u64,
    pub touch_hits: u64,
    pub touch_misses: u64,
    pub cmd_incr: u64,
    pub incr_hits: u64,
    pub incr_misses: u64,
    pub cmd_decr: u64,
    pub decr_hits: u64,
    pub decr_misses: u64,
    pub cmd_append: u64,
    pub append_stored: u64,
    pub append_misses: u64,
    pub cmd_prepend: u64,
    pub prepend_stored: u64,
    pub prepend_misses: u64,
    pub cmd_flush: u64,
    pub evictions: u64,
    pub expirations: u64,

    /// Current number of live index entries.
    pub curr_items: u64,
    /// Current hash index capacity (buckets).
    pub hash_capacity: u64,
    /// Whether a hash expansion is in progress.
    pub hash_is_expanding: bool,
    /// Bytes handed out to live items.
    pub bytes_used: u64,
    /// Total pages in the arena.
    pub total_pages: u64,
    /// Pages not currently assigned to a size class.
    pub free_pages: u64,
}

impl StatsSnapshot {
    /// Overall GET hit rate as a percentage (0.0 - 100.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.get_hits + self.get_misses;
        if total == 0 {
            0.0
        } else {
            (self.get_hits as f64 / total as f64) * 100.0
        }
    }

    /// Iterate every metric as a `(name, value)` pair under the `cache`
    /// domain, booleans rendered as 0/1. Exporters format these however
    /// they like.
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        [
            ("cmd_get", self.cmd_get),
            ("get_hits", self.get_hits),
            ("get_misses", self.get_misses),
            ("cmd_set", self.cmd_set),
            ("set_new", self.set_new),
            ("set_existing", self.set_existing),
            ("cmd_add", self.cmd_add),
            ("add_stored", self.add_stored),
            ("add_not_stored", self.add_not_stored),
            ("cmd_replace", self.cmd_replace),
            ("replace_stored", self.replace_stored),
            ("replace_not_stored", self.replace_not_stored),
            ("cmd_cas", self.cmd_cas),
            ("cas_stored", self.cas_stored),
            ("cas_badval", self.cas_badval),
            ("cas_misses", self.cas_misses),
            ("cmd_delete", self.cmd_delete),
            ("delete_hits", self.delete_hits),
            ("delete_misses", self.delete_misses),
            ("cmd_touch", self.cmd_touch),
            ("touch_hits", self.touch_hits),
            ("touch_misses", self.touch_misses),
            ("cmd_incr", self.cmd_incr),
            ("incr_hits", self.incr_hits),
            ("incr_misses", self.incr_misses),
            ("cmd_decr", self.cmd_decr),
            ("decr_hits", self.decr_hits),
            ("decr_misses", self.decr_misses),
            ("cmd_append", self.cmd_append),
            ("append_stored", self.append_stored),
            ("append_misses", self.append_misses),
            ("cmd_prepend", self.cmd_prepend),
            ("prepend_stored", self.prepend_stored),
            ("prepend_misses", self.prepend_misses),
            ("cmd_flush", self.cmd_flush),
            ("evictions", self.evictions),
            ("expirations", self.expirations),
            ("curr_items", self.curr_items),
            ("hash_capacity", self.hash_capacity),
            ("hash_is_expanding", self.hash_is_expanding as u64),
            ("bytes_used", self.bytes_used),
            ("total_pages", self.total_pages),
            ("free_pages", self.free_pages),
        ]
        .into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_get() {
        let stats = StatsRegistry::new();
        stats.record_get(true);
        stats.record_get(true);
        stats.record_get(false);

        let snap = stats.snapshot(Gauges::default());
        assert_eq!(snap.cmd_get, 3);
        assert_eq!(snap.get_hits, 2);
        assert_eq!(snap.get_misses, 1);
    }

    #[test]
    fn test_record_cas_outcomes() {
        let stats = StatsRegistry::new();
        stats.record_cas_miss();
        stats.record_cas_badval();
        stats.record_cas_stored();

        let snap = stats.snapshot(Gauges::default());
        assert_eq!(snap.cmd_cas, 3);
        assert_eq!(snap.cas_misses, 1);
        assert_eq!(snap.cas_badval, 1);
        assert_eq!(snap.cas_stored, 1);
    }

    #[test]
    fn test_malformed_counts_command_only() {
        let stats = StatsRegistry::new();
        stats.record_incr_malformed();
        stats.record_decr_malformed();

        let snap = stats.snapshot(Gauges::default());
        assert_eq!(snap.cmd_incr, 1);
        assert_eq!(snap.incr_hits, 0);
        assert_eq!(snap.incr_misses, 0);
        assert_eq!(snap.cmd_decr, 1);
        assert_eq!(snap.decr_hits, 0);
        assert_eq!(snap.decr_misses, 0);
    }

    #[test]
    fn test_reset() {
        let stats = StatsRegistry::new();
        stats.record_set(false);
        stats.record_get(true);
        stats.record_eviction();
        stats.record_flush();

        stats.reset();

        let snap = stats.snapshot(Gauges::default());
        assert_eq!(snap.cmd_set, 0);
        assert_eq!(snap.cmd_get, 0);
        assert_eq!(snap.evictions, 0);
        assert_eq!(snap.cmd_flush, 0);
    }

    #[test]
    fn test_gauges_passed_through() {
        let stats = StatsRegistry::new();
        let snap = stats.snapshot(Gauges {
            curr_items: 7,
            hash_capacity: 32,
            hash_is_expanding: true,
            bytes_used: 4096,
            total_pages: 16,
            free_pages: 3,
        });
        assert_eq!(snap.curr_items, 7);
        assert_eq!(snap.hash_capacity, 32);
        assert!(snap.hash_is_expanding);
        assert_eq!(snap.bytes_used, 4096);
    }

    #[test]
    fn test_hit_rate() {
        let snap = StatsSnapshot {
            get_hits: 80,
            get_misses: 20,
            ..Default::default()
        };
        assert!((snap.hit_rate() - 80.0).abs() < 0.001);
        assert_eq!(StatsSnapshot::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_entries_cover_every_metric() {
        let snap = StatsSnapshot::default();
        let names: Vec<_> = snap.entries().map(|(name, _)| name).collect();
        assert_eq!(names.len(), 43);
        assert!(names.contains(&"cmd_get"));
        assert!(names.contains(&"cas_badval"));
        assert!(names.contains(&"hash_is_expanding"));
        // No duplicate names.
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
    }
}
