//! Bounded-memory arena backing all item storage.
//!
//! The arena owns a single heap of `page_count * page_size` bytes and
//! hands out slots identified by opaque [`ItemHandle`]s - nothing outside
//! this module ever sees an address into the heap. Pages are assigned on
//! demand to size classes; each class carves its pages into equal slots
//! and tracks:
//!
//! - a free-slot stack for O(1) allocation,
//! - an intrusive LRU list threaded through item headers (head = most
//!   recently used), and
//! - item count and bytes-used gauges.
//!
//! When no slot or free page is available, the least-recently-used item of
//! the requesting class is evicted; if that class is empty, other classes
//! are drained instead. A page whose slots are all free returns to the
//! shared pool, so memory flows between classes and an allocation only
//! fails outright when the item itself cannot fit in a page (or eviction
//! is disabled by configuration).
//!
//! Every eviction removes the victim's hash index entry before its slot
//! is reused, so the index never references freed storage.

use tracing::debug;

use crate::config::{EngineConfig, SizeClasses};
use crate::error::{CacheError, CacheResult};
use crate::handle::ItemHandle;
use crate::index::{HashIndex, KeyVerifier};
use crate::item::{
    self, ItemHeader, LINK_NONE, pack_slot_ref, unpack_slot_ref,
};
use crate::stats::StatsRegistry;

/// Per-class allocation state.
#[derive(Debug)]
struct ClassState {
    /// Slot size in bytes.
    slot_size: usize,
    /// Slots carved from each page of this class.
    slots_per_page: usize,
    /// Free slots, packed as (page << 16 | slot).
    free_slots: Vec<u32>,
    /// Most recently used item, or LINK_NONE.
    lru_head: u32,
    /// Least recently used item, or LINK_NONE.
    lru_tail: u32,
    /// Live items in this class.
    item_count: u64,
    /// Bytes used by live items (actual item sizes, not slot sizes).
    bytes_used: u64,
}

impl ClassState {
    fn new(slot_size: usize, page_size: usize) -> Self {
        Self {
            slot_size,
            slots_per_page: page_size / slot_size,
            free_slots: Vec::new(),
            lru_head: LINK_NONE,
            lru_tail: LINK_NONE,
            item_count: 0,
            bytes_used: 0,
        }
    }
}

/// Per-page assignment state.
#[derive(Debug, Clone, Copy)]
struct PageState {
    /// Size class this page belongs to, if assigned.
    class: Option<u8>,
    /// Slots currently allocated out of this page.
    used_slots: u32,
}

/// Page-organized slab arena with per-class LRU eviction.
#[derive(Debug)]
pub(crate) struct Arena {
    heap: Box<[u8]>,
    page_size: usize,
    sizes: SizeClasses,
    classes: Vec<ClassState>,
    pages: Vec<PageState>,
    free_pages: Vec<u32>,
    evictions_enabled: bool,
    bytes_used: u64,
    items: u64,
}

impl Arena {
    /// Create an arena for a validated configuration.
    pub(crate) fn new(config: &EngineConfig, sizes: SizeClasses) -> Self {
        let page_count = config.page_count();
        let classes = (0..sizes.len())
            .map(|i| ClassState::new(sizes.slot_size(i as u8), config.page_size))
            .collect();
        Self {
            heap: vec![0u8; page_count * config.page_size].into_boxed_slice(),
            page_size: config.page_size,
            sizes,
            classes,
            pages: vec![
                PageState {
                    class: None,
                    used_slots: 0,
                };
                page_count
            ],
            // Reversed so page 0 is handed out first.
            free_pages: (0..page_count as u32).rev().collect(),
            evictions_enabled: config.evictions_enabled,
            bytes_used: 0,
            items: 0,
        }
    }

    /// Maximum item size (header + key + value): one page.
    #[inline]
    pub(crate) fn max_item_size(&self) -> usize {
        self.page_size
    }

    /// Live items across all classes.
    #[inline]
    pub(crate) fn item_count(&self) -> u64 {
        self.items
    }

    /// Bytes handed out to live items.
    #[inline]
    pub(crate) fn bytes_used(&self) -> u64 {
        self.bytes_used
    }

    /// Total pages in the heap.
    #[inline]
    pub(crate) fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Pages not currently assigned to a class.
    #[inline]
    pub(crate) fn free_page_count(&self) -> usize {
        self.free_pages.len()
    }

    // ====================================================================
    // Slot addressing
    // ====================================================================

    #[inline]
    fn slot_range(&self, class_id: u8, page_id: u32, slot: u16) -> std::ops::Range<usize> {
        debug_assert_eq!(self.pages[page_id as usize].class, Some(class_id));
        let slot_size = self.classes[class_id as usize].slot_size;
        let offset = page_id as usize * self.page_size + slot as usize * slot_size;
        offset..offset + slot_size
    }

    #[inline]
    fn slot(&self, handle: ItemHandle) -> &[u8] {
        &self.heap[self.slot_range(handle.class_id(), handle.page_id(), handle.slot())]
    }

    #[inline]
    fn slot_mut(&mut self, handle: ItemHandle) -> &mut [u8] {
        let range = self.slot_range(handle.class_id(), handle.page_id(), handle.slot());
        &mut self.heap[range]
    }

    #[inline]
    fn link_slot_mut(&mut self, class_id: u8, link: u32) -> &mut [u8] {
        let (page, slot) = unpack_slot_ref(link);
        let range = self.slot_range(class_id, page, slot);
        &mut self.heap[range]
    }

    // ====================================================================
    // Item access
    // ====================================================================

    /// Parsed header of the item at a handle.
    #[inline]
    pub(crate) fn header(&self, handle: ItemHandle) -> ItemHeader {
        ItemHeader::read(self.slot(handle))
    }

    /// Key bytes of the item at a handle.
    #[inline]
    pub(crate) fn key(&self, handle: ItemHandle) -> &[u8] {
        let slot = self.slot(handle);
        let header = ItemHeader::read(slot);
        &slot[header.key_range()]
    }

    /// Value bytes of the item at a handle.
    #[inline]
    pub(crate) fn value(&self, handle: ItemHandle) -> &[u8] {
        let slot = self.slot(handle);
        let header = ItemHeader::read(slot);
        &slot[header.value_range()]
    }

    /// Patch an item's expiration in place.
    pub(crate) fn set_expire_at(&mut self, handle: ItemHandle, expire_at: u32) {
        item::write_expire_at(self.slot_mut(handle), expire_at);
    }

    /// Patch an item's version in place.
    pub(crate) fn set_version(&mut self, handle: ItemHandle, version: u64) {
        item::write_version(self.slot_mut(handle), version);
    }

    // ====================================================================
    // Allocation and eviction
    // ====================================================================

    /// Allocate a slot for an item of `item_size` bytes, evicting LRU
    /// items if the arena is full and eviction is enabled.
    ///
    /// The index is passed in so every victim's entry is removed before
    /// its slot is reused; the registry counts each eviction.
    pub(crate) fn allocate_with_eviction(
        &mut self,
        item_size: usize,
        index: &mut HashIndex,
        stats: &StatsRegistry,
    ) -> CacheResult<ItemHandle> {
        let Some(class_id) = self.sizes.select(item_size) else {
            return Err(CacheError::ItemTooLarge);
        };
        loop {
            if let Some(handle) = self.allocate_in(class_id) {
                return Ok(handle);
            }
            if !self.evictions_enabled {
                return Err(CacheError::OutOfMemory);
            }
            if !self.evict_one(class_id, index, stats) {
                return Err(CacheError::OutOfMemory);
            }
        }
    }

    /// Try to allocate a slot in a class without evicting.
    fn allocate_in(&mut self, class_id: u8) -> Option<ItemHandle> {
        if let Some(packed) = self.classes[class_id as usize].free_slots.pop() {
            let (page, slot) = unpack_slot_ref(packed);
            self.pages[page as usize].used_slots += 1;
            return Some(ItemHandle::new(class_id, page, slot));
        }

        // Class exhausted - assign a fresh page and carve it up.
        let page = self.free_pages.pop()?;
        self.pages[page as usize] = PageState {
            class: Some(class_id),
            used_slots: 1,
        };
        let class = &mut self.classes[class_id as usize];
        for slot in (1..class.slots_per_page).rev() {
            class.free_slots.push(pack_slot_ref(page, slot as u16));
        }
        Some(ItemHandle::new(class_id, page, 0))
    }

    /// Evict one LRU item to make room for an allocation in `preferred`.
    ///
    /// Falls back to draining other classes when the preferred class has
    /// no items; their pages return to the shared pool as they empty.
    /// Returns false when the arena holds no items at all.
    fn evict_one(
        &mut self,
        preferred: u8,
        index: &mut HashIndex,
        stats: &StatsRegistry,
    ) -> bool {
        let victim_class = if self.classes[preferred as usize].lru_tail != LINK_NONE {
            preferred
        } else {
            match self.classes.iter().position(|c| c.lru_tail != LINK_NONE) {
                Some(class_id) => class_id as u8,
                None => return false,
            }
        };

        let (page, slot) = unpack_slot_ref(self.classes[victim_class as usize].lru_tail);
        let victim = ItemHandle::new(victim_class, page, slot);
        let hash = item::read_hash(self.slot(victim));

        // Index entry goes first, then the slot; the index must never
        // reference freed storage.
        let removed = index.remove(hash, victim);
        debug_assert!(removed, "eviction victim missing from index");
        stats.record_eviction();
        debug!(class = victim_class, "evicted lru item");
        self.release(victim);
        true
    }

    /// Write an item into a freshly allocated slot and link it at the LRU
    /// head.
    pub(crate) fn write_item(
        &mut self,
        handle: ItemHandle,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expire_at: u32,
        hash: u64,
        version: u64,
    ) {
        let header = ItemHeader {
            key_len: key.len(),
            value_len: value.len(),
            flags,
            expire_at,
            hash,
            version,
        };
        let size = header.item_size();
        debug_assert!(size <= self.classes[handle.class_id() as usize].slot_size);

        let slot = self.slot_mut(handle);
        header.write(slot);
        slot[header.key_range()].copy_from_slice(key);
        slot[header.value_range()].copy_from_slice(value);

        self.classes[handle.class_id() as usize].bytes_used += size as u64;
        self.bytes_used += size as u64;
        self.lru_insert_head(handle);
    }

    /// Release an item: unlink it from the LRU list, return its slot to
    /// the class free list, and reclaim the page if it is now empty.
    pub(crate) fn release(&mut self, handle: ItemHandle) {
        let size = self.header(handle).item_size() as u64;
        self.lru_remove(handle);

        let class_id = handle.class_id() as usize;
        self.classes[class_id].bytes_used -= size;
        self.bytes_used -= size;

        let page = handle.page_id();
        self.classes[class_id]
            .free_slots
            .push(pack_slot_ref(page, handle.slot()));
        self.pages[page as usize].used_slots -= 1;

        if self.pages[page as usize].used_slots == 0 {
            // Whole page free - pull its slots out of the class free list
            // and return it to the shared pool for any class to reuse.
            self.classes[class_id]
                .free_slots
                .retain(|&packed| unpack_slot_ref(packed).0 != page);
            self.pages[page as usize].class = None;
            self.free_pages.push(page);
        }
    }

    // ====================================================================
    // LRU list maintenance
    //
    // Links live in the item headers themselves; the class only holds the
    // head and tail references.
    // ====================================================================

    /// Link an item at the head (most recently used).
    fn lru_insert_head(&mut self, handle: ItemHandle) {
        let class_id = handle.class_id();
        let packed = pack_slot_ref(handle.page_id(), handle.slot());
        let old_head = self.classes[class_id as usize].lru_head;

        {
            let slot = self.slot_mut(handle);
            item::write_lru_prev(slot, LINK_NONE);
            item::write_lru_next(slot, old_head);
        }

        if old_head != LINK_NONE {
            item::write_lru_prev(self.link_slot_mut(class_id, old_head), packed);
        } else {
            self.classes[class_id as usize].lru_tail = packed;
        }
        self.classes[class_id as usize].lru_head = packed;
        self.classes[class_id as usize].item_count += 1;
        self.items += 1;
    }

    /// Unlink an item from wherever it sits in the list.
    fn lru_remove(&mut self, handle: ItemHandle) {
        let class_id = handle.class_id();
        let slot = self.slot(handle);
        let prev = item::read_lru_prev(slot);
        let next = item::read_lru_next(slot);

        if prev != LINK_NONE {
            item::write_lru_next(self.link_slot_mut(class_id, prev), next);
        } else {
            self.classes[class_id as usize].lru_head = next;
        }
        if next != LINK_NONE {
            item::write_lru_prev(self.link_slot_mut(class_id, next), prev);
        } else {
            self.classes[class_id as usize].lru_tail = prev;
        }

        let slot = self.slot_mut(handle);
        item::write_lru_prev(slot, LINK_NONE);
        item::write_lru_next(slot, LINK_NONE);

        self.classes[class_id as usize].item_count -= 1;
        self.items -= 1;
    }

    /// Move an item to the head on access.
    pub(crate) fn touch_lru(&mut self, handle: ItemHandle) {
        let class_id = handle.class_id();
        let packed = pack_slot_ref(handle.page_id(), handle.slot());
        if self.classes[class_id as usize].lru_head == packed {
            return;
        }

        let slot = self.slot(handle);
        let prev = item::read_lru_prev(slot);
        let next = item::read_lru_next(slot);

        // Unlink from the current position.
        if prev != LINK_NONE {
            item::write_lru_next(self.link_slot_mut(class_id, prev), next);
        }
        if next != LINK_NONE {
            item::write_lru_prev(self.link_slot_mut(class_id, next), prev);
        } else {
            self.classes[class_id as usize].lru_tail = prev;
        }

        // Relink at the head.
        let old_head = self.classes[class_id as usize].lru_head;
        {
            let slot = self.slot_mut(handle);
            item::write_lru_prev(slot, LINK_NONE);
            item::write_lru_next(slot, old_head);
        }
        if old_head != LINK_NONE {
            item::write_lru_prev(self.link_slot_mut(class_id, old_head), packed);
        }
        self.classes[class_id as usize].lru_head = packed;
    }

    /// Least-recently-used item of a class, if any.
    #[cfg(test)]
    fn lru_victim(&self, class_id: u8) -> Option<ItemHandle> {
        let tail = self.classes[class_id as usize].lru_tail;
        if tail == LINK_NONE {
            return None;
        }
        let (page, slot) = unpack_slot_ref(tail);
        Some(ItemHandle::new(class_id, page, slot))
    }
}

impl KeyVerifier for Arena {
    fn verify(&self, handle: ItemHandle, key: &[u8]) -> bool {
        self.key(handle) == key
    }
}
