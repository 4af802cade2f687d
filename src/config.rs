//! Engine configuration and size-class table generation.
//!
//! The arena divides its heap into fixed-size pages and carves each page
//! into slots of a single size class. Classes are generated at construction
//! time from `min_slot_size` with a configurable growth factor, capped at
//! the page size (which is therefore the maximum item size).

use crate::error::{CacheError, CacheResult};

/// Default total memory budget (64MB).
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Default page size (4KB).
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default initial hash index capacity (buckets).
pub const DEFAULT_HASH_CAPACITY: usize = 1024;

/// Default smallest slot size (64 bytes).
pub const DEFAULT_MIN_SLOT_SIZE: usize = 64;

/// Default growth factor between adjacent size classes (~1.25x, the
/// classic memcached progression).
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.25;

/// Maximum number of size classes (6-bit class id in item handles).
pub const MAX_CLASSES: usize = 64;

/// Maximum number of pages (16-bit page reference in LRU links, with the
/// all-ones pattern reserved as the list sentinel).
pub const MAX_PAGES: usize = 65535;

/// Maximum number of slots per page (16-bit slot index).
pub const MAX_SLOTS_PER_PAGE: usize = 65536;

/// Construction parameters for a [`CacheEngine`](crate::CacheEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Total memory budget in bytes. Rounded down to a whole number of pages.
    pub memory_limit: usize,
    /// Page size in bytes. Must be a power of two. Also the maximum item
    /// size (header + key + value).
    pub page_size: usize,
    /// Initial hash index capacity. Must be a power of two.
    pub initial_hash_capacity: usize,
    /// Smallest slot size in bytes.
    pub min_slot_size: usize,
    /// Growth factor between adjacent size classes.
    pub growth_factor: f64,
    /// If false, allocations fail with `OutOfMemory` instead of evicting.
    pub evictions_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            initial_hash_capacity: DEFAULT_HASH_CAPACITY,
            min_slot_size: DEFAULT_MIN_SLOT_SIZE,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            evictions_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total memory budget in bytes.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Set the page size in bytes.
    pub fn with_page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Set the initial hash index capacity.
    pub fn with_initial_hash_capacity(mut self, buckets: usize) -> Self {
        self.initial_hash_capacity = buckets;
        self
    }

    /// Set the smallest slot size in bytes.
    pub fn with_min_slot_size(mut self, bytes: usize) -> Self {
        self.min_slot_size = bytes;
        self
    }

    /// Set the growth factor between adjacent size classes.
    pub fn with_growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = factor;
        self
    }

    /// Enable or disable eviction under memory pressure.
    pub fn with_evictions(mut self, enabled: bool) -> Self {
        self.evictions_enabled = enabled;
        self
    }

    /// Number of whole pages the budget covers.
    pub fn page_count(&self) -> usize {
        self.memory_limit / self.page_size
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CacheResult<()> {
        if !self.page_size.is_power_of_two() {
            return Err(CacheError::InvalidConfig("page_size must be a power of two"));
        }
        if self.min_slot_size < 64 {
            return Err(CacheError::InvalidConfig("min_slot_size must be at least 64"));
        }
        if self.page_size < self.min_slot_size {
            return Err(CacheError::InvalidConfig(
                "page_size must be at least min_slot_size",
            ));
        }
        if self.page_size > 16 * 1024 * 1024 {
            return Err(CacheError::InvalidConfig("page_size must be at most 16MB"));
        }
        if self.page_size / self.min_slot_size > MAX_SLOTS_PER_PAGE {
            return Err(CacheError::InvalidConfig(
                "page_size / min_slot_size exceeds 65536 slots per page",
            ));
        }
        if self.memory_limit < self.page_size {
            return Err(CacheError::InvalidConfig(
                "memory_limit smaller than one page",
            ));
        }
        if self.page_count() > MAX_PAGES {
            return Err(CacheError::InvalidConfig(
                "memory_limit / page_size exceeds 65535 pages",
            ));
        }
        if !self.initial_hash_capacity.is_power_of_two() || self.initial_hash_capacity < 4 {
            return Err(CacheError::InvalidConfig(
                "initial_hash_capacity must be a power of two >= 4",
            ));
        }
        if !(1.01..=4.0).contains(&self.growth_factor) {
            return Err(CacheError::InvalidConfig(
                "growth_factor must be in 1.01..=4.0",
            ));
        }
        Ok(())
    }
}

/// Round a size up to the next multiple of 8.
#[inline]
fn round8(size: usize) -> usize {
    (size + 7) & !7
}

/// Generated table of slot sizes, smallest first. The last class is always
/// exactly one page.
#[derive(Debug, Clone)]
pub(crate) struct SizeClasses {
    sizes: Vec<usize>,
}

impl SizeClasses {
    /// Generate the class table for a validated configuration.
    pub(crate) fn generate(config: &EngineConfig) -> CacheResult<Self> {
        let mut sizes = Vec::new();
        let mut size = round8(config.min_slot_size);

        while size < config.page_size {
            sizes.push(size);
            let grown = (size as f64 * config.growth_factor).ceil() as usize;
            size = round8(grown.max(size + 8));
        }
        sizes.push(config.page_size);

        if sizes.len() > MAX_CLASSES {
            return Err(CacheError::InvalidConfig(
                "too many size classes; raise growth_factor or min_slot_size",
            ));
        }
        Ok(Self { sizes })
    }

    /// Find the smallest class that fits an item of the given size.
    ///
    /// Returns `None` if the item is larger than a page.
    #[inline]
    pub(crate) fn select(&self, item_size: usize) -> Option<u8> {
        let idx = self.sizes.partition_point(|&s| s < item_size);
        if idx < self.sizes.len() {
            Some(idx as u8)
        } else {
            None
        }
    }

    /// Slot size for a class id.
    #[inline]
    pub(crate) fn slot_size(&self, class_id: u8) -> usize {
        self.sizes[class_id as usize]
    }

    /// Number of classes.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.sizes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory_limit, DEFAULT_MEMORY_LIMIT);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert!(config.evictions_enabled);
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_memory_limit(4 * 1024 * 1024)
            .with_page_size(4096)
            .with_initial_hash_capacity(16)
            .with_evictions(false);
        assert!(config.validate().is_ok());
        assert_eq!(config.page_count(), 1024);
        assert!(!config.evictions_enabled);
    }

    #[test]
    fn test_config_rejects_bad_page_size() {
        let config = EngineConfig::new().with_page_size(5000);
        assert!(matches!(
            config.validate(),
            Err(CacheError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_rejects_bad_hash_capacity() {
        let config = EngineConfig::new().with_initial_hash_capacity(24);
        assert!(config.validate().is_err());
        let config = EngineConfig::new().with_initial_hash_capacity(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_tiny_budget() {
        let config = EngineConfig::new()
            .with_memory_limit(1024)
            .with_page_size(4096);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_too_many_pages() {
        let config = EngineConfig::new()
            .with_memory_limit(1024 * 1024 * 1024)
            .with_page_size(4096);
        // 256K pages exceeds the 16-bit page reference space.
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_class_generation_defaults() {
        let config = EngineConfig::default();
        let classes = SizeClasses::generate(&config).unwrap();

        // First class is the minimum slot, last class fills a page.
        assert_eq!(classes.slot_size(0), 64);
        assert_eq!(classes.slot_size((classes.len() - 1) as u8), 4096);
        assert!(classes.len() <= MAX_CLASSES);

        // Sizes are strictly increasing multiples of 8.
        for i in 0..classes.len() {
            let size = classes.slot_size(i as u8);
            assert_eq!(size % 8, 0);
            if i > 0 {
                assert!(size > classes.slot_size((i - 1) as u8));
            }
        }
    }

    #[test]
    fn test_class_growth_ratio() {
        let config = EngineConfig::default();
        let classes = SizeClasses::generate(&config).unwrap();

        // Apart from rounding at the small end and the page-size cap at the
        // large end, adjacent classes grow by roughly the configured factor.
        for i in 1..classes.len() - 1 {
            let ratio = classes.slot_size(i as u8) as f64 / classes.slot_size((i - 1) as u8) as f64;
            assert!(
                (1.0..=1.5).contains(&ratio),
                "class {} ratio {:.3} out of range",
                i,
                ratio
            );
        }
    }

    #[test]
    fn test_select_class() {
        let config = EngineConfig::default();
        let classes = SizeClasses::generate(&config).unwrap();

        assert_eq!(classes.select(1), Some(0));
        assert_eq!(classes.select(64), Some(0));
        assert_eq!(classes.select(65), Some(1));
        assert_eq!(classes.select(4096), Some((classes.len() - 1) as u8));
        assert_eq!(classes.select(4097), None);
    }

    #[test]
    fn test_select_class_exact_boundaries() {
        let config = EngineConfig::default();
        let classes = SizeClasses::generate(&config).unwrap();

        for i in 0..classes.len() {
            let size = classes.slot_size(i as u8);
            assert_eq!(classes.select(size), Some(i as u8));
        }
    }
}
