//! cachet: an embedded memcached-style cache engine.
//!
//! This crate provides the core of a key-value cache with memcached
//! semantics - set/get/add/replace/cas/delete/touch/incr/decr/append/
//! prepend/flush_all - over a fixed memory budget:
//!
//! - **Arena**: an owned, page-organized slab allocator with size classes
//!   and per-class LRU eviction; items live entirely inside arena slots
//!   addressed by opaque handles
//! - **Hash index**: separate-chaining table with incremental, cursor-based
//!   capacity doubling that never stalls a command
//! - **Engine**: the command layer, with lazy TTL expiration, CAS
//!   versioning, and exact per-command statistics
//! - **Statistics**: an explicit per-engine registry with reset and
//!   snapshot-with-gauges publishing
//!
//! Network framing, protocol parsing, and configuration loading belong to
//! the caller; keys arrive with a caller-computed digest so the hash
//! function stays pluggable ([`hash_key`] is the default).
//!
//! # Example
//!
//! ```
//! use cachet::{CacheEngine, EngineConfig, Payload, hash_key};
//!
//! let mut cache = CacheEngine::new(EngineConfig::default())?;
//!
//! cache.set(b"greeting", hash_key(b"greeting"), Payload::new(b"hello"))?;
//!
//! let view = cache.get(b"greeting", hash_key(b"greeting")).unwrap();
//! assert_eq!(view.value(), b"hello");
//! # Ok::<(), cachet::CacheError>(())
//! ```
//!
//! For multi-threaded use, [`SharedEngine`] wraps an engine behind a single
//! coarse mutex, one acquisition per command.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod arena;
mod clock;
mod config;
mod engine;
mod error;
mod handle;
mod hash;
mod index;
mod item;
mod numeric;
mod shared;
mod stats;

pub use clock::Ttl;
pub use config::{
    DEFAULT_GROWTH_FACTOR, DEFAULT_HASH_CAPACITY, DEFAULT_MEMORY_LIMIT, DEFAULT_MIN_SLOT_SIZE,
    DEFAULT_PAGE_SIZE, EngineConfig,
};
pub use engine::{CacheEngine, CasOutcome, ItemView, Payload};
pub use error::{CacheError, CacheResult};
pub use handle::ItemHandle;
pub use hash::hash_key;
pub use index::KeyVerifier;
pub use item::{MAX_KEY_LEN, MAX_VALUE_LEN};
pub use shared::{OwnedItem, SharedEngine};
pub use stats::{StatsRegistry, StatsSnapshot};
