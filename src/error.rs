//! Error types for cache operations.

use std::fmt;

/// Errors that can occur during cache operations.
///
/// Precondition failures (add on an existing key, replace on a missing key,
/// CAS version mismatch, and so on) are *not* errors - they are regular
/// counted outcomes returned by the corresponding command. Only conditions
/// that prevent a command from executing at all surface here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// No memory available to store the item.
    /// Only returned when eviction is disabled by configuration.
    OutOfMemory,

    /// The item (header + key + value) exceeds the largest size class,
    /// i.e. the configured page size. Not even an empty arena could hold it.
    ItemTooLarge,

    /// The key is longer than 250 bytes.
    KeyTooLong,

    /// The key is empty.
    EmptyKey,

    /// Arithmetic was requested on a value that does not parse as an
    /// unsigned base-10 integer.
    NotNumeric,

    /// The engine configuration failed validation. The payload names the
    /// violated constraint.
    InvalidConfig(&'static str),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::ItemTooLarge => write!(f, "item too large"),
            Self::KeyTooLong => write!(f, "key too long (max 250 bytes)"),
            Self::EmptyKey => write!(f, "key is empty"),
            Self::NotNumeric => write!(f, "value is not numeric"),
            Self::InvalidConfig(what) => write!(f, "invalid configuration: {what}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
