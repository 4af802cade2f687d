//! Default key hashing.
//!
//! The engine takes a caller-computed 64-bit digest with every command so
//! the hash function stays pluggable. This module provides the default used
//! by callers that don't bring their own.

use std::hash::BuildHasher;

/// Hash a key with the crate's default hasher.
///
/// Uses fixed seeds so a key hashes to the same digest in every engine
/// instance and across restarts, which keeps hashes cacheable alongside
/// the keys that produced them.
#[inline]
pub fn hash_key(key: &[u8]) -> u64 {
    ahash::RandomState::with_seeds(
        0x4cf5_ad43_2745_937f,
        0x9e37_79b9_7f4a_7c15,
        0x85eb_ca6b_27d4_eb4f,
        0xc2b2_ae35_94d0_2135,
    )
    .hash_one(key)
}
