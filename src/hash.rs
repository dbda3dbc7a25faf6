//! Key hashing and the additive map hash.
//!
//! Trie addressing consumes a 32-bit hash five bits at a time. The map-level
//! hash is `φ(S) = Σ f(k, v)` over all entries using wrapping arithmetic, so
//! it does not depend on iteration order.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// First mixing seed (golden ratio constant).
const SEED_1: u64 = 0x9E37_79B9_7F4A_7C15;

/// Second mixing seed (large prime).
const SEED_2: u64 = 0x517C_C1B7_2722_0A95;

/// Computes the 64-bit hash of a value using the standard hasher.
#[must_use]
pub fn hash_one<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Computes the 32-bit trie hash of a key.
///
/// Both halves of the 64-bit hash are folded in so no input bits are lost.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn trie_hash<T: Hash + ?Sized>(key: &T) -> u32 {
    let h = hash_one(key);
    (h ^ (h >> 32)) as u32
}

/// Computes the contribution of a single entry to the map hash.
///
/// `f(k, v) = key_hash · SEED₁ ⊕ value_hash · SEED₂`
#[must_use]
pub const fn entry_hash(key_hash: u64, value_hash: u64) -> u64 {
    key_hash.wrapping_mul(SEED_1) ^ value_hash.wrapping_mul(SEED_2)
}
