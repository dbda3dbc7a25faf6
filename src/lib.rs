//! Software transactional memory and a persistent hash trie map.
//!
//! Two building blocks for sharing state between threads without locks in
//! user code:
//!
//! - [`Ref`]: a versioned cell updated only inside transactions run by
//!   [`sync`]. Transactions read a consistent snapshot, buffer their writes
//!   and commit them atomically; conflicts are resolved by retrying, with
//!   older transactions allowed to barge younger ones.
//! - [`PersistentMap`]: an immutable 32-way hash trie. Updates return a new
//!   map sharing every untouched subtree with the old one.
//!   [`TransientMap`] batches many updates in place and freezes the result.
//!
//! The two compose: a `Ref<PersistentMap<K, V>>` is a transactional map
//! whose snapshots cost one `Arc` clone.
//!
//! # Key properties
//!
//! - **Snapshot isolation**: reads inside a transaction never observe a
//!   concurrent commit
//! - **Bounded blocking**: every lock and latch wait is timed
//! - **Structural sharing**: `assoc`/`without` copy one root-to-leaf path
//! - **Zero `unsafe`**: enforced by `#![forbid(unsafe_code)]`
//!
//! # References
//!
//! - Bagwell, 2001, "Ideal Hash Trees"
//! - Hickey, 2008, "Clojure: Refs and Transactions"

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod fold;
pub mod hash;
pub mod iter;
pub mod node;
pub mod stm;
pub mod transient;

mod map;
mod ops;

#[cfg(test)]
mod tests;

pub use error::{MapError, StmError, TxError, TxResult};
#[cfg(feature = "rayon")]
pub use fold::Rayon;
pub use fold::{ForkJoin, Sequential};
pub use map::PersistentMap;
pub use stm::{Ref, RefOptions, StmConfig, Transaction, is_running, sync, sync_with};
pub use transient::TransientMap;
