//! Trie algorithms shared by persistent maps and transients.

pub mod edit;
pub mod get;
pub mod insert;
pub mod reduce;
pub mod remove;
