//! Lookup operation: traverses the trie to find a key.

use crate::node::{self, Node, Slot};

/// Searches for `key` in the subtree rooted at `node`.
///
/// Returns the stored key and value if found. Never allocates.
pub fn find<'a, K, V>(node: &'a Node<K, V>, shift: u32, hash: u32, key: &K) -> Option<(&'a K, &'a V)>
where
    K: Eq,
{
    match node {
        Node::Bitmap { bitmap, slots, .. } => {
            let bit = node::mask(node::fragment(hash, shift));
            if bitmap & bit == 0 {
                return None;
            }
            match &slots[node::index(*bitmap, bit)] {
                Slot::Entry(k, v) => (k == key).then_some((k, v)),
                Slot::Child(child) => find(child, shift + node::BITS_PER_LEVEL, hash, key),
            }
        }
        Node::Array { children, .. } => {
            let child = children[node::fragment(hash, shift) as usize].as_deref()?;
            find(child, shift + node::BITS_PER_LEVEL, hash, key)
        }
        Node::Collision {
            hash: node_hash,
            entries,
            ..
        } => {
            if hash != *node_hash {
                return None;
            }
            // Linear search through collision entries.
            entries.iter().find(|(k, _)| k == key).map(|(k, v)| (k, v))
        }
    }
}
