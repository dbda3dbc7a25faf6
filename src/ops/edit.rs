//! In-place mutation for transients.
//!
//! A node stamped with the builder's edit token is mutated directly; any
//! other node is cloned, stamped, and swapped into its parent first. Each
//! node is therefore copied at most once per transient.

use std::hash::Hash;
use std::sync::Arc;

use crate::node::{self, Node, Slot};
use crate::ops::insert;
use crate::ops::remove;
use crate::transient::EditToken;

/// Returns a mutable view of `node`, copying it first unless the transient
/// holding `edit` already owns it.
fn editable<'a, K: Clone, V: Clone>(
    node: &'a mut Arc<Node<K, V>>,
    edit: &EditToken,
) -> &'a mut Node<K, V> {
    if !node.is_owned_by(edit) {
        let mut copy = (**node).clone();
        copy.set_edit(Some(edit.clone()));
        *node = Arc::new(copy);
    }
    // Owned nodes are only reachable from the builder, so this never clones.
    Arc::make_mut(node)
}

/// Associates `key` with `value` under `node`, mutating owned nodes in place.
///
/// Returns `true` if a new key was added.
pub fn assoc<K, V>(
    node: &mut Arc<Node<K, V>>,
    edit: &EditToken,
    shift: u32,
    hash: u32,
    key: K,
    value: V,
) -> bool
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    let n = editable(node, edit);
    if matches!(n, Node::Bitmap { .. }) {
        return assoc_into_bitmap(n, edit, shift, hash, key, value);
    }
    let nested_hash = match n {
        Node::Bitmap { .. } => return false,
        Node::Array {
            count, children, ..
        } => {
            let frag = node::fragment(hash, shift) as usize;
            return match &mut children[frag] {
                Some(child) => assoc(child, edit, shift + node::BITS_PER_LEVEL, hash, key, value),
                empty @ None => {
                    let leaf = Node::single(
                        shift + node::BITS_PER_LEVEL,
                        hash,
                        key,
                        value,
                        Some(edit.clone()),
                    );
                    *empty = Some(Arc::new(leaf));
                    *count += 1;
                    true
                }
            };
        }
        Node::Collision {
            hash: node_hash,
            entries,
            ..
        } => {
            if hash == *node_hash {
                if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
                    slot.1 = value;
                    return false;
                }
                entries.push((key, value));
                return true;
            }
            *node_hash
        }
    };

    // Different hash: push the collision node one level down under a fresh
    // bitmap node and retry there.
    let collision = std::mem::replace(
        n,
        Node::Bitmap {
            edit: Some(edit.clone()),
            bitmap: node::mask(node::fragment(nested_hash, shift)),
            slots: Vec::with_capacity(2),
        },
    );
    if let Node::Bitmap { slots, .. } = n {
        slots.push(Slot::Child(Arc::new(collision)));
    }
    assoc(node, edit, shift, hash, key, value)
}

fn assoc_into_bitmap<K, V>(
    n: &mut Node<K, V>,
    edit: &EditToken,
    shift: u32,
    hash: u32,
    key: K,
    value: V,
) -> bool
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    let Node::Bitmap { bitmap, slots, .. } = n else {
        return false;
    };
    let bit = node::mask(node::fragment(hash, shift));
    let idx = node::index(*bitmap, bit);

    if *bitmap & bit == 0 {
        if slots.len() >= node::EXPAND_THRESHOLD {
            let grown = insert::expand(*bitmap, slots, shift, hash, key, value, Some(edit));
            *n = grown;
        } else {
            slots.insert(idx, Slot::Entry(key, value));
            *bitmap |= bit;
        }
        return true;
    }

    match &mut slots[idx] {
        Slot::Child(child) => assoc(child, edit, shift + node::BITS_PER_LEVEL, hash, key, value),
        Slot::Entry(k, v) if *k == key => {
            *v = value;
            false
        }
        slot @ Slot::Entry(..) => {
            let Slot::Entry(k, v) = &*slot else {
                return false;
            };
            let child = insert::create_node(
                shift + node::BITS_PER_LEVEL,
                k.clone(),
                v.clone(),
                hash,
                key,
                value,
                Some(edit),
            );
            *slot = Slot::Child(Arc::new(child));
            true
        }
    }
}

/// Outcome of an in-place remove.
#[derive(Debug)]
pub enum Removal<K, V> {
    /// Key was not found: nothing was copied or changed.
    NotFound,
    /// Key was removed; `empty` is `true` when the subtree is now empty.
    Removed {
        /// The parent should drop this branch.
        empty: bool,
    },
    /// A collision node shrank to one entry, which the parent takes over.
    Collapsed(K, V),
}

/// Removes `key` under `node`, mutating owned nodes in place.
///
/// Callers check membership first so a miss does not copy the path.
pub fn without<K, V>(
    node: &mut Arc<Node<K, V>>,
    edit: &EditToken,
    shift: u32,
    hash: u32,
    key: &K,
) -> Removal<K, V>
where
    K: Eq + Clone,
    V: Clone,
{
    let n = editable(node, edit);
    match n {
        Node::Bitmap { bitmap, slots, .. } => {
            let bit = node::mask(node::fragment(hash, shift));
            if *bitmap & bit == 0 {
                return Removal::NotFound;
            }
            let idx = node::index(*bitmap, bit);
            let drop_slot = match &mut slots[idx] {
                Slot::Entry(k, _) => {
                    if *k != *key {
                        return Removal::NotFound;
                    }
                    true
                }
                slot @ Slot::Child(_) => {
                    let Slot::Child(child) = slot else {
                        return Removal::NotFound;
                    };
                    match without(child, edit, shift + node::BITS_PER_LEVEL, hash, key) {
                        Removal::NotFound => return Removal::NotFound,
                        Removal::Removed { empty: true } => true,
                        Removal::Collapsed(k, v) => {
                            *slot = Slot::Entry(k, v);
                            false
                        }
                        Removal::Removed { empty: false } => {
                            let inlined = child
                                .sole_entry()
                                .map(|(k, v)| Slot::Entry(k.clone(), v.clone()));
                            if let Some(entry) = inlined {
                                *slot = entry;
                            }
                            false
                        }
                    }
                }
            };
            if drop_slot {
                slots.remove(idx);
                *bitmap ^= bit;
            }
            Removal::Removed {
                empty: *bitmap == 0,
            }
        }
        Node::Array {
            count, children, ..
        } => {
            let frag = node::fragment(hash, shift) as usize;
            let Some(child) = &mut children[frag] else {
                return Removal::NotFound;
            };
            let child_shift = shift + node::BITS_PER_LEVEL;
            match without(child, edit, child_shift, hash, key) {
                Removal::NotFound => Removal::NotFound,
                Removal::Removed { empty: false } => Removal::Removed { empty: false },
                Removal::Collapsed(k, v) => {
                    *child = Arc::new(Node::single(child_shift, hash, k, v, Some(edit.clone())));
                    Removal::Removed { empty: false }
                }
                Removal::Removed { empty: true } => {
                    if *count <= node::PACK_THRESHOLD {
                        let packed = remove::pack(children, frag, Some(edit.clone()));
                        return match packed {
                            Some(bitmap_node) => {
                                *n = bitmap_node;
                                Removal::Removed { empty: false }
                            }
                            None => Removal::Removed { empty: true },
                        };
                    }
                    children[frag] = None;
                    *count -= 1;
                    Removal::Removed { empty: false }
                }
            }
        }
        Node::Collision {
            hash: node_hash,
            entries,
            ..
        } => {
            let node_hash = *node_hash;
            if hash != node_hash {
                return Removal::NotFound;
            }
            let Some(i) = entries.iter().position(|(k, _)| k == key) else {
                return Removal::NotFound;
            };
            entries.remove(i);
            match entries.len() {
                0 => Removal::Removed { empty: true },
                1 => {
                    let (k, v) = entries.remove(0);
                    Removal::Collapsed(k, v)
                }
                _ => Removal::Removed { empty: false },
            }
        }
    }
}
