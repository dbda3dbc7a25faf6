//! Removal: path-copying without, with pruning and repacking.

use std::sync::Arc;

use crate::node::{self, Node, Slot};

/// Outcome of a recursive remove.
pub enum RemoveOutcome<K, V> {
    /// Key was not found: tree unchanged.
    NotFound,
    /// Key was removed.
    ///
    /// Holds the new root of the modified subtree, or `None` if the subtree
    /// is now empty and the parent should drop the branch.
    Removed(Option<Arc<Node<K, V>>>),
    /// A collision node shrank to one entry.
    ///
    /// The parent takes the entry over: a bitmap parent inlines it, an
    /// array parent wraps it in a single-entry node one level down.
    Collapsed(K, V),
}

/// Removes `key` from the subtree rooted at `node` via path copying.
pub fn without<K, V>(node: &Node<K, V>, shift: u32, hash: u32, key: &K) -> RemoveOutcome<K, V>
where
    K: Eq + Clone,
    V: Clone,
{
    match node {
        Node::Bitmap { bitmap, slots, .. } => remove_from_bitmap(*bitmap, slots, shift, hash, key),
        Node::Array {
            count, children, ..
        } => remove_from_array(*count, children, shift, hash, key),
        Node::Collision {
            hash: node_hash,
            entries,
            ..
        } => remove_from_collision(*node_hash, entries, hash, key),
    }
}

// ---------------------------------------------------------------------------
// Bitmap node remove
// ---------------------------------------------------------------------------

fn remove_from_bitmap<K, V>(
    bitmap: u32,
    slots: &[Slot<K, V>],
    shift: u32,
    hash: u32,
    key: &K,
) -> RemoveOutcome<K, V>
where
    K: Eq + Clone,
    V: Clone,
{
    let bit = node::mask(node::fragment(hash, shift));
    if bitmap & bit == 0 {
        return RemoveOutcome::NotFound;
    }
    let idx = node::index(bitmap, bit);

    let replacement = match &slots[idx] {
        Slot::Entry(k, _) if k == key => None,
        Slot::Entry(..) => return RemoveOutcome::NotFound,
        Slot::Child(child) => match without(child, shift + node::BITS_PER_LEVEL, hash, key) {
            RemoveOutcome::NotFound => return RemoveOutcome::NotFound,
            RemoveOutcome::Removed(None) => None,
            RemoveOutcome::Removed(Some(new_child)) => Some(inline_or_keep(new_child)),
            RemoveOutcome::Collapsed(k, v) => Some(Slot::Entry(k, v)),
        },
    };

    if let Some(slot) = replacement {
        let mut new_slots = slots.to_vec();
        new_slots[idx] = slot;
        return RemoveOutcome::Removed(Some(Arc::new(Node::Bitmap {
            edit: None,
            bitmap,
            slots: new_slots,
        })));
    }

    // Slot becomes empty: prune it, or the whole node if it was the last.
    if bitmap == bit {
        return RemoveOutcome::Removed(None);
    }
    let mut new_slots = Vec::with_capacity(slots.len() - 1);
    new_slots.extend_from_slice(&slots[..idx]);
    new_slots.extend_from_slice(&slots[idx + 1..]);
    RemoveOutcome::Removed(Some(Arc::new(Node::Bitmap {
        edit: None,
        bitmap: bitmap ^ bit,
        slots: new_slots,
    })))
}

/// A child left holding exactly one entry and no subtrees is inlined back
/// into the parent's slot.
pub fn inline_or_keep<K: Clone, V: Clone>(child: Arc<Node<K, V>>) -> Slot<K, V> {
    match child.sole_entry() {
        Some((k, v)) => Slot::Entry(k.clone(), v.clone()),
        None => Slot::Child(child),
    }
}

// ---------------------------------------------------------------------------
// Array node remove
// ---------------------------------------------------------------------------

fn remove_from_array<K, V>(
    count: usize,
    children: &[Option<Arc<Node<K, V>>>],
    shift: u32,
    hash: u32,
    key: &K,
) -> RemoveOutcome<K, V>
where
    K: Eq + Clone,
    V: Clone,
{
    let frag = node::fragment(hash, shift) as usize;
    let Some(child) = &children[frag] else {
        return RemoveOutcome::NotFound;
    };

    let child_shift = shift + node::BITS_PER_LEVEL;
    let new_child = match without(child, child_shift, hash, key) {
        RemoveOutcome::NotFound => return RemoveOutcome::NotFound,
        RemoveOutcome::Removed(Some(new_child)) => new_child,
        RemoveOutcome::Collapsed(k, v) => Arc::new(Node::single(child_shift, hash, k, v, None)),
        RemoveOutcome::Removed(None) => {
            if count <= node::PACK_THRESHOLD {
                return RemoveOutcome::Removed(pack(children, frag, None).map(Arc::new));
            }
            let mut new_children = children.to_vec();
            new_children[frag] = None;
            return RemoveOutcome::Removed(Some(Arc::new(Node::Array {
                edit: None,
                count: count - 1,
                children: new_children,
            })));
        }
    };
    let mut new_children = children.to_vec();
    new_children[frag] = Some(new_child);
    RemoveOutcome::Removed(Some(Arc::new(Node::Array {
        edit: None,
        count,
        children: new_children,
    })))
}

/// Repacks the live children of an array node, minus the one at `skip`, into
/// a bitmap node. Returns `None` if nothing is left.
pub fn pack<K, V>(
    children: &[Option<Arc<Node<K, V>>>],
    skip: usize,
    edit: Option<crate::transient::EditToken>,
) -> Option<Node<K, V>> {
    let mut bitmap = 0_u32;
    let mut slots = Vec::with_capacity(node::PACK_THRESHOLD);
    for (i, child) in children.iter().enumerate() {
        if i == skip {
            continue;
        }
        if let Some(c) = child {
            bitmap |= 1 << i;
            slots.push(Slot::Child(Arc::clone(c)));
        }
    }
    (bitmap != 0).then_some(Node::Bitmap {
        edit,
        bitmap,
        slots,
    })
}

// ---------------------------------------------------------------------------
// Collision node remove
// ---------------------------------------------------------------------------

fn remove_from_collision<K, V>(
    node_hash: u32,
    entries: &[(K, V)],
    hash: u32,
    key: &K,
) -> RemoveOutcome<K, V>
where
    K: Eq + Clone,
    V: Clone,
{
    if hash != node_hash {
        return RemoveOutcome::NotFound;
    }
    let Some(i) = entries.iter().position(|(k, _)| k == key) else {
        return RemoveOutcome::NotFound;
    };

    match entries.len() {
        1 => RemoveOutcome::Removed(None),
        2 => {
            // A collision may sit below the last hash level, where no
            // fragment exists; hand the survivor to the parent instead.
            let (k, v) = &entries[1 - i];
            RemoveOutcome::Collapsed(k.clone(), v.clone())
        }
        _ => {
            let mut new_entries = entries.to_vec();
            new_entries.remove(i);
            RemoveOutcome::Removed(Some(Arc::new(Node::Collision {
                edit: None,
                hash: node_hash,
                entries: new_entries,
            })))
        }
    }
}
