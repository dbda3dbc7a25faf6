//! Insertion: path-copying assoc.
//!
//! Only the nodes on the root-to-leaf path are reallocated; every untouched
//! sibling subtree is shared by `Arc` with the source trie.

use std::sync::Arc;

use crate::hash;
use crate::node::{self, Node, Slot};
use crate::transient::EditToken;

/// Outcome of a recursive assoc that changed the trie.
pub struct InsertOutcome<K, V> {
    /// The new (path-copied) root of the modified subtree.
    pub node: Arc<Node<K, V>>,
    /// `true` if a new key was inserted, `false` if a value was replaced.
    pub inserted: bool,
}

/// Associates `key` with `value` in the subtree rooted at `node`.
///
/// Returns `None` when the key already maps to an equal value, so callers
/// can hand back the identical map.
pub fn assoc<K, V>(
    node: &Arc<Node<K, V>>,
    shift: u32,
    hash: u32,
    key: K,
    value: V,
) -> Option<InsertOutcome<K, V>>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone + PartialEq,
{
    match &**node {
        Node::Bitmap { bitmap, slots, .. } => {
            assoc_into_bitmap(*bitmap, slots, shift, hash, key, value)
        }
        Node::Array {
            count, children, ..
        } => assoc_into_array(*count, children, shift, hash, key, value),
        Node::Collision {
            hash: node_hash,
            entries,
            ..
        } => {
            if hash == *node_hash {
                return assoc_into_collision(*node_hash, entries, key, value);
            }
            // Different hash: nest the collision node under a bitmap node
            // at this level and retry there.
            let nested = Arc::new(Node::Bitmap {
                edit: None,
                bitmap: node::mask(node::fragment(*node_hash, shift)),
                slots: vec![Slot::Child(Arc::clone(node))],
            });
            assoc(&nested, shift, hash, key, value)
        }
    }
}

// ---------------------------------------------------------------------------
// Bitmap node insert
// ---------------------------------------------------------------------------

fn assoc_into_bitmap<K, V>(
    bitmap: u32,
    slots: &[Slot<K, V>],
    shift: u32,
    hash: u32,
    key: K,
    value: V,
) -> Option<InsertOutcome<K, V>>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone + PartialEq,
{
    let bit = node::mask(node::fragment(hash, shift));
    let idx = node::index(bitmap, bit);

    if bitmap & bit == 0 {
        let inserted = if slots.len() >= node::EXPAND_THRESHOLD {
            expand(bitmap, slots, shift, hash, key, value, None)
        } else {
            let mut new_slots = Vec::with_capacity(slots.len() + 1);
            new_slots.extend_from_slice(&slots[..idx]);
            new_slots.push(Slot::Entry(key, value));
            new_slots.extend_from_slice(&slots[idx..]);
            Node::Bitmap {
                edit: None,
                bitmap: bitmap | bit,
                slots: new_slots,
            }
        };
        return Some(InsertOutcome {
            node: Arc::new(inserted),
            inserted: true,
        });
    }

    let (replacement, inserted) = match &slots[idx] {
        Slot::Child(child) => {
            let outcome = assoc(child, shift + node::BITS_PER_LEVEL, hash, key, value)?;
            (Slot::Child(outcome.node), outcome.inserted)
        }
        Slot::Entry(k, v) if *k == key => {
            if *v == value {
                return None;
            }
            (Slot::Entry(key, value), false)
        }
        Slot::Entry(k, v) => {
            // Different key at same position → push both into a subtree.
            let child = create_node(
                shift + node::BITS_PER_LEVEL,
                k.clone(),
                v.clone(),
                hash,
                key,
                value,
                None,
            );
            (Slot::Child(Arc::new(child)), true)
        }
    };

    let mut new_slots = slots.to_vec();
    new_slots[idx] = replacement;
    Some(InsertOutcome {
        node: Arc::new(Node::Bitmap {
            edit: None,
            bitmap,
            slots: new_slots,
        }),
        inserted,
    })
}

// ---------------------------------------------------------------------------
// Array node insert
// ---------------------------------------------------------------------------

fn assoc_into_array<K, V>(
    count: usize,
    children: &[Option<Arc<Node<K, V>>>],
    shift: u32,
    hash: u32,
    key: K,
    value: V,
) -> Option<InsertOutcome<K, V>>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone + PartialEq,
{
    let frag = node::fragment(hash, shift) as usize;
    let (child, count, inserted) = match &children[frag] {
        None => {
            let leaf = Node::single(shift + node::BITS_PER_LEVEL, hash, key, value, None);
            (Arc::new(leaf), count + 1, true)
        }
        Some(child) => {
            let outcome = assoc(child, shift + node::BITS_PER_LEVEL, hash, key, value)?;
            (outcome.node, count, outcome.inserted)
        }
    };
    let mut new_children = children.to_vec();
    new_children[frag] = Some(child);
    Some(InsertOutcome {
        node: Arc::new(Node::Array {
            edit: None,
            count,
            children: new_children,
        }),
        inserted,
    })
}

// ---------------------------------------------------------------------------
// Collision node insert
// ---------------------------------------------------------------------------

fn assoc_into_collision<K, V>(
    node_hash: u32,
    entries: &[(K, V)],
    key: K,
    value: V,
) -> Option<InsertOutcome<K, V>>
where
    K: Eq + Clone,
    V: Clone + PartialEq,
{
    let mut new_entries = entries.to_vec();
    let inserted = match entries.iter().position(|(k, _)| *k == key) {
        Some(i) => {
            if entries[i].1 == value {
                return None;
            }
            new_entries[i].1 = value;
            false
        }
        None => {
            new_entries.push((key, value));
            true
        }
    };
    Some(InsertOutcome {
        node: Arc::new(Node::Collision {
            edit: None,
            hash: node_hash,
            entries: new_entries,
        }),
        inserted,
    })
}

// ---------------------------------------------------------------------------
// Shared builders (also used by the transient path)
// ---------------------------------------------------------------------------

/// Creates a subtree holding two entries that share a slot at the parent.
///
/// Keys with identical full hashes go into a collision node; otherwise the
/// subtree descends until their hash fragments differ.
pub fn create_node<K, V>(
    shift: u32,
    k1: K,
    v1: V,
    k2_hash: u32,
    k2: K,
    v2: V,
    edit: Option<&EditToken>,
) -> Node<K, V>
where
    K: std::hash::Hash,
{
    let k1_hash = hash::trie_hash(&k1);
    if k1_hash == k2_hash {
        return Node::Collision {
            edit: edit.cloned(),
            hash: k1_hash,
            entries: vec![(k1, v1), (k2, v2)],
        };
    }
    pair(shift, k1_hash, k1, v1, k2_hash, k2, v2, edit)
}

#[allow(clippy::too_many_arguments)]
fn pair<K, V>(
    shift: u32,
    h1: u32,
    k1: K,
    v1: V,
    h2: u32,
    k2: K,
    v2: V,
    edit: Option<&EditToken>,
) -> Node<K, V> {
    let f1 = node::fragment(h1, shift);
    let f2 = node::fragment(h2, shift);

    if f1 == f2 {
        let child = pair(shift + node::BITS_PER_LEVEL, h1, k1, v1, h2, k2, v2, edit);
        Node::Bitmap {
            edit: edit.cloned(),
            bitmap: node::mask(f1),
            slots: vec![Slot::Child(Arc::new(child))],
        }
    } else {
        let slots = if f1 < f2 {
            vec![Slot::Entry(k1, v1), Slot::Entry(k2, v2)]
        } else {
            vec![Slot::Entry(k2, v2), Slot::Entry(k1, v1)]
        };
        Node::Bitmap {
            edit: edit.cloned(),
            bitmap: node::mask(f1) | node::mask(f2),
            slots,
        }
    }
}

/// Re-expands a full bitmap node into an array node while inserting the new
/// entry at its fragment.
#[allow(clippy::too_many_arguments)]
pub fn expand<K, V>(
    bitmap: u32,
    slots: &[Slot<K, V>],
    shift: u32,
    hash: u32,
    key: K,
    value: V,
    edit: Option<&EditToken>,
) -> Node<K, V>
where
    K: std::hash::Hash + Clone,
    V: Clone,
{
    let next = shift + node::BITS_PER_LEVEL;
    let mut children: Vec<Option<Arc<Node<K, V>>>> = vec![None; node::BRANCH_FACTOR];
    children[node::fragment(hash, shift) as usize] =
        Some(Arc::new(Node::single(next, hash, key, value, edit.cloned())));

    let mut j = 0;
    for (i, child) in children.iter_mut().enumerate() {
        if bitmap & (1 << i) == 0 {
            continue;
        }
        *child = Some(match &slots[j] {
            Slot::Child(c) => Arc::clone(c),
            Slot::Entry(k, v) => Arc::new(Node::single(
                next,
                hash::trie_hash(k),
                k.clone(),
                v.clone(),
                edit.cloned(),
            )),
        });
        j += 1;
    }

    Node::Array {
        edit: edit.cloned(),
        count: slots.len() + 1,
        children,
    }
}
