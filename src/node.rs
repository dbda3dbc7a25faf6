//! Hash trie node types and bitmap helpers.

use std::fmt;
use std::sync::Arc;

use crate::transient::EditToken;

/// Bits per trie level (5 → 32-way branching).
pub const BITS_PER_LEVEL: u32 = 5;

/// Number of slots in an array node.
pub const BRANCH_FACTOR: usize = 32;

/// A bitmap node holding this many slots grows into an array node on the
/// next insert into an empty position.
pub const EXPAND_THRESHOLD: usize = 16;

/// An array node with at most this many live children is packed back into a
/// bitmap node when one more child is removed.
pub const PACK_THRESHOLD: usize = 8;

/// One populated position of a bitmap node.
#[derive(Clone)]
pub enum Slot<K, V> {
    /// Inline key-value pair.
    Entry(K, V),
    /// Subtree one level down.
    Child(Arc<Node<K, V>>),
}

/// Hash trie node.
///
/// Every variant may carry the edit token of the transient that is allowed to
/// mutate it in place. Nodes reachable from a persistent map are never
/// mutated.
#[derive(Clone)]
pub enum Node<K, V> {
    /// Sparse node: one slot per set bit, packed in bit order.
    Bitmap {
        /// Owning transient, if any.
        edit: Option<EditToken>,
        /// Positions with a slot.
        bitmap: u32,
        /// Packed slots, `slots.len() == bitmap.count_ones()`.
        slots: Vec<Slot<K, V>>,
    },
    /// Dense node: 32 nullable children.
    Array {
        /// Owning transient, if any.
        edit: Option<EditToken>,
        /// Number of non-empty children.
        count: usize,
        /// Always `BRANCH_FACTOR` long.
        children: Vec<Option<Arc<Node<K, V>>>>,
    },
    /// Keys whose full 32-bit hashes are identical.
    ///
    /// Invariant: `entries.len() >= 2`.
    Collision {
        /// Owning transient, if any.
        edit: Option<EditToken>,
        /// The shared hash.
        hash: u32,
        /// Colliding entries in insertion order.
        entries: Vec<(K, V)>,
    },
}

// ---------------------------------------------------------------------------
// Bitmap helpers
// ---------------------------------------------------------------------------

/// Extracts the 5-bit hash fragment at the given bit-shift depth.
#[inline]
#[must_use]
pub const fn fragment(hash: u32, shift: u32) -> u32 {
    (hash >> shift) & 0x1F
}

/// Returns the single-bit mask for the given fragment (0..31).
#[inline]
#[must_use]
pub const fn mask(frag: u32) -> u32 {
    1 << frag
}

/// Returns the compact index of `bit` within `bitmap`.
///
/// Counts the number of set bits below `bit`.
#[inline]
#[must_use]
pub const fn index(bitmap: u32, bit: u32) -> usize {
    (bitmap & (bit - 1)).count_ones() as usize
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

impl<K, V> Node<K, V> {
    /// Bitmap node holding a single entry at the position `hash` selects.
    pub fn single(shift: u32, hash: u32, key: K, value: V, edit: Option<EditToken>) -> Self {
        Self::Bitmap {
            edit,
            bitmap: mask(fragment(hash, shift)),
            slots: vec![Slot::Entry(key, value)],
        }
    }

    /// Returns the edit token stamped on this node.
    #[must_use]
    pub const fn edit(&self) -> Option<&EditToken> {
        match self {
            Self::Bitmap { edit, .. } | Self::Array { edit, .. } | Self::Collision { edit, .. } => {
                edit.as_ref()
            }
        }
    }

    /// Replaces the edit token stamped on this node.
    pub fn set_edit(&mut self, token: Option<EditToken>) {
        match self {
            Self::Bitmap { edit, .. } | Self::Array { edit, .. } | Self::Collision { edit, .. } => {
                *edit = token;
            }
        }
    }

    /// Returns `true` if the transient holding `token` may mutate this node.
    #[must_use]
    pub fn is_owned_by(&self, token: &EditToken) -> bool {
        self.edit().is_some_and(|e| e.same(token))
    }

    /// Returns the inline entry of a bitmap node that holds exactly one
    /// entry and no children.
    #[must_use]
    pub fn sole_entry(&self) -> Option<(&K, &V)> {
        match self {
            Self::Bitmap { slots, .. } if slots.len() == 1 => match &slots[0] {
                Slot::Entry(k, v) => Some((k, v)),
                Slot::Child(_) => None,
            },
            _ => None,
        }
    }

    /// Number of entries stored in this subtree.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        match self {
            Self::Bitmap { slots, .. } => slots
                .iter()
                .map(|s| match s {
                    Slot::Entry(..) => 1,
                    Slot::Child(c) => c.entry_count(),
                })
                .sum(),
            Self::Array { children, .. } => children.iter().flatten().map(|c| c.entry_count()).sum(),
            Self::Collision { entries, .. } => entries.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Manual Debug to avoid false `K: Debug, V: Debug` bounds.
// ---------------------------------------------------------------------------

impl<K, V> fmt::Debug for Node<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bitmap { bitmap, slots, edit } => f
                .debug_struct("Bitmap")
                .field("bitmap", &format_args!("{bitmap:#034b}"))
                .field("slots", &slots.len())
                .field("transient", &edit.is_some())
                .finish(),
            Self::Array { count, edit, .. } => f
                .debug_struct("Array")
                .field("count", count)
                .field("transient", &edit.is_some())
                .finish(),
            Self::Collision { hash, entries, edit } => f
                .debug_struct("Collision")
                .field("hash", &format_args!("{hash:#010x}"))
                .field("entries", &entries.len())
                .field("transient", &edit.is_some())
                .finish(),
        }
    }
}
