//! Persistent hash trie map.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{self, ControlFlow};
use std::sync::Arc;

use crate::error::MapError;
use crate::fold::ForkJoin;
use crate::hash;
use crate::iter::Seq;
use crate::node::Node;
use crate::ops::get::find;
use crate::ops::insert::assoc;
use crate::ops::reduce;
use crate::ops::remove::{RemoveOutcome, without};
use crate::transient::TransientMap;

/// Immutable hash map backed by a 32-way hash trie.
///
/// Updates return a new map that shares every untouched subtree with the
/// original. Cloning is O(1). The null key is kept out of band, next to the
/// trie root, and never enters the trie.
pub struct PersistentMap<K, V> {
    root: Option<Arc<Node<K, V>>>,
    count: usize,
    nil: Option<V>,
}

// ---------------------------------------------------------------------------
// Construction & accessors: no trait bounds
// ---------------------------------------------------------------------------

impl<K, V> PersistentMap<K, V> {
    /// Creates the empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root: None,
            count: 0,
            nil: None,
        }
    }

    pub(crate) const fn from_parts(root: Option<Arc<Node<K, V>>>, count: usize, nil: Option<V>) -> Self {
        Self { root, count, nil }
    }

    /// Returns the number of entries, counting the null-key entry.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Returns `true` if the map contains no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the value stored under the null key.
    #[must_use]
    pub const fn nil_value(&self) -> Option<&V> {
        self.nil.as_ref()
    }

    /// Returns `true` if the null key is present.
    #[must_use]
    pub const fn contains_nil(&self) -> bool {
        self.nil.is_some()
    }

    /// Returns `true` if both maps share the same trie root (or both have
    /// none) and the same count.
    ///
    /// Identity, not content: two equal maps built independently are not
    /// `ptr_eq`.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        let same_root = match (&self.root, &other.root) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_root && self.count == other.count
    }

    #[cfg(test)]
    pub(crate) fn root_node(&self) -> Option<&Arc<Node<K, V>>> {
        self.root.as_ref()
    }

    /// Returns a lazy cursor over all entries, null key first.
    #[must_use]
    pub fn seq(&self) -> Seq<'_, K, V> {
        Seq::new(self.root.as_deref(), self.nil.as_ref(), self.count)
    }

    /// Iterates over the keys stored in the trie (the null key is skipped).
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.seq().filter_map(|(k, _)| k)
    }

    /// Iterates over all values, the null-key value first.
    pub fn vals(&self) -> impl Iterator<Item = &V> {
        self.seq().map(|(_, v)| v)
    }

    /// Folds `f` over every entry without materializing a sequence.
    ///
    /// `f` returns `ControlFlow::Break` to stop early; the broken value is
    /// returned as the result.
    pub fn kv_reduce<R, F>(&self, init: R, mut f: F) -> R
    where
        F: FnMut(R, Option<&K>, &V) -> ControlFlow<R, R>,
    {
        let mut acc = init;
        if let Some(v) = &self.nil {
            acc = match f(acc, None, v) {
                ControlFlow::Continue(r) => r,
                ControlFlow::Break(r) => return r,
            };
        }
        match &self.root {
            Some(root) => match reduce::kv_reduce(&**root, acc, &mut f) {
                ControlFlow::Continue(r) | ControlFlow::Break(r) => r,
            },
            None => acc,
        }
    }
}

impl<K: Send + Sync, V: Send + Sync> PersistentMap<K, V> {
    /// Parallel reduce.
    ///
    /// When the root is an array node its children are split into halves
    /// recursively and reduced through `fj`; partial results (each seeded
    /// with `init()`) are merged with `combine`. The null-key entry is
    /// reduced separately and combined last.
    pub fn fold<R, FJ, I, F, C>(&self, fj: &FJ, init: I, reduce: F, combine: C) -> R
    where
        R: Send,
        FJ: ForkJoin,
        I: Fn() -> R + Sync,
        F: Fn(R, Option<&K>, &V) -> R + Sync,
        C: Fn(R, R) -> R + Sync,
    {
        let mut ret = match &self.root {
            Some(root) => reduce::fold(&**root, fj, &init, &reduce, &combine),
            None => init(),
        };
        if let Some(v) = &self.nil {
            ret = combine(ret, reduce(init(), None, v));
        }
        ret
    }
}

// ---------------------------------------------------------------------------
// Read operations: K: Hash + Eq
// ---------------------------------------------------------------------------

impl<K: Hash + Eq, V> PersistentMap<K, V> {
    /// Returns a reference to the value associated with `key`.
    #[must_use]
    pub fn val_at(&self, key: &K) -> Option<&V> {
        self.entry_at(key).map(|(_, v)| v)
    }

    /// Returns the value associated with `key`, or `not_found`.
    #[must_use]
    pub fn val_at_or<'a>(&'a self, key: &K, not_found: &'a V) -> &'a V {
        self.val_at(key).unwrap_or(not_found)
    }

    /// Returns the stored key and value for `key`.
    #[must_use]
    pub fn entry_at(&self, key: &K) -> Option<(&K, &V)> {
        let root = self.root.as_deref()?;
        find(root, 0, hash::trie_hash(key), key)
    }

    /// Returns `true` if the map contains the given key.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.entry_at(key).is_some()
    }
}

// ---------------------------------------------------------------------------
// Write operations: K: Hash + Eq + Clone, V: Clone + PartialEq
// ---------------------------------------------------------------------------

impl<K, V> PersistentMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + PartialEq,
{
    /// Returns a map with `key` associated to `value`.
    ///
    /// If `key` already maps to an equal value the result shares the same
    /// root as `self`.
    #[must_use]
    pub fn assoc(&self, key: K, value: V) -> Self {
        let hash = hash::trie_hash(&key);
        match &self.root {
            None => Self {
                root: Some(Arc::new(Node::single(0, hash, key, value, None))),
                count: self.count + 1,
                nil: self.nil.clone(),
            },
            Some(root) => match assoc(root, 0, hash, key, value) {
                None => self.clone(),
                Some(outcome) => Self {
                    root: Some(outcome.node),
                    count: self.count + usize::from(outcome.inserted),
                    nil: self.nil.clone(),
                },
            },
        }
    }

    /// Returns a map without `key`. Removing an absent key returns a map
    /// sharing the same root.
    #[must_use]
    pub fn without(&self, key: &K) -> Self {
        let Some(root) = &self.root else {
            return self.clone();
        };
        let hash = hash::trie_hash(key);
        let root = match without(root, 0, hash, key) {
            RemoveOutcome::NotFound => return self.clone(),
            RemoveOutcome::Removed(root) => root,
            RemoveOutcome::Collapsed(k, v) => Some(Arc::new(Node::single(0, hash, k, v, None))),
        };
        Self {
            root,
            count: self.count - 1,
            nil: self.nil.clone(),
        }
    }

    /// Returns a map with `value` stored under the null key.
    #[must_use]
    pub fn assoc_nil(&self, value: V) -> Self {
        if self.nil.as_ref() == Some(&value) {
            return self.clone();
        }
        Self {
            root: self.root.clone(),
            count: self.count + usize::from(self.nil.is_none()),
            nil: Some(value),
        }
    }

    /// Returns a map without the null-key entry.
    #[must_use]
    pub fn without_nil(&self) -> Self {
        if self.nil.is_none() {
            return self.clone();
        }
        Self {
            root: self.root.clone(),
            count: self.count - 1,
            nil: None,
        }
    }

    /// Starts a transient builder over this map's nodes.
    ///
    /// The map itself is left untouched.
    #[must_use]
    pub fn as_transient(&self) -> TransientMap<K, V> {
        TransientMap::new(self.root.clone(), self.count, self.nil.clone())
    }

    /// Builds a map from `pairs`, rejecting any key seen twice.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::DuplicateKey`] naming the first repeated key.
    pub fn create_with_check<I>(pairs: I) -> Result<Self, MapError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: fmt::Debug,
    {
        let mut t = Self::new().as_transient();
        for (k, v) in pairs {
            if t.contains_key(&k)? {
                return Err(MapError::DuplicateKey {
                    key: format!("{k:?}"),
                });
            }
            t.assoc(k, v)?;
        }
        t.persistent()
    }
}

// ---------------------------------------------------------------------------
// Trait impls
// ---------------------------------------------------------------------------

impl<K, V: Clone> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            count: self.count,
            nil: self.nil.clone(),
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.seq()).finish()
    }
}

impl<K: Hash + Eq, V: PartialEq> PartialEq for PersistentMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) && self.nil == other.nil {
            return true;
        }
        self.count == other.count
            && self.nil == other.nil
            && self
                .seq()
                .filter_map(|(k, v)| k.map(|k| (k, v)))
                .all(|(k, v)| other.val_at(k) == Some(v))
    }
}

impl<K: Hash + Eq, V: Eq> Eq for PersistentMap<K, V> {}

impl<K: Hash, V: Hash> Hash for PersistentMap<K, V> {
    /// Order-independent: sums per-entry contributions.
    fn hash<H: Hasher>(&self, state: &mut H) {
        let sum = self.seq().fold(0_u64, |acc, (k, v)| {
            let key_hash = k.map_or(0, hash::hash_one);
            acc.wrapping_add(hash::entry_hash(key_hash, hash::hash_one(v)))
        });
        self.count.hash(state);
        sum.hash(state);
    }
}

impl<K, V> FromIterator<(K, V)> for PersistentMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + PartialEq,
{
    /// Builds through a transient; later duplicates overwrite earlier ones.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut t = Self::new().as_transient();
        for (k, v) in iter {
            t.insert(k, v);
        }
        t.into_persistent()
    }
}

impl<K: Hash + Eq, V> ops::Index<&K> for PersistentMap<K, V> {
    type Output = V;

    fn index(&self, key: &K) -> &V {
        self.val_at(key).expect("key not found")
    }
}

impl<'a, K, V> IntoIterator for &'a PersistentMap<K, V> {
    type Item = (Option<&'a K>, &'a V);
    type IntoIter = Seq<'a, K, V>;

    fn into_iter(self) -> Seq<'a, K, V> {
        self.seq()
    }
}
