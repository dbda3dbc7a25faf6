//! Transient (single-owner, in-place) builder over hash trie nodes.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use crate::error::MapError;
use crate::hash;
use crate::map::PersistentMap;
use crate::node::Node;
use crate::ops::{edit, get};

/// Capability that lets one transient mutate the nodes stamped with it.
///
/// Tokens compare by identity. A token is live until its transient is
/// finalized and belongs to the thread that created it.
#[derive(Clone)]
pub struct EditToken(Arc<Owner>);

struct Owner {
    thread: ThreadId,
    live: AtomicBool,
}

impl EditToken {
    fn new() -> Self {
        Self(Arc::new(Owner {
            thread: thread::current().id(),
            live: AtomicBool::new(true),
        }))
    }

    /// Returns `true` if both tokens are the same capability.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn check(&self) -> Result<(), MapError> {
        if !self.0.live.load(Ordering::Acquire) {
            return Err(MapError::TransientFinalized);
        }
        if self.0.thread != thread::current().id() {
            return Err(MapError::TransientNotOwner);
        }
        Ok(())
    }

    fn revoke(&self) {
        self.0.live.store(false, Ordering::Release);
    }
}

impl fmt::Debug for EditToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditToken")
            .field("thread", &self.0.thread)
            .field("live", &self.0.live.load(Ordering::Relaxed))
            .finish()
    }
}

/// Mutable builder over the nodes of a [`PersistentMap`].
///
/// Created by [`PersistentMap::as_transient`]. Nodes shared with the source
/// map are copied on first touch; nodes the builder created are mutated in
/// place. Every operation fails once [`persistent`](Self::persistent) has
/// been called or when used from another thread.
pub struct TransientMap<K, V> {
    edit: EditToken,
    root: Option<Arc<Node<K, V>>>,
    count: usize,
    nil: Option<V>,
}

impl<K, V> TransientMap<K, V> {
    pub(crate) fn new(root: Option<Arc<Node<K, V>>>, count: usize, nil: Option<V>) -> Self {
        Self {
            edit: EditToken::new(),
            root,
            count,
            nil,
        }
    }

    /// Returns the number of entries, including the null-key entry.
    ///
    /// # Errors
    ///
    /// Fails if the transient was finalized or is used off its owner thread.
    pub fn count(&self) -> Result<usize, MapError> {
        self.edit.check()?;
        Ok(self.count)
    }

    /// Finalizes the builder and returns an immutable map over its nodes.
    ///
    /// # Errors
    ///
    /// Fails if already finalized or called off the owner thread.
    pub fn persistent(&mut self) -> Result<PersistentMap<K, V>, MapError> {
        self.edit.check()?;
        Ok(self.freeze())
    }

    /// Finalizes a builder that is known to be live and owned by this
    /// thread.
    pub(crate) fn into_persistent(mut self) -> PersistentMap<K, V> {
        self.freeze()
    }

    fn freeze(&mut self) -> PersistentMap<K, V> {
        self.edit.revoke();
        PersistentMap::from_parts(
            self.root.take(),
            std::mem::take(&mut self.count),
            self.nil.take(),
        )
    }
}

impl<K: Hash + Eq, V> TransientMap<K, V> {
    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Fails if the transient was finalized or is used off its owner thread.
    pub fn val_at(&self, key: &K) -> Result<Option<&V>, MapError> {
        self.edit.check()?;
        Ok(self.lookup(key))
    }

    /// Returns `true` if `key` is present.
    ///
    /// # Errors
    ///
    /// Fails if the transient was finalized or is used off its owner thread.
    pub fn contains_key(&self, key: &K) -> Result<bool, MapError> {
        Ok(self.val_at(key)?.is_some())
    }

    fn lookup(&self, key: &K) -> Option<&V> {
        let root = self.root.as_deref()?;
        get::find(root, 0, hash::trie_hash(key), key).map(|(_, v)| v)
    }
}

impl<K, V> TransientMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + PartialEq,
{
    /// Associates `key` with `value` in place.
    ///
    /// # Errors
    ///
    /// Fails if the transient was finalized or is used off its owner thread.
    pub fn assoc(&mut self, key: K, value: V) -> Result<&mut Self, MapError> {
        self.edit.check()?;
        self.insert(key, value);
        Ok(self)
    }

    /// Associates without the ownership check, for builders that never
    /// leave the creating call.
    pub(crate) fn insert(&mut self, key: K, value: V) {
        if self.lookup(&key) == Some(&value) {
            return;
        }
        let hash = hash::trie_hash(&key);
        match &mut self.root {
            Some(root) => {
                if edit::assoc(root, &self.edit, 0, hash, key, value) {
                    self.count += 1;
                }
            }
            None => {
                let leaf = Node::single(0, hash, key, value, Some(self.edit.clone()));
                self.root = Some(Arc::new(leaf));
                self.count += 1;
            }
        }
    }

    /// Adds a `(key, value)` pair; same as [`assoc`](Self::assoc).
    ///
    /// # Errors
    ///
    /// Fails if the transient was finalized or is used off its owner thread.
    pub fn conj(&mut self, (key, value): (K, V)) -> Result<&mut Self, MapError> {
        self.assoc(key, value)
    }

    /// Removes `key` in place. Removing an absent key changes nothing.
    ///
    /// # Errors
    ///
    /// Fails if the transient was finalized or is used off its owner thread.
    pub fn without(&mut self, key: &K) -> Result<&mut Self, MapError> {
        self.edit.check()?;
        if self.lookup(key).is_none() {
            return Ok(self);
        }
        let hash = hash::trie_hash(key);
        if let Some(root) = &mut self.root {
            match edit::without(root, &self.edit, 0, hash, key) {
                edit::Removal::NotFound => {}
                edit::Removal::Removed { empty } => {
                    self.count -= 1;
                    if empty {
                        self.root = None;
                    }
                }
                edit::Removal::Collapsed(k, v) => {
                    self.count -= 1;
                    *root = Arc::new(Node::single(0, hash, k, v, Some(self.edit.clone())));
                }
            }
        }
        Ok(self)
    }

    /// Stores `value` under the null key.
    ///
    /// # Errors
    ///
    /// Fails if the transient was finalized or is used off its owner thread.
    pub fn assoc_nil(&mut self, value: V) -> Result<&mut Self, MapError> {
        self.edit.check()?;
        if self.nil.replace(value).is_none() {
            self.count += 1;
        }
        Ok(self)
    }

    /// Removes the null-key entry, if any.
    ///
    /// # Errors
    ///
    /// Fails if the transient was finalized or is used off its owner thread.
    pub fn without_nil(&mut self) -> Result<&mut Self, MapError> {
        self.edit.check()?;
        if self.nil.take().is_some() {
            self.count -= 1;
        }
        Ok(self)
    }
}

impl<K, V> fmt::Debug for TransientMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransientMap")
            .field("count", &self.count)
            .field("edit", &self.edit)
            .finish_non_exhaustive()
    }
}
