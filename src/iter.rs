//! Iterator types for hash trie maps.

use std::slice;

use crate::node::{Node, Slot};

/// One level of the depth-first descent.
enum Frame<'a, K, V> {
    Slots(slice::Iter<'a, Slot<K, V>>),
    Children(slice::Iter<'a, Option<std::sync::Arc<Node<K, V>>>>),
    Entries(slice::Iter<'a, (K, V)>),
}

impl<'a, K, V> Frame<'a, K, V> {
    fn of(node: &'a Node<K, V>) -> Self {
        match node {
            Node::Bitmap { slots, .. } => Self::Slots(slots.iter()),
            Node::Array { children, .. } => Self::Children(children.iter()),
            Node::Collision { entries, .. } => Self::Entries(entries.iter()),
        }
    }
}

/// Lazy iterator over the entries of a [`PersistentMap`](crate::PersistentMap).
///
/// Yields `(None, value)` first when the map holds a value under the null
/// key, then every `(Some(key), value)` pair in trie order. Each call to
/// `seq()` starts a fresh cursor.
pub struct Seq<'a, K, V> {
    nil: Option<&'a V>,
    stack: Vec<Frame<'a, K, V>>,
    remaining: usize,
}

impl<'a, K, V> Seq<'a, K, V> {
    /// Creates a cursor positioned before the first entry.
    pub(crate) fn new(root: Option<&'a Node<K, V>>, nil: Option<&'a V>, count: usize) -> Self {
        let mut stack = Vec::with_capacity(8);
        if let Some(node) = root {
            stack.push(Frame::of(node));
        }
        Self {
            nil,
            stack,
            remaining: count,
        }
    }
}

impl<'a, K, V> Iterator for Seq<'a, K, V> {
    type Item = (Option<&'a K>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(v) = self.nil.take() {
            self.remaining -= 1;
            return Some((None, v));
        }
        loop {
            let descend: &'a Node<K, V> = match self.stack.last_mut()? {
                Frame::Slots(it) => match it.next() {
                    Some(Slot::Entry(k, v)) => {
                        self.remaining -= 1;
                        return Some((Some(k), v));
                    }
                    Some(Slot::Child(child)) => &**child,
                    None => {
                        self.stack.pop();
                        continue;
                    }
                },
                Frame::Children(it) => match it.next() {
                    Some(Some(child)) => &**child,
                    Some(None) => continue,
                    None => {
                        self.stack.pop();
                        continue;
                    }
                },
                Frame::Entries(it) => match it.next() {
                    Some((k, v)) => {
                        self.remaining -= 1;
                        return Some((Some(k), v));
                    }
                    None => {
                        self.stack.pop();
                        continue;
                    }
                },
            };
            self.stack.push(Frame::of(descend));
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Seq<'_, K, V> {}

impl<K, V> std::iter::FusedIterator for Seq<'_, K, V> {}
