use std::sync::Arc;

use crate::PersistentMap;
use crate::node::{Node, Slot};

fn children<K, V>(node: &Node<K, V>) -> Vec<Arc<Node<K, V>>> {
    match node {
        Node::Bitmap { slots, .. } => slots
            .iter()
            .filter_map(|s| match s {
                Slot::Child(c) => Some(Arc::clone(c)),
                Slot::Entry(..) => None,
            })
            .collect(),
        Node::Array { children, .. } => children.iter().flatten().cloned().collect(),
        Node::Collision { .. } => Vec::new(),
    }
}

/// Old versions are unaffected by later updates.
#[test]
fn assoc_leaves_original_intact() {
    let m1: PersistentMap<_, _> = (0..100).map(|i| (i, i)).collect();
    let m2 = m1.assoc(5, 500).assoc(1000, 1000);

    assert_eq!(m1.count(), 100);
    assert_eq!(m1.val_at(&5), Some(&5));
    assert_eq!(m1.val_at(&1000), None);
    assert_eq!(m2.count(), 101);
    assert_eq!(m2.val_at(&5), Some(&500));
}

#[test]
fn without_leaves_original_intact() {
    let m1: PersistentMap<_, _> = (0..100).map(|i| (i, i)).collect();
    let m2 = m1.without(&50);
    assert!(m1.contains_key(&50));
    assert!(!m2.contains_key(&50));
    assert_eq!(m1.count(), m2.count() + 1);
}

/// Assoc of an equal value hands back the same root.
#[test]
fn assoc_same_value_is_identity() {
    let m1: PersistentMap<_, _> = (0..100).map(|i| (i, i.to_string())).collect();
    let m2 = m1.assoc(42, "42".to_string());
    assert!(m2.ptr_eq(&m1));
    let m3 = m1.assoc(42, "forty-two".to_string());
    assert!(!m3.ptr_eq(&m1));
    assert_ne!(m3, m1);
}

/// Subtrees off the updated path are shared by pointer.
#[test]
fn untouched_subtrees_are_shared() {
    let m1: PersistentMap<_, _> = (0..2000).map(|i| (i, i)).collect();
    let m2 = m1.assoc(7, -7);

    let before = children(m1.root_node().unwrap());
    let after = children(m2.root_node().unwrap());
    assert_eq!(before.len(), after.len());

    let shared = before
        .iter()
        .zip(&after)
        .filter(|(a, b)| Arc::ptr_eq(a, b))
        .count();
    // Exactly one child lies on the path to key 7.
    assert_eq!(shared, before.len() - 1);
}

/// Clones are O(1) and share the root.
#[test]
fn clone_shares_root() {
    let m1: PersistentMap<_, _> = (0..10).map(|i| (i, i)).collect();
    let m2 = m1.clone();
    assert!(m1.ptr_eq(&m2));
    assert!(Arc::ptr_eq(m1.root_node().unwrap(), m2.root_node().unwrap()));
}

/// A chain of versions each keeps its own view.
#[test]
fn version_chain() {
    let mut versions = vec![PersistentMap::new()];
    for i in 0..50 {
        let next = versions.last().unwrap().assoc(i, i * i);
        versions.push(next);
    }
    for (n, map) in versions.iter().enumerate() {
        assert_eq!(map.count(), n);
        for i in 0..n {
            assert_eq!(map.val_at(&i), Some(&(i * i)));
        }
    }
}

/// Assoc followed by without of a fresh key round-trips by content.
#[test]
fn assoc_then_without_round_trips() {
    let base: PersistentMap<_, _> = (0..300).map(|i| (i, i)).collect();
    let round = base.assoc(10_000, 0).without(&10_000);
    assert_eq!(round, base);
}

/// Maps are shareable across threads.
#[test]
fn read_from_many_threads() {
    let map: PersistentMap<_, _> = (0..1000_u64).map(|i| (i, i * 2)).collect();
    std::thread::scope(|s| {
        for t in 0..4_u64 {
            let map = &map;
            s.spawn(move || {
                for i in (t..1000).step_by(4) {
                    assert_eq!(map.val_at(&i), Some(&(i * 2)));
                }
            });
        }
    });
}
