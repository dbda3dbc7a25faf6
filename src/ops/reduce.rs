//! Reductions over trie nodes: sequential `kv_reduce` and fork/join `fold`.

use std::ops::ControlFlow;

use crate::fold::ForkJoin;
use crate::node::{Node, Slot};

/// Folds `f` over every entry under `node` in trie order.
///
/// `ControlFlow::Break` stops the walk immediately and is propagated up.
pub fn kv_reduce<K, V, R, F>(node: &Node<K, V>, acc: R, f: &mut F) -> ControlFlow<R, R>
where
    F: FnMut(R, Option<&K>, &V) -> ControlFlow<R, R>,
{
    let mut acc = acc;
    match node {
        Node::Bitmap { slots, .. } => {
            for slot in slots {
                acc = match slot {
                    Slot::Entry(k, v) => f(acc, Some(k), v)?,
                    Slot::Child(child) => kv_reduce(&**child, acc, f)?,
                };
            }
        }
        Node::Array { children, .. } => {
            for child in children.iter().flatten() {
                acc = kv_reduce(&**child, acc, f)?;
            }
        }
        Node::Collision { entries, .. } => {
            for (k, v) in entries {
                acc = f(acc, Some(k), v)?;
            }
        }
    }
    ControlFlow::Continue(acc)
}

/// Reduces the subtree under `node`, splitting array nodes into halves that
/// run through `fj` and merging partial results with `combine`.
///
/// Each leaf task starts from a fresh `init()` seed.
pub fn fold<K, V, R, FJ, I, F, C>(node: &Node<K, V>, fj: &FJ, init: &I, reduce: &F, combine: &C) -> R
where
    K: Send + Sync,
    V: Send + Sync,
    R: Send,
    FJ: ForkJoin,
    I: Fn() -> R + Sync,
    F: Fn(R, Option<&K>, &V) -> R + Sync,
    C: Fn(R, R) -> R + Sync,
{
    match node {
        Node::Array { children, .. } => {
            let tasks: Vec<&Node<K, V>> = children.iter().flatten().map(AsRef::as_ref).collect();
            fold_tasks(&tasks, fj, init, reduce, combine)
        }
        _ => {
            let mut step = |acc, k: Option<&K>, v: &V| ControlFlow::<R, R>::Continue(reduce(acc, k, v));
            match kv_reduce(node, init(), &mut step) {
                ControlFlow::Continue(r) | ControlFlow::Break(r) => r,
            }
        }
    }
}

fn fold_tasks<K, V, R, FJ, I, F, C>(
    tasks: &[&Node<K, V>],
    fj: &FJ,
    init: &I,
    reduce: &F,
    combine: &C,
) -> R
where
    K: Send + Sync,
    V: Send + Sync,
    R: Send,
    FJ: ForkJoin,
    I: Fn() -> R + Sync,
    F: Fn(R, Option<&K>, &V) -> R + Sync,
    C: Fn(R, R) -> R + Sync,
{
    match tasks {
        [] => init(),
        [single] => fold(*single, fj, init, reduce, combine),
        _ => {
            let (left, right) = tasks.split_at(tasks.len() / 2);
            let (a, b) = fj.join(
                || fold_tasks(left, fj, init, reduce, combine),
                || fold_tasks(right, fj, init, reduce, combine),
            );
            combine(a, b)
        }
    }
}
