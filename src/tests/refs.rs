use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::{Ref, RefOptions, StmError, sync};

#[test]
fn deref_outside_transaction() {
    let r = Ref::new(5);
    assert_eq!(r.deref().unwrap(), 5);
}

#[test]
fn unbound_ref() {
    let r: Ref<i32> = Ref::unbound();
    assert!(matches!(r.deref(), Err(StmError::Unbound { id }) if id == r.id()));

    let err = sync(|tx| r.get(tx)).unwrap_err();
    assert!(matches!(err, StmError::Unbound { .. }));

    sync(|tx| r.set(tx, 3)).unwrap();
    assert_eq!(r.deref().unwrap(), 3);
}

#[test]
fn identity_semantics() {
    let a = Ref::new(1);
    let b = Ref::new(1);
    let a2 = a.clone();
    assert_eq!(a, a2);
    assert_ne!(a, b);
    assert!(a.id() < b.id());
    assert!(a < b);
}

#[test]
fn history_defaults() {
    let r = Ref::new(0);
    assert_eq!(r.min_history(), 0);
    assert_eq!(r.max_history(), 10);
    assert_eq!(r.history_count(), 0);
    assert_eq!(r.faults(), 0);
}

/// Without faults, each commit recycles the single slot.
#[test]
fn history_stays_flat_without_faults() {
    let r = Ref::new(0);
    for i in 1..=5 {
        sync(|tx| r.set(tx, i)).unwrap();
    }
    assert_eq!(r.deref().unwrap(), 5);
    assert_eq!(r.history_count(), 0);
}

/// `min_history` versions are kept regardless of faults.
#[test]
fn min_history_is_retained() {
    let r = Ref::with_options(0, RefOptions::builder().min_history(3).build()).unwrap();
    for i in 1..=10 {
        sync(|tx| r.set(tx, i)).unwrap();
    }
    assert_eq!(r.history_count(), 3);
}

#[test]
fn set_history_bounds() {
    let r = Ref::new(0);
    r.set_min_history(2).set_max_history(4);
    assert_eq!(r.min_history(), 2);
    assert_eq!(r.max_history(), 4);
    for i in 1..=10 {
        sync(|tx| r.set(tx, i)).unwrap();
    }
    assert_eq!(r.history_count(), 2);
}

/// A reader whose snapshot predates every retained version faults, and the
/// next commit grows the history.
#[test]
fn fault_grows_history() {
    let r = Ref::new(0);
    let attempts = AtomicUsize::new(0);

    let seen = sync(|tx| {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            // Commit from another thread after our read point was taken.
            std::thread::scope(|s| {
                s.spawn(|| sync(|tx2| r.set(tx2, 1)).unwrap());
            });
        }
        r.get(tx)
    })
    .unwrap();

    assert_eq!(seen, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(r.faults(), 1);

    sync(|tx| r.set(tx, 2)).unwrap();
    assert_eq!(r.history_count(), 1);
    assert_eq!(r.faults(), 0);
}

#[test]
fn with_options_validates_initial_value() {
    let positive = RefOptions::builder()
        .validator(Arc::new(|v: &i32| *v > 0) as crate::stm::Validator<i32>)
        .build();
    let err = Ref::with_options(-1, positive).unwrap_err();
    assert!(matches!(err, StmError::Validation { .. }));
}

#[test]
fn validator_rejects_commit() {
    let r = Ref::new(1);
    r.set_validator(Some(Arc::new(|v: &i32| *v > 0))).unwrap();

    let err = sync(|tx| r.set(tx, -5)).unwrap_err();
    assert!(matches!(err, StmError::Validation { id } if id == r.id()));
    assert_eq!(r.deref().unwrap(), 1);

    sync(|tx| r.set(tx, 7)).unwrap();
    assert_eq!(r.deref().unwrap(), 7);
}

#[test]
fn set_validator_checks_current_value() {
    let r = Ref::new(-1);
    let err = r.set_validator(Some(Arc::new(|v: &i32| *v >= 0))).unwrap_err();
    assert!(matches!(err, StmError::Validation { .. }));
    assert!(r.validator().is_none());

    r.set_validator(None).unwrap();
}

#[test]
fn watches_fire_after_commit() {
    let r = Ref::new(0);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&calls);
    r.add_watch("log", move |key, _, old, new| {
        log.lock().push((key.to_string(), old.copied(), *new));
    });

    sync(|tx| r.set(tx, 1)).unwrap();
    sync(|tx| r.alter(tx, |v| v + 1)).unwrap();

    assert_eq!(
        *calls.lock(),
        vec![
            ("log".to_string(), Some(0), 1),
            ("log".to_string(), Some(1), 2)
        ]
    );

    assert!(r.remove_watch("log"));
    assert!(!r.remove_watch("log"));
    sync(|tx| r.set(tx, 3)).unwrap();
    assert_eq!(calls.lock().len(), 2);
}

#[test]
fn watch_on_unbound_ref_sees_no_old_value() {
    let r: Ref<u8> = Ref::unbound();
    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);
    r.add_watch("w", move |_, _, old, new| {
        *slot.lock() = Some((old.copied(), *new));
    });
    sync(|tx| r.set(tx, 9)).unwrap();
    assert_eq!(*seen.lock(), Some((None, 9)));
}

#[test]
fn watches_skip_failed_commits() {
    let r = Ref::new(0);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    r.add_watch("count", move |_, _, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    r.set_validator(Some(Arc::new(|v: &i32| *v < 10))).unwrap();

    let _ = sync(|tx| r.set(tx, 100));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn ref_holding_a_map() {
    let r = Ref::new(crate::PersistentMap::new());
    sync(|tx| {
        r.alter(tx, |m| m.assoc("a", 1))?;
        r.alter(tx, |m| m.assoc("b", 2))
    })
    .unwrap();
    let snapshot = r.deref().unwrap();
    assert_eq!(snapshot.count(), 2);
    assert_eq!(snapshot.val_at(&"b"), Some(&2));
}
