use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use crate::{Ref, RefOptions, StmConfig, StmError, TxError, is_running, sync, sync_with};

/// Runs `f` on its own thread and fails if it has not returned within five
/// seconds.
fn finishes<R: Send + 'static>(f: impl FnOnce() -> R + Send + 'static) -> R {
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = done_tx.send(f());
    });
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("blocked past the deadline")
}

fn quick() -> StmConfig {
    StmConfig::builder()
        .lock_wait(Duration::from_millis(20))
        .build()
}

#[test]
fn config_defaults() {
    let config = StmConfig::default();
    assert_eq!(config.retry_limit, 10_000);
    assert_eq!(config.lock_wait, Duration::from_millis(100));
    assert_eq!(config.barge_wait, Duration::from_millis(10));
}

#[test]
fn commit_publishes_all_writes() {
    let a = Ref::new(1);
    let b = Ref::new(2);
    let sum = sync(|tx| {
        let x = a.get(tx)?;
        let y = b.get(tx)?;
        a.set(tx, y)?;
        b.set(tx, x)?;
        Ok(x + y)
    })
    .unwrap();
    assert_eq!(sum, 3);
    assert_eq!(a.deref().unwrap(), 2);
    assert_eq!(b.deref().unwrap(), 1);
}

#[test]
fn reads_see_own_writes() {
    let r = Ref::new(0);
    let seen = sync(|tx| {
        r.set(tx, 10)?;
        r.alter(tx, |v| v * 2)?;
        r.get(tx)
    })
    .unwrap();
    assert_eq!(seen, 20);
}

#[test]
fn failed_body_discards_writes() {
    let r = Ref::new(0);
    let err = sync(|tx| -> Result<(), TxError> {
        r.set(tx, 99)?;
        Err(TxError::custom("boom"))
    })
    .unwrap_err();
    assert!(matches!(err, StmError::Body(_)));
    assert_eq!(err.to_string(), "boom");
    assert_eq!(r.deref().unwrap(), 0);
}

#[test]
fn abort_ends_transaction() {
    let r = Ref::new(0);
    let attempts = Cell::new(0);
    let err = sync(|tx| -> Result<(), TxError> {
        attempts.set(attempts.get() + 1);
        r.set(tx, 1)?;
        Err(tx.abort())
    })
    .unwrap_err();
    assert!(matches!(err, StmError::Aborted));
    assert_eq!(attempts.get(), 1);
    assert_eq!(r.deref().unwrap(), 0);
}

#[test]
fn retry_limit_exceeded() {
    let config = StmConfig::builder().retry_limit(3).build();
    let attempts = Cell::new(0);
    let err = sync_with(&config, |_| -> Result<(), TxError> {
        attempts.set(attempts.get() + 1);
        Err(TxError::Retry)
    })
    .unwrap_err();
    assert!(matches!(err, StmError::RetryLimitExceeded { attempts: 3 }));
    assert_eq!(attempts.get(), 3);
}

#[test]
fn set_after_commute_is_rejected() {
    let r = Ref::new(0);
    let err = sync(|tx| {
        r.commute(tx, |v| v + 1)?;
        r.set(tx, 5)
    })
    .unwrap_err();
    assert!(matches!(err, StmError::SetAfterCommute));
    assert_eq!(r.deref().unwrap(), 0);
}

#[test]
fn commute_returns_provisional_value() {
    let r = Ref::new(10);
    let provisional = sync(|tx| {
        r.commute(tx, |v| v + 1)?;
        r.commute(tx, |v| v * 2)
    })
    .unwrap();
    assert_eq!(provisional, 22);
    assert_eq!(r.deref().unwrap(), 22);
}

#[test]
fn commute_on_unbound_ref_fails() {
    let r: Ref<i32> = Ref::unbound();
    let err = sync(|tx| r.commute(tx, |v| v + 1)).unwrap_err();
    assert!(matches!(err, StmError::Unbound { .. }));
}

#[test]
fn nested_top_level_sync_is_rejected() {
    let inner_result = sync(|_| {
        assert!(is_running());
        Ok(matches!(sync(|_| Ok(())), Err(StmError::NestedTransaction)))
    })
    .unwrap();
    assert!(inner_result);
    assert!(!is_running());
}

#[test]
fn tx_sync_flattens_into_outer_attempt() {
    let a = Ref::new(0);
    let b = Ref::new(0);

    let err = sync(|tx| -> Result<(), TxError> {
        a.set(tx, 1)?;
        tx.sync(|tx| b.set(tx, 1))?;
        Err(TxError::custom("outer fails after inner"))
    })
    .unwrap_err();
    assert!(matches!(err, StmError::Body(_)));
    assert_eq!(a.deref().unwrap(), 0);
    assert_eq!(b.deref().unwrap(), 0);

    sync(|tx| {
        a.set(tx, 1)?;
        tx.sync(|tx| b.alter(tx, |v| v + 1))
    })
    .unwrap();
    assert_eq!(b.deref().unwrap(), 1);
}

#[test]
fn after_commit_runs_outside_transaction() {
    let r = Ref::new(0);
    let ran = std::rc::Rc::new(Cell::new(0));
    let flag = std::rc::Rc::clone(&ran);
    let follow_up = r.clone();
    sync(|tx| {
        r.set(tx, 1)?;
        let flag = std::rc::Rc::clone(&flag);
        let follow_up = follow_up.clone();
        tx.after_commit(move || {
            assert!(!is_running());
            sync(|tx| follow_up.alter(tx, |v| v + 1)).unwrap();
            flag.set(flag.get() + 1);
        });
        Ok(())
    })
    .unwrap();
    assert_eq!(ran.get(), 1);
    assert_eq!(r.deref().unwrap(), 2);
}

#[test]
fn after_commit_dropped_on_failure() {
    let ran = std::rc::Rc::new(Cell::new(false));
    let flag = std::rc::Rc::clone(&ran);
    let _ = sync(|tx| -> Result<(), TxError> {
        let flag = std::rc::Rc::clone(&flag);
        tx.after_commit(move || flag.set(true));
        Err(TxError::custom("no"))
    });
    assert!(!ran.get());
}

#[test]
fn ensure_then_set_same_ref() {
    let r = Ref::new(1);
    sync(|tx| {
        r.ensure(tx)?;
        r.ensure(tx)?;
        let v = r.get(tx)?;
        r.set(tx, v + 1)
    })
    .unwrap();
    assert_eq!(r.deref().unwrap(), 2);
}

/// Concurrent increments of two refs keep them equal, and every
/// transactional observer sees them equal.
#[test]
fn atomicity_under_contention() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 100;

    let a = Ref::new(0_usize);
    let b = Ref::new(0_usize);
    let validations = Arc::new(AtomicUsize::new(0));

    // Each ref may only ever be one step ahead of the other's committed
    // value; a half-applied increment would leave them two apart.
    for (this, other) in [(&a, &b), (&b, &a)] {
        let other = other.clone();
        let validations = Arc::clone(&validations);
        this.set_validator(Some(Arc::new(move |v: &usize| {
            validations.fetch_add(1, Ordering::SeqCst);
            other.deref().is_ok_and(|o| *v == o || *v == o + 1)
        })))
        .unwrap();
    }

    let done = AtomicBool::new(false);
    let mismatches = AtomicUsize::new(0);

    thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                let (x, y) = sync(|tx| Ok((a.get(tx)?, b.get(tx)?))).unwrap();
                if x != y {
                    mismatches.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    for _ in 0..ROUNDS {
                        sync(|tx| {
                            a.alter(tx, |v| v + 1)?;
                            b.alter(tx, |v| v + 1)
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
    });

    assert_eq!(a.deref().unwrap(), THREADS * ROUNDS);
    assert_eq!(b.deref().unwrap(), THREADS * ROUNDS);
    assert_eq!(mismatches.load(Ordering::SeqCst), 0);
    assert!(validations.load(Ordering::SeqCst) >= 2 * THREADS * ROUNDS);
}

/// Commuters never conflict with each other.
#[test]
fn commutes_do_not_retry_each_other() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 200;

    let counter = Ref::new(0_usize);
    let attempts = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    sync(|tx| {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        counter.commute(tx, |v| v + 1)
                    })
                    .unwrap();
                }
            });
        }
    });

    assert_eq!(counter.deref().unwrap(), THREADS * ROUNDS);
    assert_eq!(attempts.load(Ordering::SeqCst), THREADS * ROUNDS);
}

/// Repeated reads within one attempt agree even when another thread commits
/// in between.
#[test]
fn snapshot_isolation() {
    let r = Ref::with_options(0, RefOptions::builder().min_history(2).build()).unwrap();
    let attempts = AtomicUsize::new(0);

    let (first, second) = sync(|tx| {
        attempts.fetch_add(1, Ordering::SeqCst);
        let first = r.get(tx)?;
        thread::scope(|s| {
            s.spawn(|| sync(|tx2| r.alter(tx2, |v| v + 1)).unwrap());
        });
        let second = r.get(tx)?;
        Ok((first, second))
    })
    .unwrap();

    assert_eq!(first, second);
    assert_eq!(first, 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(r.deref().unwrap(), 1);
}

/// A newer commit to an ensured ref forces a retry.
#[test]
fn ensure_detects_newer_commit() {
    let r = Ref::new(0);
    let attempts = AtomicUsize::new(0);
    sync(|tx| {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            thread::scope(|s| {
                s.spawn(|| sync(|tx2| r.set(tx2, 5)).unwrap());
            });
        }
        r.ensure(tx)
    })
    .unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

/// A writer cannot claim a ref while another transaction has it ensured.
#[test]
fn ensure_blocks_writers() {
    let a = Ref::new(0);
    let config = quick();
    let reader_done = AtomicBool::new(false);
    let writer_saw_reader_done = AtomicBool::new(false);
    let ensured = Barrier::new(2);

    thread::scope(|s| {
        s.spawn(|| {
            let mut first = true;
            sync_with(&config, |tx| {
                a.ensure(tx)?;
                if first {
                    first = false;
                    ensured.wait();
                    thread::sleep(Duration::from_millis(150));
                }
                reader_done.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        });
        s.spawn(|| {
            ensured.wait();
            sync_with(&config, |tx| {
                a.set(tx, 1)?;
                writer_saw_reader_done.store(reader_done.load(Ordering::SeqCst), Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        });
    });

    assert!(writer_saw_reader_done.load(Ordering::SeqCst));
    assert_eq!(a.deref().unwrap(), 1);
}

/// An older transaction kills a younger one holding a ref it needs.
#[test]
fn older_transaction_barges_younger() {
    let r = Ref::new("initial");
    let old_started = Barrier::new(2);
    let young_stamped = Barrier::new(2);
    let old_attempts = AtomicUsize::new(0);
    let young_attempts = AtomicUsize::new(0);

    thread::scope(|s| {
        s.spawn(|| {
            sync(|tx| {
                if old_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    old_started.wait();
                    young_stamped.wait();
                    thread::sleep(Duration::from_millis(20));
                }
                r.set(tx, "old")
            })
            .unwrap();
        });
        s.spawn(|| {
            old_started.wait();
            sync(|tx| {
                r.set(tx, "young")?;
                if young_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    young_stamped.wait();
                    thread::sleep(Duration::from_millis(200));
                }
                Ok(())
            })
            .unwrap();
        });
    });

    assert_eq!(old_attempts.load(Ordering::SeqCst), 1);
    assert!(young_attempts.load(Ordering::SeqCst) >= 2);
    assert_eq!(r.deref().unwrap(), "young");
}

/// A younger transaction facing an older owner never waits much longer than
/// the lock wait per attempt.
#[test]
fn blocking_is_bounded() {
    let r = Ref::new(0);
    let config = quick();
    let stamped = Barrier::new(2);
    let longest_gap = parking_lot::Mutex::new(Duration::ZERO);

    thread::scope(|s| {
        s.spawn(|| {
            let mut first = true;
            sync_with(&config, |tx| {
                r.set(tx, 1)?;
                if first {
                    first = false;
                    stamped.wait();
                    thread::sleep(Duration::from_millis(400));
                }
                Ok(())
            })
            .unwrap();
        });
        s.spawn(|| {
            stamped.wait();
            let mut last = Instant::now();
            sync_with(&config, |tx| {
                let now = Instant::now();
                let mut longest = longest_gap.lock();
                *longest = (*longest).max(now - last);
                drop(longest);
                last = now;
                r.alter(tx, |v| v + 10)
            })
            .unwrap();
        });
    });

    assert_eq!(r.deref().unwrap(), 11);
    assert!(*longest_gap.lock() < Duration::from_millis(200));
}

/// A commute function may read the ref it updates; at commit it sees the
/// committed value rather than waiting on its own write lock.
#[test]
fn commute_reading_its_own_ref() {
    let total = finishes(|| {
        let r = Ref::new(1);
        let me = r.clone();
        let provisional = sync(|tx| {
            let me = me.clone();
            r.commute(tx, move |v| v + me.deref().unwrap_or(0))
        })
        .unwrap();
        (provisional, r.deref().unwrap())
    });
    assert_eq!(total, (2, 2));
}

/// Validators run under the commit locks and read the other refs' committed
/// values, not the ones being written.
#[test]
fn validator_reading_a_locked_ref() {
    let (outcome, a_after, limit_after) = finishes(|| {
        let limit = Ref::new(10);
        let a = Ref::new(0);
        let cap = limit.clone();
        a.set_validator(Some(Arc::new(move |v: &i32| {
            cap.deref().is_ok_and(|c| *v <= c)
        })))
        .unwrap();

        sync(|tx| {
            a.set(tx, 5)?;
            limit.set(tx, 20)
        })
        .unwrap();
        // 15 fits under the committed limit of 20, not the pending 12.
        sync(|tx| {
            a.set(tx, 15)?;
            limit.set(tx, 12)
        })
        .unwrap();
        let outcome = sync(|tx| {
            a.set(tx, 13)?;
            limit.set(tx, 100)
        });
        (outcome, a.deref().unwrap(), limit.deref().unwrap())
    });
    assert!(matches!(outcome, Err(StmError::Validation { .. })));
    assert_eq!(a_after, 15);
    assert_eq!(limit_after, 12);
}

/// After a commit the thread reads the freshly published values again.
#[test]
fn reads_after_commit_see_new_values() {
    let r = Ref::new(0);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let same = r.clone();
    let log = Arc::clone(&seen);
    r.set_validator(Some(Arc::new(move |_: &i32| {
        log.lock().push(same.deref().unwrap_or(-1));
        true
    })))
    .unwrap();

    for n in 1..=3 {
        sync(|tx| r.set(tx, n)).unwrap();
        assert_eq!(r.deref().unwrap(), n);
    }
    assert_eq!(r.history_count(), 0);
    // Initial check, then one per commit against the previous value.
    assert_eq!(*seen.lock(), vec![0, 0, 1, 2]);
}
