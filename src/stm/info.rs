//! Per-attempt transaction record shared with competing transactions.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Lifecycle of one transaction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Body executing.
    Running = 0,
    /// Commit phase entered; can no longer be barged.
    Committing = 1,
    /// Attempt abandoned, the loop will start over.
    Retry = 2,
    /// Killed by an older transaction.
    Killed = 3,
    /// Writes published.
    Committed = 4,
}

impl Status {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Committing,
            2 => Self::Retry,
            3 => Self::Killed,
            _ => Self::Committed,
        }
    }
}

/// Status, age and completion latch of an attempt.
///
/// A ref stamped with an `Info` is logically owned by that attempt for as
/// long as [`is_running`](Self::is_running) holds.
#[derive(Debug)]
pub struct Info {
    status: AtomicU8,
    start_point: u64,
    done: Mutex<bool>,
    latch: Condvar,
}

impl Info {
    pub fn new(start_point: u64) -> Self {
        Self {
            status: AtomicU8::new(Status::Running as u8),
            start_point,
            done: Mutex::new(false),
            latch: Condvar::new(),
        }
    }

    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    pub const fn start_point(&self) -> u64 {
        self.start_point
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status(), Status::Running | Status::Committing)
    }

    /// Atomically moves `from` to `to`; `false` if the status had moved on.
    pub fn transition(&self, from: Status, to: Status) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn set_status(&self, status: Status) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Opens the latch, waking everyone parked in [`wait`](Self::wait).
    pub fn count_down(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.latch.notify_all();
    }

    /// Parks until the latch opens or `timeout` elapses.
    ///
    /// Returns `true` if the latch opened.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.latch.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }
}
