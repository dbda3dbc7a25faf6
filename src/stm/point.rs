//! Process-wide point clock.
//!
//! Read points and commit points come from one monotonic counter; every
//! snapshot and conflict decision compares values drawn from it.

use std::sync::atomic::{AtomicU64, Ordering};

static LAST_POINT: AtomicU64 = AtomicU64::new(0);

/// Issues the next point. Never returns 0, which marks initial values.
pub fn next() -> u64 {
    LAST_POINT.fetch_add(1, Ordering::AcqRel) + 1
}
