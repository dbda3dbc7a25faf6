//! Software transactional memory over versioned [`Ref`]s.
//!
//! A transaction runs its body against a snapshot of every ref it reads.
//! Writes are buffered and published atomically under a single commit
//! point. Conflicts never surface to the caller: the attempt is discarded
//! and the body runs again with a fresh snapshot.
//!
//! ```
//! use lisp_stm::{Ref, sync};
//!
//! let from = Ref::new(100);
//! let to = Ref::new(0);
//! sync(|tx| {
//!     from.alter(tx, |v| v - 30)?;
//!     to.alter(tx, |v| v + 30)?;
//!     Ok(())
//! })
//! .unwrap();
//! assert_eq!(from.deref().unwrap() + to.deref().unwrap(), 100);
//! ```

mod config;
mod info;
mod point;
mod reference;
mod transaction;

use std::cell::Cell;

pub use config::{RefOptions, StmConfig, Validator};
pub use reference::{Ref, Watch};
pub use transaction::Transaction;

use crate::error::{StmError, TxResult};

thread_local! {
    static RUNNING: Cell<bool> = const { Cell::new(false) };
}

/// Marks this thread as inside a transaction until dropped.
struct Running;

impl Running {
    fn enter() -> Option<Self> {
        RUNNING.with(|r| (!r.replace(true)).then_some(Self))
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        RUNNING.with(|r| r.set(false));
    }
}

/// Returns `true` while this thread is executing a transaction body.
#[must_use]
pub fn is_running() -> bool {
    RUNNING.with(Cell::get)
}

/// Runs `body` in a transaction with the default [`StmConfig`].
///
/// Transactions compose through the [`Transaction`] handle: inside a body,
/// call [`Transaction::sync`] to run more work as part of the same attempt.
/// Calling this function again from inside a body does not join the running
/// transaction; it fails with [`StmError::NestedTransaction`].
///
/// # Errors
///
/// See [`sync_with`].
pub fn sync<R, F>(body: F) -> Result<R, StmError>
where
    F: FnMut(&mut Transaction<'_>) -> TxResult<R>,
{
    sync_with(&StmConfig::default(), body)
}

/// Runs `body` in a transaction, retrying until an attempt commits.
///
/// Watches and [`Transaction::after_commit`] actions run after the commit,
/// on this thread, once the transaction is over.
///
/// # Errors
///
/// - [`StmError::NestedTransaction`] if this thread is already inside a
///   transaction body; compose with [`Transaction::sync`] instead.
/// - [`StmError::RetryLimitExceeded`] after `config.retry_limit` attempts.
/// - Any non-retry error returned by the body or raised at commit, such as
///   [`StmError::Validation`].
pub fn sync_with<R, F>(config: &StmConfig, body: F) -> Result<R, StmError>
where
    F: FnMut(&mut Transaction<'_>) -> TxResult<R>,
{
    let (ret, deferred) = {
        let Some(_running) = Running::enter() else {
            return Err(StmError::NestedTransaction);
        };
        transaction::run(config, body)?
    };
    for f in deferred {
        f();
    }
    Ok(ret)
}
