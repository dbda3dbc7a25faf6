//! Error types for maps, transients and transactions.

use std::error::Error;

use thiserror::Error;

/// Errors raised by map construction and transient builders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    /// A checked constructor saw the same key twice.
    #[error("duplicate key: {key}")]
    DuplicateKey {
        /// Debug rendering of the offending key.
        key: String,
    },
    /// The transient was already turned into a persistent map.
    #[error("transient used after persistent() call")]
    TransientFinalized,
    /// The transient was touched from a thread other than its owner.
    #[error("transient used by non-owner thread")]
    TransientNotOwner,
}

/// Errors surfaced to the code that invoked a transaction.
#[derive(Debug, Error)]
pub enum StmError {
    /// A transactional operation was attempted with no running transaction.
    #[error("no transaction running")]
    NoTransaction,
    /// `set`/`alter` on a ref that already has a pending commute.
    #[error("can't set after commute")]
    SetAfterCommute,
    /// The ref has no committed value yet.
    #[error("ref {id} is unbound")]
    Unbound {
        /// Id of the unbound ref.
        id: u64,
    },
    /// A ref's validator rejected a proposed value.
    #[error("invalid reference state for ref {id}")]
    Validation {
        /// Id of the ref whose validator rejected the value.
        id: u64,
    },
    /// A read outside any transaction gave up waiting for a committing
    /// writer.
    #[error("timed out reading ref {id}")]
    ReadTimeout {
        /// Id of the ref being read.
        id: u64,
    },
    /// The attempt loop gave up.
    #[error("transaction failed after reaching retry limit ({attempts} attempts)")]
    RetryLimitExceeded {
        /// Number of attempts made.
        attempts: usize,
    },
    /// The transaction was killed outside its own retry loop.
    #[error("transaction aborted")]
    Aborted,
    /// A top-level transaction was started while this thread already runs one.
    #[error("transaction already running on this thread; use Transaction::sync to compose")]
    NestedTransaction,
    /// Application error raised by a transaction body.
    #[error(transparent)]
    Body(Box<dyn Error + Send + Sync>),
}

/// Control value propagated out of a transaction body.
#[derive(Debug, Error)]
pub enum TxError {
    /// The current attempt must be discarded and restarted.
    #[error("transaction retry")]
    Retry,
    /// The transaction fails with a caller-visible error.
    #[error(transparent)]
    Failed(#[from] StmError),
}

impl TxError {
    /// Wraps an application error so a body can fail the transaction with it.
    pub fn custom<E: Into<Box<dyn Error + Send + Sync>>>(err: E) -> Self {
        Self::Failed(StmError::Body(err.into()))
    }

    /// Returns `true` for the internal retry signal.
    #[must_use]
    pub const fn is_retry(&self) -> bool {
        matches!(self, Self::Retry)
    }
}

/// Result of an operation inside a transaction body.
pub type TxResult<T> = Result<T, TxError>;
