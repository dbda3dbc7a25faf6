//! Versioned reference cells.

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::config::{DEFAULT_LOCK_WAIT, RefOptions, Validator};
use super::info::Info;
use super::transaction::Transaction;
use crate::error::{StmError, TxResult};

/// Callback run after a commit changed a watched ref.
///
/// Receives the watch key, the ref, the previous value (`None` when the ref
/// was unbound) and the new value.
pub type Watch<T> = Arc<dyn Fn(&str, &Ref<T>, Option<&T>, &T) + Send + Sync>;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Committed state of the refs this thread holds write-locked while it
    /// commits. Validators and commutes run under those locks and read
    /// from here.
    static HELD: RefCell<BTreeMap<u64, Box<dyn Any>>> = const { RefCell::new(BTreeMap::new()) };
}

struct Held<T> {
    newest: Option<T>,
    history_count: usize,
}

/// Records the committed state behind a write lock this thread just took.
pub(crate) fn hold<T: Clone + 'static>(id: u64, state: &RefState<T>) {
    let held = Held {
        newest: state.newest().cloned(),
        history_count: state.history_count(),
    };
    HELD.with(|h| h.borrow_mut().insert(id, Box::new(held)));
}

/// Forgets a write lock this thread is about to release.
pub(crate) fn unhold(id: u64) {
    HELD.with(|h| h.borrow_mut().remove(&id));
}

/// One committed value and the point it was committed at.
pub(crate) struct Version<T> {
    pub val: T,
    pub point: u64,
}

/// Lock-protected part of a ref: its version history, newest first, and the
/// attempt that currently owns it.
pub(crate) struct RefState<T> {
    history: VecDeque<Version<T>>,
    pub tinfo: Option<Arc<Info>>,
}

impl<T> RefState<T> {
    pub fn newest(&self) -> Option<&T> {
        self.history.front().map(|v| &v.val)
    }

    pub fn latest_point(&self) -> Option<u64> {
        self.history.front().map(|v| v.point)
    }

    /// Newest value committed at or before `read_point`.
    pub fn at_or_before(&self, read_point: u64) -> Option<&T> {
        self.history
            .iter()
            .find(|v| v.point <= read_point)
            .map(|v| &v.val)
    }

    pub fn is_unbound(&self) -> bool {
        self.history.is_empty()
    }

    fn history_count(&self) -> usize {
        self.history.len().saturating_sub(1)
    }
}

pub(crate) struct RefInner<T> {
    id: u64,
    state: Arc<RwLock<RefState<T>>>,
    faults: AtomicUsize,
    min_history: AtomicUsize,
    max_history: AtomicUsize,
    validator: RwLock<Option<Validator<T>>>,
    watches: Mutex<BTreeMap<String, Watch<T>>>,
}

/// Shared mutable cell whose updates go through transactions.
///
/// A `Ref` keeps a short history of committed values so that transactions
/// reading at an older point still find a consistent snapshot. The history
/// grows (up to [`max_history`](Self::max_history)) only after a reader has
/// faulted for lack of an old enough version.
///
/// Cloning yields another handle to the same cell. Equality, ordering and
/// hashing go by the cell's id.
pub struct Ref<T> {
    inner: Arc<RefInner<T>>,
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Ref<T> {
    /// Creates a ref holding `val` with default history bounds.
    #[must_use]
    pub fn new(val: T) -> Self {
        Self::build(Some(val), RefOptions::default())
    }

    /// Creates a ref with explicit history bounds and validator.
    ///
    /// # Errors
    ///
    /// [`StmError::Validation`] if the validator rejects `val`.
    pub fn with_options(val: T, options: RefOptions<T>) -> Result<Self, StmError> {
        let r = Self::build(None, options);
        r.validate(&val)?;
        r.inner.state.write().history.push_front(Version { val, point: 0 });
        Ok(r)
    }

    /// Creates a ref with no value. Reads fail with [`StmError::Unbound`]
    /// until a transaction sets it.
    #[must_use]
    pub fn unbound() -> Self {
        Self::build(None, RefOptions::default())
    }

    fn build(val: Option<T>, options: RefOptions<T>) -> Self {
        let history = val
            .into_iter()
            .map(|val| Version { val, point: 0 })
            .collect();
        Self {
            inner: Arc::new(RefInner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                state: Arc::new(RwLock::new(RefState {
                    history,
                    tinfo: None,
                })),
                faults: AtomicUsize::new(0),
                min_history: AtomicUsize::new(options.min_history),
                max_history: AtomicUsize::new(options.max_history),
                validator: RwLock::new(options.validator),
                watches: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Process-unique id; also the lock order among refs.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Reads the newest committed value outside any transaction.
    ///
    /// Safe to call from validators and commute functions, which run while
    /// the committing thread holds the ref's write lock.
    ///
    /// # Errors
    ///
    /// [`StmError::Unbound`] if nothing was ever committed;
    /// [`StmError::ReadTimeout`] if another thread's commit held the ref for
    /// longer than the default lock wait.
    #[allow(clippy::should_implement_trait)]
    pub fn deref(&self) -> Result<T, StmError> {
        self.committed(DEFAULT_LOCK_WAIT)
    }

    /// Newest committed value, waiting at most `wait` for a writer on
    /// another thread.
    pub(crate) fn committed(&self, wait: Duration) -> Result<T, StmError> {
        let newest = match self.held(|h| h.newest.clone()) {
            Some(newest) => newest,
            None => self
                .inner
                .state
                .try_read_recursive_for(wait)
                .ok_or(StmError::ReadTimeout { id: self.id() })?
                .newest()
                .cloned(),
        };
        newest.ok_or(StmError::Unbound { id: self.id() })
    }

    fn held<R>(&self, f: impl FnOnce(&Held<T>) -> R) -> Option<R> {
        HELD.with(|h| {
            h.borrow()
                .get(&self.id())
                .and_then(|b| b.downcast_ref::<Held<T>>())
                .map(f)
        })
    }

    // -----------------------------------------------------------------------
    // Transactional operations
    // -----------------------------------------------------------------------

    /// Reads the value as of the transaction's snapshot, or the value this
    /// transaction already wrote.
    ///
    /// # Errors
    ///
    /// `Retry` if the history no longer reaches back to the snapshot;
    /// [`StmError::Unbound`] for a ref with no value.
    pub fn get(&self, tx: &mut Transaction<'_>) -> TxResult<T> {
        tx.do_get(self)
    }

    /// Sets the in-transaction value and claims the ref for writing.
    ///
    /// # Errors
    ///
    /// [`StmError::SetAfterCommute`] if this transaction already commuted the
    /// ref; `Retry` on lock timeout or conflict.
    pub fn set(&self, tx: &mut Transaction<'_>, val: T) -> TxResult<()> {
        tx.do_set(self, val)
    }

    /// Sets the in-transaction value to `f(current)` and returns it.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get) and [`set`](Self::set).
    pub fn alter<F>(&self, tx: &mut Transaction<'_>, f: F) -> TxResult<T>
    where
        F: FnOnce(&T) -> T,
    {
        let current = tx.do_get(self)?;
        let next = f(&current);
        tx.do_set(self, next.clone())?;
        Ok(next)
    }

    /// Queues `f` to be applied to the newest value at commit time.
    ///
    /// Returns the provisional value seen by the rest of this attempt. `f`
    /// may run several times and must be free of side effects.
    ///
    /// # Errors
    ///
    /// `Retry` if the attempt was killed; [`StmError::Unbound`] for a ref
    /// with no value.
    pub fn commute<F>(&self, tx: &mut Transaction<'_>, f: F) -> TxResult<T>
    where
        F: Fn(&T) -> T + 'static,
    {
        tx.do_commute(self, Box::new(f))
    }

    /// Pins the ref against writes by other transactions until this one
    /// finishes, without claiming it for writing.
    ///
    /// # Errors
    ///
    /// `Retry` if the ref changed after the snapshot or another transaction
    /// owns it.
    pub fn ensure(&self, tx: &mut Transaction<'_>) -> TxResult<()> {
        tx.do_ensure(self)
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Old versions kept regardless of faults.
    #[must_use]
    pub fn min_history(&self) -> usize {
        self.inner.min_history.load(Ordering::Relaxed)
    }

    /// Cap on old versions kept after faults.
    #[must_use]
    pub fn max_history(&self) -> usize {
        self.inner.max_history.load(Ordering::Relaxed)
    }

    /// Sets the number of old versions kept regardless of faults.
    pub fn set_min_history(&self, n: usize) -> &Self {
        self.inner.min_history.store(n, Ordering::Relaxed);
        self
    }

    /// Sets the cap on old versions kept after faults.
    pub fn set_max_history(&self, n: usize) -> &Self {
        self.inner.max_history.store(n, Ordering::Relaxed);
        self
    }

    /// Number of old versions retained besides the newest one.
    #[must_use]
    pub fn history_count(&self) -> usize {
        self.held(|h| h.history_count)
            .unwrap_or_else(|| self.inner.state.read_recursive().history_count())
    }

    /// Snapshot reads that failed since the history last grew.
    #[must_use]
    pub fn faults(&self) -> usize {
        self.inner.faults.load(Ordering::Relaxed)
    }

    pub(crate) fn add_fault(&self) {
        self.inner.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn state(&self) -> &Arc<RwLock<RefState<T>>> {
        &self.inner.state
    }

    /// Installs `val` as the newest version. Caller holds the write lock.
    ///
    /// A new slot is added while readers have faulted and the history is
    /// below its cap, or while it is below the minimum; otherwise the oldest
    /// slot is recycled.
    pub(crate) fn set_value(&self, state: &mut RefState<T>, val: T, point: u64) {
        let hcount = state.history_count();
        let faulted = self.faults() > 0;
        if state.history.is_empty() {
            state.history.push_front(Version { val, point });
        } else if (faulted && hcount < self.max_history()) || hcount < self.min_history() {
            state.history.push_front(Version { val, point });
            self.inner.faults.store(0, Ordering::Relaxed);
            if faulted {
                debug!(ref_id = self.id(), history = hcount + 1, "history grown after fault");
            }
        } else {
            state.history.pop_back();
            state.history.push_front(Version { val, point });
        }
    }

    // -----------------------------------------------------------------------
    // Validator & watches
    // -----------------------------------------------------------------------

    /// Replaces the validator. The current value, if any, must pass the new
    /// one.
    ///
    /// # Errors
    ///
    /// [`StmError::Validation`] if the current value is rejected; the old
    /// validator stays in place.
    pub fn set_validator(&self, validator: Option<Validator<T>>) -> Result<(), StmError> {
        if let Some(f) = &validator
            && let Ok(current) = self.deref()
            && !f(&current)
        {
            return Err(StmError::Validation { id: self.id() });
        }
        *self.inner.validator.write() = validator;
        Ok(())
    }

    /// Current validator, if any.
    #[must_use]
    pub fn validator(&self) -> Option<Validator<T>> {
        self.inner.validator.read().clone()
    }

    pub(crate) fn validate(&self, val: &T) -> Result<(), StmError> {
        match self.validator() {
            Some(f) if !f(val) => Err(StmError::Validation { id: self.id() }),
            _ => Ok(()),
        }
    }

    /// Registers `f` under `key`, replacing any watch with the same key.
    pub fn add_watch<F>(&self, key: impl Into<String>, f: F) -> &Self
    where
        F: Fn(&str, &Self, Option<&T>, &T) + Send + Sync + 'static,
    {
        self.inner.watches.lock().insert(key.into(), Arc::new(f));
        self
    }

    /// Removes the watch under `key`. Returns `true` if one was registered.
    pub fn remove_watch(&self, key: &str) -> bool {
        self.inner.watches.lock().remove(key).is_some()
    }

    pub(crate) fn has_watches(&self) -> bool {
        !self.inner.watches.lock().is_empty()
    }

    pub(crate) fn notify_watches(&self, old: Option<&T>, new: &T) {
        let watches: Vec<(String, Watch<T>)> = self
            .inner
            .watches
            .lock()
            .iter()
            .map(|(k, w)| (k.clone(), Arc::clone(w)))
            .collect();
        for (key, watch) in watches {
            watch(&key, self, old, new);
        }
    }
}

// ---------------------------------------------------------------------------
// Identity-based trait impls
// ---------------------------------------------------------------------------

impl<T> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<T> Eq for Ref<T> {}

impl<T> PartialOrd for Ref<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Ref<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.inner.id.cmp(&other.inner.id)
    }
}

impl<T> Hash for Ref<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Ref");
        d.field("id", &self.inner.id);
        match self.inner.state.try_read_recursive() {
            Some(state) => d.field("val", &state.newest()),
            None => d.field("val", &format_args!("<locked>")),
        };
        d.finish()
    }
}
