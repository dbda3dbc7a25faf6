//! Locking transaction: per-attempt log, lock protocol and commit.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock};
use tracing::{debug, trace, warn};

use super::config::StmConfig;
use super::info::{Info, Status};
use super::point;
use super::reference::{self, Ref, RefState};
use crate::error::{StmError, TxError, TxResult};

type ReadGuard<T> = ArcRwLockReadGuard<RawRwLock, RefState<T>>;
type WriteGuard<T> = ArcRwLockWriteGuard<RawRwLock, RefState<T>>;
type CommuteFn<T> = Box<dyn Fn(&T) -> T>;

/// Side effect deferred until after a successful commit.
pub(crate) type Deferred = Box<dyn FnOnce()>;

/// Commit-phase write lock. While it lives, reads of the ref from this
/// thread are answered from the state it guards.
struct Locked<T> {
    id: u64,
    guard: WriteGuard<T>,
}

impl<T: Clone + 'static> Locked<T> {
    fn new(id: u64, guard: WriteGuard<T>) -> Self {
        reference::hold(id, &*guard);
        Self { id, guard }
    }
}

impl<T> Deref for Locked<T> {
    type Target = RefState<T>;

    fn deref(&self) -> &RefState<T> {
        &self.guard
    }
}

impl<T> DerefMut for Locked<T> {
    fn deref_mut(&mut self) -> &mut RefState<T> {
        &mut self.guard
    }
}

impl<T> Drop for Locked<T> {
    fn drop(&mut self) {
        reference::unhold(self.id);
    }
}

// ---------------------------------------------------------------------------
// Per-ref log entry
// ---------------------------------------------------------------------------

/// Everything one attempt did to one ref.
struct Pending<T> {
    r: Ref<T>,
    /// Value to publish; present once the ref was set or commuted.
    val: Option<T>,
    set: bool,
    commutes: Vec<CommuteFn<T>>,
    ensured: Option<ReadGuard<T>>,
    locked: Option<Locked<T>>,
}

impl<T> Pending<T> {
    const fn new(r: Ref<T>) -> Self {
        Self {
            r,
            val: None,
            set: false,
            commutes: Vec::new(),
            ensured: None,
            locked: None,
        }
    }
}

/// Type-erased view of a [`Pending`] used by the commit phase.
trait LogEntry {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn is_set(&self) -> bool;
    fn has_commutes(&self) -> bool;
    fn is_ensured(&self) -> bool;
    fn release_ensure(&mut self);
    /// Takes the write lock for the commit phase.
    fn acquire(&mut self, wait: Duration) -> bool;
    /// Attempt stamped on the ref; requires the write lock.
    fn owner(&self) -> Option<Arc<Info>>;
    /// Point of the newest version; requires the write lock.
    fn latest_point(&self) -> Option<u64>;
    /// Replays queued commutes against the newest value.
    fn recompute(&mut self) -> TxResult<()>;
    fn validate(&self) -> Result<(), StmError>;
    /// Installs the buffered value and returns the watch notification.
    fn publish(&mut self, commit_point: u64) -> Option<Deferred>;
    fn release(&mut self);
}

impl<T: Clone + Send + Sync + 'static> LogEntry for Pending<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn is_set(&self) -> bool {
        self.set
    }

    fn has_commutes(&self) -> bool {
        !self.commutes.is_empty()
    }

    fn is_ensured(&self) -> bool {
        self.ensured.is_some()
    }

    fn release_ensure(&mut self) {
        self.ensured = None;
    }

    fn acquire(&mut self, wait: Duration) -> bool {
        match self.r.state().try_write_arc_for(wait) {
            Some(guard) => {
                self.locked = Some(Locked::new(self.r.id(), guard));
                true
            }
            None => false,
        }
    }

    fn owner(&self) -> Option<Arc<Info>> {
        self.locked.as_ref().and_then(|g| g.tinfo.clone())
    }

    fn latest_point(&self) -> Option<u64> {
        self.locked.as_ref().and_then(|g| g.latest_point())
    }

    fn recompute(&mut self) -> TxResult<()> {
        let guard = self.locked.as_ref().ok_or(TxError::Retry)?;
        let mut val = guard
            .newest()
            .cloned()
            .ok_or(StmError::Unbound { id: self.r.id() })?;
        for f in &self.commutes {
            val = f(&val);
        }
        trace!(ref_id = self.r.id(), commutes = self.commutes.len(), "commutes recomputed");
        self.val = Some(val);
        Ok(())
    }

    fn validate(&self) -> Result<(), StmError> {
        self.val.as_ref().map_or(Ok(()), |v| self.r.validate(v))
    }

    fn publish(&mut self, commit_point: u64) -> Option<Deferred> {
        let val = self.val.clone()?;
        let guard = self.locked.as_mut()?;
        let watched = self.r.has_watches();
        let old = if watched { guard.newest().cloned() } else { None };
        self.r.set_value(&mut **guard, val.clone(), commit_point);
        if !watched {
            return None;
        }
        let r = self.r.clone();
        Some(Box::new(move || r.notify_watches(old.as_ref(), &val)))
    }

    fn release(&mut self) {
        self.locked = None;
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Handle to the running attempt, passed to every transactional ref
/// operation.
///
/// Reads see a snapshot taken at the attempt's read point. Writes are
/// buffered and become visible atomically at commit. Any operation may
/// return [`TxError::Retry`]; bodies propagate it with `?` and the attempt
/// loop starts over.
pub struct Transaction<'cfg> {
    config: &'cfg StmConfig,
    info: Option<Arc<Info>>,
    read_point: u64,
    start_point: u64,
    start_time: Instant,
    log: BTreeMap<u64, Box<dyn LogEntry>>,
    /// Write-locked ref ids in acquisition order.
    locked: Vec<u64>,
    notifications: Vec<Deferred>,
    actions: Vec<Deferred>,
}

impl<'cfg> Transaction<'cfg> {
    fn new(config: &'cfg StmConfig) -> Self {
        Self {
            config,
            info: None,
            read_point: 0,
            start_point: 0,
            start_time: Instant::now(),
            log: BTreeMap::new(),
            locked: Vec::new(),
            notifications: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Point this attempt reads at.
    #[must_use]
    pub const fn read_point(&self) -> u64 {
        self.read_point
    }

    /// Read point of the first attempt; the transaction's age for barging.
    #[must_use]
    pub const fn start_point(&self) -> u64 {
        self.start_point
    }

    /// Runs `inner` as part of this transaction.
    ///
    /// Nested work shares the enclosing attempt: its writes commit or retry
    /// together with the outer body.
    ///
    /// # Errors
    ///
    /// Whatever `inner` returns.
    pub fn sync<R, F>(&mut self, inner: F) -> TxResult<R>
    where
        F: FnOnce(&mut Self) -> TxResult<R>,
    {
        inner(self)
    }

    /// Queues `action` to run once this transaction has committed, after
    /// every lock is released. Dropped if the attempt retries or fails.
    pub fn after_commit<F>(&mut self, action: F)
    where
        F: FnOnce() + 'static,
    {
        self.actions.push(Box::new(action));
    }

    /// Kills the current attempt. Return the result from the body to end the
    /// transaction with [`StmError::Aborted`].
    pub fn abort(&mut self) -> TxError {
        self.stop(Status::Killed);
        TxError::Failed(StmError::Aborted)
    }

    fn running_info(&self) -> TxResult<&Arc<Info>> {
        let info = self.info.as_ref().ok_or(StmError::NoTransaction)?;
        if info.is_running() {
            Ok(info)
        } else {
            Err(TxError::Retry)
        }
    }

    fn pending<T: Clone + Send + Sync + 'static>(&mut self, r: &Ref<T>) -> &mut Pending<T> {
        self.log
            .entry(r.id())
            .or_insert_with(|| Box::new(Pending::new(r.clone())) as Box<dyn LogEntry>)
            .as_any_mut()
            .downcast_mut::<Pending<T>>()
            .expect("ref ids are never shared between value types")
    }

    fn buffered<T: Clone + Send + Sync + 'static>(&self, r: &Ref<T>) -> Option<T> {
        self.log
            .get(&r.id())
            .and_then(|e| e.as_any().downcast_ref::<Pending<T>>())
            .and_then(|p| p.val.clone())
    }

    // -----------------------------------------------------------------------
    // Ref operations
    // -----------------------------------------------------------------------

    pub(crate) fn do_get<T: Clone + Send + Sync + 'static>(&mut self, r: &Ref<T>) -> TxResult<T> {
        self.running_info()?;
        if let Some(val) = self.buffered(r) {
            return Ok(val);
        }
        let found = {
            let Some(state) = r.state().try_read_recursive_for(self.config.lock_wait) else {
                debug!(ref_id = r.id(), "read lock timed out");
                return Err(TxError::Retry);
            };
            if state.is_unbound() {
                return Err(StmError::Unbound { id: r.id() }.into());
            }
            state.at_or_before(self.read_point).cloned()
        };
        found.ok_or_else(|| {
            r.add_fault();
            debug!(ref_id = r.id(), read_point = self.read_point, "no version at read point");
            TxError::Retry
        })
    }

    pub(crate) fn do_set<T: Clone + Send + Sync + 'static>(&mut self, r: &Ref<T>, val: T) -> TxResult<()> {
        self.running_info()?;
        let (commuted, set) = self
            .log
            .get(&r.id())
            .map_or((false, false), |e| (e.has_commutes(), e.is_set()));
        if commuted {
            return Err(StmError::SetAfterCommute.into());
        }
        if !set {
            self.pending(r).set = true;
            self.lock(r)?;
        }
        self.pending(r).val = Some(val);
        Ok(())
    }

    pub(crate) fn do_commute<T: Clone + Send + Sync + 'static>(
        &mut self,
        r: &Ref<T>,
        f: CommuteFn<T>,
    ) -> TxResult<T> {
        self.running_info()?;
        let base = match self.buffered(r) {
            Some(val) => val,
            None => match r.committed(self.config.lock_wait) {
                Err(StmError::ReadTimeout { .. }) => return Err(TxError::Retry),
                committed => committed?,
            },
        };
        let next = f(&base);
        let pending = self.pending(r);
        pending.commutes.push(f);
        pending.val = Some(next.clone());
        Ok(next)
    }

    pub(crate) fn do_ensure<T: Clone + Send + Sync + 'static>(&mut self, r: &Ref<T>) -> TxResult<()> {
        let info = Arc::clone(self.running_info()?);
        if self.log.get(&r.id()).is_some_and(|e| e.is_ensured()) {
            return Ok(());
        }
        let Some(guard) = r.state().try_read_arc_for(self.config.lock_wait) else {
            debug!(ref_id = r.id(), "read lock timed out");
            return Err(TxError::Retry);
        };
        if guard.latest_point().is_some_and(|p| p > self.read_point) {
            return Err(TxError::Retry);
        }
        if let Some(owner) = guard.tinfo.clone()
            && owner.is_running()
        {
            drop(guard);
            if Arc::ptr_eq(&owner, &info) {
                return Ok(());
            }
            return Err(self.block_and_bail(&owner));
        }
        self.pending(r).ensured = Some(guard);
        Ok(())
    }

    /// Claims `r` for this attempt: stamps it with our [`Info`] under a
    /// short-lived write lock.
    fn lock<T: Clone + Send + Sync + 'static>(&mut self, r: &Ref<T>) -> TxResult<()> {
        if let Some(entry) = self.log.get_mut(&r.id()) {
            entry.release_ensure();
        }
        let Some(mut state) = r.state().try_write_arc_for(self.config.lock_wait) else {
            debug!(ref_id = r.id(), "write lock timed out");
            return Err(TxError::Retry);
        };
        if state.latest_point().is_some_and(|p| p > self.read_point) {
            return Err(TxError::Retry);
        }
        let info = Arc::clone(self.running_info()?);
        if let Some(owner) = state.tinfo.clone()
            && !Arc::ptr_eq(&owner, &info)
            && owner.is_running()
            && !barge(self.config, self.start_point, self.start_time, &owner)
        {
            drop(state);
            return Err(self.block_and_bail(&owner));
        }
        state.tinfo = Some(info);
        Ok(())
    }

    /// Gives up the attempt and parks briefly until `owner` finishes.
    fn block_and_bail(&mut self, owner: &Info) -> TxError {
        self.stop(Status::Retry);
        debug!(owner_start = owner.start_point(), "blocking on conflicting transaction");
        owner.wait(self.config.lock_wait);
        TxError::Retry
    }

    fn stop(&self, status: Status) {
        if let Some(info) = &self.info {
            info.set_status(status);
            info.count_down();
        }
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    fn commit(&mut self) -> TxResult<()> {
        let info = Arc::clone(self.info.as_ref().ok_or(StmError::NoTransaction)?);
        if !info.transition(Status::Running, Status::Committing) {
            return Err(TxError::Retry);
        }
        let lock_wait = self.config.lock_wait;

        for (&id, entry) in &mut self.log {
            if !entry.has_commutes() || entry.is_set() {
                continue;
            }
            let was_ensured = entry.is_ensured();
            entry.release_ensure();
            if !entry.acquire(lock_wait) {
                return Err(TxError::Retry);
            }
            self.locked.push(id);
            if was_ensured && entry.latest_point().is_some_and(|p| p > self.read_point) {
                return Err(TxError::Retry);
            }
            if let Some(owner) = entry.owner()
                && !Arc::ptr_eq(&owner, &info)
                && owner.is_running()
                && !barge(self.config, self.start_point, self.start_time, &owner)
            {
                return Err(TxError::Retry);
            }
            entry.recompute()?;
        }

        for (&id, entry) in &mut self.log {
            if !entry.is_set() {
                continue;
            }
            entry.release_ensure();
            if !entry.acquire(lock_wait) {
                return Err(TxError::Retry);
            }
            self.locked.push(id);
        }

        for entry in self.log.values() {
            entry.validate()?;
        }

        let commit_point = point::next();
        for entry in self.log.values_mut() {
            if let Some(notify) = entry.publish(commit_point) {
                self.notifications.push(notify);
            }
        }
        info.set_status(Status::Committed);
        debug!(commit_point, refs = self.locked.len(), "transaction committed");
        Ok(())
    }

    /// Releases every lock, closes the attempt and hands back the deferred
    /// side effects if it committed.
    fn finish(&mut self, committed: bool) -> Vec<Deferred> {
        while let Some(id) = self.locked.pop() {
            if let Some(entry) = self.log.get_mut(&id) {
                entry.release();
            }
        }
        for entry in self.log.values_mut() {
            entry.release_ensure();
        }
        self.stop(if committed { Status::Committed } else { Status::Retry });
        self.log.clear();
        let mut deferred = mem::take(&mut self.notifications);
        deferred.append(&mut self.actions);
        if committed {
            deferred
        } else {
            Vec::new()
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.info.as_ref().is_some_and(|i| i.is_running()) {
            self.stop(Status::Retry);
        }
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("read_point", &self.read_point)
            .field("start_point", &self.start_point)
            .field("status", &self.info.as_ref().map(|i| i.status()))
            .field("refs", &self.log.len())
            .field("locked", &self.locked.len())
            .finish_non_exhaustive()
    }
}

/// Kills `owner` if this transaction is older and has waited long enough.
fn barge(config: &StmConfig, start_point: u64, start_time: Instant, owner: &Info) -> bool {
    if start_time.elapsed() <= config.barge_wait || start_point >= owner.start_point() {
        return false;
    }
    let barged = owner.transition(Status::Running, Status::Killed);
    if barged {
        owner.count_down();
        debug!(start_point, victim = owner.start_point(), "barged younger transaction");
    }
    barged
}

/// Runs `body` until an attempt commits.
///
/// On success returns the body's result plus the watch notifications and
/// post-commit actions, which the caller runs once it has left the
/// transaction.
pub(crate) fn run<R, F>(config: &StmConfig, mut body: F) -> Result<(R, Vec<Deferred>), StmError>
where
    F: FnMut(&mut Transaction<'_>) -> TxResult<R>,
{
    let mut tx = Transaction::new(config);
    for attempt in 0..config.retry_limit {
        tx.read_point = point::next();
        if attempt == 0 {
            tx.start_point = tx.read_point;
            tx.start_time = Instant::now();
        }
        tx.info = Some(Arc::new(Info::new(tx.start_point)));
        trace!(attempt, read_point = tx.read_point, "attempt started");

        let outcome = body(&mut tx).and_then(|ret| tx.commit().map(|()| ret));
        let deferred = tx.finish(outcome.is_ok());
        match outcome {
            Ok(ret) => return Ok((ret, deferred)),
            Err(TxError::Retry) => debug!(attempt, "transaction retry"),
            Err(TxError::Failed(err)) => return Err(err),
        }
    }
    warn!(attempts = config.retry_limit, "transaction failed after reaching retry limit");
    Err(StmError::RetryLimitExceeded {
        attempts: config.retry_limit,
    })
}
