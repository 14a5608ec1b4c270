//! Nested undo-log transactions
//!
//! A [`Transaction`] is a guard over one frame of the calling thread's
//! transaction stack for a pool. The outermost frame owns the undo log;
//! nested frames only push and pop. An abort anywhere in the nest rolls back
//! the whole outermost transaction.
//!
//! ## Lifecycle
//!
//! ```text
//! begin ──► Work ──► (nested begin/end) ──► end ──► OnCommit ──► Final
//!             │                                         │
//!             └──── abort / error / panic ──► OnAbort ◄─┘ (commit failure)
//! ```
//!
//! Ending a frame releases the locks attached at its begin, in reverse
//! acquisition order, after the commit or rollback completed.
//!
//! Frames end innermost first. Ending a frame while nested frames are still
//! open rolls back the whole transaction, releases the locks of every frame
//! and fails with `Error::Transaction`. The guards of the nested frames are
//! then orphaned: anything done through them fails the same way.

use nvobj_concurrency::{stack, CommitReport, Frame, HeldLock, LogTarget, RollbackReport, TxStack, UndoLog};
use nvobj_core::{Error, Oid, Persistent, PersistentPtr, Result, TxStage};
use std::cell::Cell;
use std::marker::PhantomData;
use std::mem;
use tracing::{debug, error, warn};

use crate::pool::Pool;
use crate::sync::TxLock;

/// Guard over one transaction frame.
///
/// Not `Send`: frames belong to the thread that began them.
///
/// Dropping the guard ends the frame like `commit` would, unless the thread
/// is panicking, in which case the outermost transaction is rolled back
/// first.
pub struct Transaction<'p> {
    pool: &'p Pool,
    depth: usize,
    /// Serial of the thread stack the frame was pushed on
    serial: u64,
    /// False for handles from `current`, which never end the frame
    owned: bool,
    finished: Cell<bool>,
    _not_send: PhantomData<*const ()>,
}

enum Outcome {
    Inner,
    Aborted(i32),
    Committed(CommitReport),
    CommitFailed(Error, Result<RollbackReport>),
    /// Ended while `innermost` was still open
    Torn {
        innermost: usize,
        frames: Vec<Frame>,
        rolled_back: Option<Result<RollbackReport>>,
    },
}

impl<'p> Transaction<'p> {
    fn begin_with(pool: &'p Pool, locks: &[TxLock]) -> Result<Self> {
        pool.ensure_open()?;
        let pool_id = pool.id();
        let fresh = stack::install(pool_id, TxStack::new());
        if fresh {
            // close may have won the race since ensure_open
            if let Err(e) = pool.enter_tx() {
                stack::remove(pool_id);
                return Err(e);
            }
        }
        let pushed = stack::with_active(pool_id, |s| {
            s.ensure_work()?;
            Ok((s.push(Frame::default()), s.serial()))
        });
        let (depth, serial) = match pushed {
            Ok(pushed) => pushed,
            Err(e) => {
                if fresh {
                    stack::remove(pool_id);
                    pool.exit_tx();
                }
                return Err(e);
            }
        };

        let tx = Transaction {
            pool,
            depth,
            serial,
            owned: true,
            finished: Cell::new(false),
            _not_send: PhantomData,
        };
        for lock in locks {
            if let Err(e) = tx.attach(lock) {
                tx.finished.set(true);
                if let Err(end) = tx.end_frame() {
                    warn!(target: "nvobj::tx", depth, error = %end, "Failed to unwind frame");
                }
                return Err(e);
            }
        }
        debug!(target: "nvobj::tx", depth, locks = locks.len(), "Transaction begun");
        Ok(tx)
    }

    /// Handle to the calling thread's innermost frame on `pool`.
    ///
    /// The handle can register and perform mutations but never ends the
    /// frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::Scope` if no transaction is active.
    pub fn current(pool: &'p Pool) -> Result<Self> {
        let (depth, serial) = stack::with_active(pool.id(), |s| Ok((s.depth(), s.serial())))?;
        if depth == 0 {
            return Err(Error::Scope("no active transaction frame".into()));
        }
        Ok(Transaction {
            pool,
            depth,
            serial,
            owned: false,
            finished: Cell::new(false),
            _not_send: PhantomData,
        })
    }

    /// Pool the transaction runs against.
    pub fn pool(&self) -> &'p Pool {
        self.pool
    }

    /// Nesting depth of this frame (1 for the outermost).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Stage of the calling thread's transaction.
    pub fn stage(&self) -> TxStage {
        self.pool.stage()
    }

    /// True once the outermost transaction has been rolled back.
    pub fn is_aborted(&self) -> bool {
        stack::with_serial(self.pool.id(), self.serial, |s| Ok(s.is_aborted())).unwrap_or(false)
    }

    fn attach(&self, lock: &TxLock) -> Result<()> {
        let (oid, kind) = lock.target();
        let (off, cell) = self.pool.lock_cell_at(oid)?;
        cell.lock(kind)?;
        self.pool.sync_lock_word(off, &cell);
        let held = HeldLock {
            off,
            cell: cell.clone(),
            kind,
        };
        stack::with_serial(self.pool.id(), self.serial, |s| s.attach(self.depth, held)).map_err(|e| {
            if cell.unlock(kind).is_ok() {
                self.pool.sync_lock_word(off, &cell);
            }
            e
        })
    }

    /// Run `f` against the undo log. Engine failures kill the transaction.
    pub(crate) fn with_log<R>(
        &self,
        f: impl FnOnce(&mut UndoLog, &LogTarget<'_>) -> Result<R>,
    ) -> Result<R> {
        self.pool.ensure_open()?;
        let target = self.pool.log_target();
        let result = stack::with_serial(self.pool.id(), self.serial, |s| {
            s.ensure_work()?;
            f(&mut s.log, &target)
        });
        match result {
            Err(e) if e.is_engine_failure() => {
                self.rollback(-1);
                Err(e)
            }
            other => other,
        }
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Register `len` bytes starting at `ptr` for rollback.
    ///
    /// Idempotent within the outermost transaction: only bytes not yet
    /// covered are snapshotted, and memory allocated by this transaction is
    /// never snapshotted.
    ///
    /// # Errors
    ///
    /// - `Error::Scope` if no transaction is active on this thread
    /// - `Error::Transaction` if the transaction was aborted
    pub fn add_range<T>(&self, ptr: PersistentPtr<T>, len: u64) -> Result<()> {
        let off = self.pool.check_oid(ptr.oid(), len)?;
        self.with_log(|log, target| log.add_range(target, off, len))
            .map(|_| ())
    }

    /// Register the whole referent of `ptr`.
    pub fn add<T: Persistent>(&self, ptr: PersistentPtr<T>) -> Result<()> {
        self.add_range(ptr, mem::size_of::<T>() as u64)
    }

    /// Register `[off, off + len)` of this pool.
    pub fn add_range_raw(&self, off: u64, len: u64) -> Result<()> {
        self.add_range(PersistentPtr::<u8>::from_oid(Oid::new(self.pool.id(), off)), len)
    }

    /// Register the referent of `ptr`, then store `value` there.
    pub fn write<T: Persistent>(&self, ptr: PersistentPtr<T>, value: T) -> Result<()> {
        self.add(ptr)?;
        self.pool.region.write(ptr.offset(), &value)
    }

    /// Read-modify-write of the referent of `ptr`; returns the new value.
    pub fn update<T: Persistent>(&self, ptr: PersistentPtr<T>, f: impl FnOnce(&mut T)) -> Result<T> {
        self.add(ptr)?;
        let mut value = self.pool.read(ptr)?;
        f(&mut value);
        self.pool.region.write(ptr.offset(), &value)?;
        Ok(value)
    }

    // ========================================================================
    // Abort and commit
    // ========================================================================

    /// Roll back the outermost transaction unless it already was.
    fn rollback(&self, code: i32) {
        let target = self.pool.log_target();
        let outcome = stack::with_stack(self.pool.id(), |s| match s {
            Some(s) if s.serial() == self.serial && !s.is_aborted() => {
                s.mark_aborted(code);
                Some(s.log.rollback(&target))
            }
            _ => None,
        });
        match outcome {
            Some(Ok(report)) => {
                self.pool.after_rollback(&report);
                debug!(
                    target: "nvobj::tx",
                    code,
                    restored = report.restored.len(),
                    released = report.released.len(),
                    "Transaction rolled back"
                );
            }
            Some(Err(e)) => error!(target: "nvobj::tx", code, error = %e, "Rollback incomplete"),
            None => {}
        }
    }

    /// Roll back the outermost transaction and return the abort error for
    /// the caller to propagate.
    ///
    /// Later mutation through any frame of the transaction fails with
    /// `Error::Transaction`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// pool.transaction(|tx| {
    ///     tx.write(root.field(|r| &r.a), 10)?;
    ///     if invalid {
    ///         return Err(tx.abort(-1));
    ///     }
    ///     Ok(())
    /// })?;
    /// ```
    pub fn abort(&self, code: i32) -> Error {
        self.rollback(code);
        let code = stack::with_serial(self.pool.id(), self.serial, |s| Ok(s.abort_code()))
            .ok()
            .flatten()
            .unwrap_or(code);
        Error::TransactionAborted { code }
    }

    /// End this frame.
    ///
    /// The outermost frame commits. A nested frame just pops.
    ///
    /// # Errors
    ///
    /// - `Error::TransactionAborted` if the transaction was rolled back
    /// - `Error::Transaction` if called on a handle from `current`, or if
    ///   the commit failed (the transaction is then rolled back)
    /// - `Error::Transaction` if nested frames are still open; the whole
    ///   transaction is rolled back and every frame's locks are released
    pub fn commit(self) -> Result<()> {
        if !self.owned {
            return Err(Error::Transaction(
                "only the guard returned by begin can end a frame".into(),
            ));
        }
        self.finished.set(true);
        self.end_frame()
    }

    /// Roll back on behalf of a failed scope and end the frame, returning
    /// `cause` unchanged.
    fn fail(self, cause: Error) -> Error {
        if !self.is_aborted() {
            self.rollback(-1);
        }
        self.finished.set(true);
        match self.end_frame() {
            Err(e) if !e.is_abort() => {
                warn!(target: "nvobj::tx", depth = self.depth, error = %e, "Failed to end aborted frame");
            }
            _ => {}
        }
        cause
    }

    fn end_frame(&self) -> Result<()> {
        let pool_id = self.pool.id();
        let target = self.pool.log_target();
        let (frame, mut outcome, outermost) = stack::with_serial(pool_id, self.serial, |s| {
            if self.depth != s.depth() {
                let innermost = s.depth();
                let rolled_back = if s.is_aborted() {
                    None
                } else {
                    s.mark_aborted(-1);
                    Some(s.log.rollback(&target))
                };
                let frames = s.drain_frames();
                let outcome = Outcome::Torn {
                    innermost,
                    frames,
                    rolled_back,
                };
                return Ok((None, outcome, true));
            }
            let frame = s.pop(self.depth)?;
            let outcome = if let Some(code) = s.abort_code() {
                Outcome::Aborted(code)
            } else if s.depth() > 0 {
                Outcome::Inner
            } else {
                s.set_committing(true);
                let committed = s.log.commit(&target);
                s.set_committing(false);
                match committed {
                    Ok(report) => Outcome::Committed(report),
                    Err(e) => {
                        s.mark_aborted(-1);
                        Outcome::CommitFailed(e, s.log.rollback(&target))
                    }
                }
            };
            Ok((Some(frame), outcome, s.depth() == 0))
        })?;

        if let Some(frame) = frame {
            release_locks(self.pool, frame);
        }
        if let Outcome::Torn { frames, .. } = &mut outcome {
            for frame in frames.drain(..) {
                release_locks(self.pool, frame);
            }
        }
        if outermost {
            stack::remove(pool_id);
            self.pool.exit_tx();
        }

        match outcome {
            Outcome::Inner => Ok(()),
            Outcome::Aborted(code) => Err(Error::TransactionAborted { code }),
            Outcome::Committed(report) => {
                self.pool.after_commit(&report);
                debug!(
                    target: "nvobj::tx",
                    flushed = report.flushed_bytes,
                    freed = report.freed.len(),
                    "Transaction committed"
                );
                Ok(())
            }
            Outcome::CommitFailed(cause, rolled_back) => {
                match rolled_back {
                    Ok(report) => self.pool.after_rollback(&report),
                    Err(e) => error!(target: "nvobj::tx", error = %e, "Rollback after failed commit incomplete"),
                }
                error!(target: "nvobj::tx", error = %cause, "Commit failed; transaction rolled back");
                Err(Error::Transaction(format!("commit failed: {}", cause)))
            }
            Outcome::Torn {
                innermost,
                rolled_back,
                ..
            } => {
                match rolled_back {
                    Some(Ok(report)) => self.pool.after_rollback(&report),
                    Some(Err(e)) => error!(target: "nvobj::tx", error = %e, "Rollback of torn transaction incomplete"),
                    None => {}
                }
                warn!(
                    target: "nvobj::tx",
                    depth = self.depth,
                    innermost,
                    "Frame ended before its nested frames; transaction rolled back"
                );
                Err(Error::Transaction(format!(
                    "frame at depth {} ended while depth {} was still open; transaction rolled back",
                    self.depth, innermost
                )))
            }
        }
    }
}

fn release_locks(pool: &Pool, frame: Frame) {
    for held in frame.locks.iter().rev() {
        match held.cell.unlock(held.kind) {
            Ok(()) => pool.sync_lock_word(held.off, &held.cell),
            Err(e) => error!(target: "nvobj::tx", off = held.off, error = %e, "Failed to release frame lock"),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.owned || self.finished.replace(true) {
            return;
        }
        if std::thread::panicking() {
            self.rollback(-1);
        }
        match self.end_frame() {
            Ok(()) => {}
            Err(e) if e.is_abort() => {}
            Err(e) => error!(target: "nvobj::tx", depth = self.depth, error = %e, "Implicit commit failed"),
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("pool_id", &format_args!("{:016x}", self.pool.id()))
            .field("depth", &self.depth)
            .field("owned", &self.owned)
            .finish()
    }
}

impl Pool {
    /// Begin a transaction frame on the calling thread.
    ///
    /// Nested calls push frames onto the same outermost transaction.
    ///
    /// # Errors
    ///
    /// - `Error::Pool` if the pool is closed
    /// - `Error::Transaction` if the thread's transaction was aborted and
    ///   not yet unwound
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Transaction::begin_with(self, &[])
    }

    /// Begin a frame holding `locks` until it ends.
    ///
    /// # Errors
    ///
    /// Returns `Error::Lock` if a lock cannot be acquired; locks already
    /// taken for the frame are released.
    pub fn begin_with(&self, locks: &[TxLock]) -> Result<Transaction<'_>> {
        Transaction::begin_with(self, locks)
    }

    /// Run `f` as a transaction frame.
    ///
    /// `Ok` commits. `Err(e)` rolls back the outermost transaction and
    /// returns `e` unchanged.
    ///
    /// # Example
    ///
    /// ```ignore
    /// pool.transaction(|tx| {
    ///     tx.write(root.field(|r| &r.a), 5u64)?;
    ///     tx.write(root.field(|r| &r.b), 10u64)
    /// })?;
    /// ```
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        self.transaction_with(&[], f)
    }

    /// Like `transaction`, holding `locks` for the frame.
    pub fn transaction_with<T>(
        &self,
        locks: &[TxLock],
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let tx = self.begin_with(locks)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => Err(tx.fail(e)),
        }
    }
}
