//! Persistent synchronization primitives
//!
//! [`PMutex`], [`PRwLock`] and [`PCondvar`] are two-word values embedded in
//! persisted structures: the run id of the process that last used them and
//! a state word. Blocking happens in the pool's runtime `LockTable`, keyed by
//! the word's offset, so the persisted state is never authoritative. It
//! mirrors the runtime state for inspection.
//!
//! The first use of a lock word in a run compares its stored run id with
//! the pool's. A mismatch means the word was written by an earlier process;
//! any lock it shows is abandoned and the word is reset.
//!
//! Attaching a lock to a transaction (see [`TxLock`]) releases it when the
//! frame ends, after commit or rollback.

use bytemuck::{Pod, Zeroable};
use nvobj_concurrency::{CondCell, LockCell, LockKind, WORD_UNLOCKED};
use nvobj_core::{Error, Oid, Persistent, PersistentPtr, Result};
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::pool::Pool;

// ============================================================================
// Persistent lock words
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LockWord {
    run_id: u64,
    state: u64,
}

macro_rules! lock_word_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(C)]
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
        pub struct $name {
            run_id: u64,
            state: u64,
        }

        impl $name {
            /// Run id of the process that last touched the word.
            pub fn run_id(&self) -> u64 {
                self.run_id
            }

            /// Stored state word (0 unlocked, `u64::MAX` exclusive, else
            /// the number of shared holders).
            pub fn state(&self) -> u64 {
                self.state
            }
        }

        impl Persistent for $name {}
    };
}

lock_word_type!(
    /// Persistent exclusive lock
    PMutex
);

lock_word_type!(
    /// Persistent reader-writer lock
    PRwLock
);

lock_word_type!(
    /// Persistent condition variable
    PCondvar
);

/// A lock to acquire at transaction begin and release when the frame ends.
#[derive(Debug, Clone, Copy)]
pub enum TxLock {
    /// Exclusive hold of a mutex
    Mutex(PersistentPtr<PMutex>),
    /// Writer hold of a reader-writer lock
    Write(PersistentPtr<PRwLock>),
    /// Reader hold of a reader-writer lock
    Read(PersistentPtr<PRwLock>),
}

impl TxLock {
    pub(crate) fn target(&self) -> (Oid, LockKind) {
        match self {
            TxLock::Mutex(p) => (p.oid(), LockKind::Exclusive),
            TxLock::Write(p) => (p.oid(), LockKind::Exclusive),
            TxLock::Read(p) => (p.oid(), LockKind::Shared),
        }
    }
}

impl Pool {
    fn lock_word_off(&self, oid: Oid) -> Result<u64> {
        let off = self.check_oid(oid, mem::size_of::<LockWord>() as u64)?;
        if off % 8 != 0 {
            return Err(Error::Lock(format!("lock word {} is not 8-byte aligned", oid)));
        }
        Ok(off)
    }

    fn stamp_word(&self, off: u64) {
        let word: LockWord = match self.region.read(off) {
            Ok(word) => word,
            Err(e) => {
                warn!(target: "nvobj::pool", off, error = %e, "Unreadable lock word");
                return;
            }
        };
        if word.run_id == self.run_id() {
            return;
        }
        if word.state != WORD_UNLOCKED {
            debug!(
                target: "nvobj::pool",
                off,
                stale_run = word.run_id,
                state = word.state,
                "Resetting abandoned lock"
            );
        }
        let fresh = LockWord {
            run_id: self.run_id(),
            state: WORD_UNLOCKED,
        };
        if let Err(e) = self.region.write(off, &fresh) {
            warn!(target: "nvobj::pool", off, error = %e, "Failed to reset lock word");
        }
    }

    /// Runtime cell of the lock word at `off`.
    pub(crate) fn lock_cell_at(&self, oid: Oid) -> Result<(u64, Arc<LockCell>)> {
        let off = self.lock_word_off(oid)?;
        Ok((off, self.locks.lock_cell(off, || self.stamp_word(off))))
    }

    /// Mirror `cell` into the persistent state word (not flushed).
    pub(crate) fn sync_lock_word(&self, off: u64, cell: &LockCell) {
        let word = LockWord {
            run_id: self.run_id(),
            state: cell.encoded(),
        };
        if let Err(e) = self.region.write(off, &word) {
            warn!(target: "nvobj::pool", off, error = %e, "Failed to update lock word");
        }
    }

    /// Handle to a persistent mutex.
    pub fn mutex(&self, ptr: PersistentPtr<PMutex>) -> Result<MutexRef<'_>> {
        let (off, cell) = self.lock_cell_at(ptr.oid())?;
        Ok(MutexRef {
            pool: self,
            off,
            cell,
        })
    }

    /// Handle to a persistent reader-writer lock.
    pub fn rwlock(&self, ptr: PersistentPtr<PRwLock>) -> Result<RwLockRef<'_>> {
        let (off, cell) = self.lock_cell_at(ptr.oid())?;
        Ok(RwLockRef {
            pool: self,
            off,
            cell,
        })
    }

    /// Handle to a persistent condition variable.
    pub fn condvar(&self, ptr: PersistentPtr<PCondvar>) -> Result<CondvarRef<'_>> {
        let off = self.lock_word_off(ptr.oid())?;
        let cell = self.locks.cond_cell(off, || self.stamp_word(off));
        Ok(CondvarRef { pool: self, cell })
    }
}

// ============================================================================
// Handles
// ============================================================================

/// Held lock, released on drop.
#[must_use = "dropping the guard releases the lock"]
pub struct PLockGuard<'a> {
    pool: &'a Pool,
    off: u64,
    cell: &'a LockCell,
    kind: LockKind,
}

impl Drop for PLockGuard<'_> {
    fn drop(&mut self) {
        match self.cell.unlock(self.kind) {
            Ok(()) => self.pool.sync_lock_word(self.off, self.cell),
            Err(e) => error!(target: "nvobj::pool", off = self.off, error = %e, "Guard release failed"),
        }
    }
}

/// A persistent mutex resolved against its pool.
pub struct MutexRef<'p> {
    pool: &'p Pool,
    off: u64,
    cell: Arc<LockCell>,
}

impl<'p> MutexRef<'p> {
    /// Acquire, blocking while another thread holds it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Lock` if this thread already holds it.
    pub fn lock(&self) -> Result<()> {
        self.pool.ensure_open()?;
        self.cell.lock_exclusive()?;
        self.pool.sync_lock_word(self.off, &self.cell);
        Ok(())
    }

    /// Acquire if free.
    pub fn try_lock(&self) -> Result<bool> {
        self.pool.ensure_open()?;
        let got = self.cell.try_lock_exclusive()?;
        if got {
            self.pool.sync_lock_word(self.off, &self.cell);
        }
        Ok(got)
    }

    /// Release.
    ///
    /// # Errors
    ///
    /// Returns `Error::Lock` if the calling thread does not hold it.
    pub fn unlock(&self) -> Result<()> {
        self.cell.unlock_exclusive()?;
        self.pool.sync_lock_word(self.off, &self.cell);
        Ok(())
    }

    /// Acquire and return a guard that releases on drop.
    pub fn guard(&self) -> Result<PLockGuard<'_>> {
        self.lock()?;
        Ok(PLockGuard {
            pool: self.pool,
            off: self.off,
            cell: &self.cell,
            kind: LockKind::Exclusive,
        })
    }

    /// True if held by any thread.
    pub fn is_locked(&self) -> bool {
        self.cell.is_locked()
    }

    /// Pool offset of the lock word.
    pub fn offset(&self) -> u64 {
        self.off
    }
}

/// A persistent reader-writer lock resolved against its pool.
pub struct RwLockRef<'p> {
    pool: &'p Pool,
    off: u64,
    cell: Arc<LockCell>,
}

impl<'p> RwLockRef<'p> {
    /// Acquire for writing.
    pub fn write(&self) -> Result<()> {
        self.acquire(LockKind::Exclusive)
    }

    /// Acquire for reading.
    pub fn read(&self) -> Result<()> {
        self.acquire(LockKind::Shared)
    }

    /// Acquire for writing if free.
    pub fn try_write(&self) -> Result<bool> {
        self.pool.ensure_open()?;
        let got = self.cell.try_lock_exclusive()?;
        if got {
            self.pool.sync_lock_word(self.off, &self.cell);
        }
        Ok(got)
    }

    /// Acquire for reading if no writer holds it.
    pub fn try_read(&self) -> Result<bool> {
        self.pool.ensure_open()?;
        let got = self.cell.try_lock_shared()?;
        if got {
            self.pool.sync_lock_word(self.off, &self.cell);
        }
        Ok(got)
    }

    /// Release whichever hold the calling thread has.
    pub fn unlock(&self) -> Result<()> {
        self.cell.unlock_any()?;
        self.pool.sync_lock_word(self.off, &self.cell);
        Ok(())
    }

    /// Acquire for writing and return a guard.
    pub fn guard(&self) -> Result<PLockGuard<'_>> {
        self.acquire(LockKind::Exclusive)?;
        Ok(self.guard_of(LockKind::Exclusive))
    }

    /// Acquire for reading and return a guard.
    pub fn shared_guard(&self) -> Result<PLockGuard<'_>> {
        self.acquire(LockKind::Shared)?;
        Ok(self.guard_of(LockKind::Shared))
    }

    /// True if held in any mode.
    pub fn is_locked(&self) -> bool {
        self.cell.is_locked()
    }

    fn acquire(&self, kind: LockKind) -> Result<()> {
        self.pool.ensure_open()?;
        self.cell.lock(kind)?;
        self.pool.sync_lock_word(self.off, &self.cell);
        Ok(())
    }

    fn guard_of(&self, kind: LockKind) -> PLockGuard<'_> {
        PLockGuard {
            pool: self.pool,
            off: self.off,
            cell: &self.cell,
            kind,
        }
    }
}

/// A persistent condition variable resolved against its pool.
pub struct CondvarRef<'p> {
    pool: &'p Pool,
    cell: Arc<CondCell>,
}

impl<'p> CondvarRef<'p> {
    /// Wake one waiter.
    pub fn notify_one(&self) {
        self.cell.notify_one();
    }

    /// Wake every waiter.
    pub fn notify_all(&self) {
        self.cell.notify_all();
    }

    /// Release `mutex`, wait for a notification, reacquire `mutex`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Lock` if the calling thread does not hold `mutex`.
    pub fn wait(&self, mutex: &MutexRef<'_>) -> Result<()> {
        self.pool.ensure_open()?;
        self.cell.wait(&mutex.cell)?;
        self.pool.sync_lock_word(mutex.off, &mutex.cell);
        Ok(())
    }

    /// Like `wait`, giving up after `timeout`. Returns `false` on timeout.
    pub fn wait_for(&self, mutex: &MutexRef<'_>, timeout: Duration) -> Result<bool> {
        self.pool.ensure_open()?;
        let notified = self.cell.wait_for(&mutex.cell, timeout)?;
        self.pool.sync_lock_word(mutex.off, &mutex.cell);
        Ok(notified)
    }
}
