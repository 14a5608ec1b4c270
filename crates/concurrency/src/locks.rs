//! Runtime lock state for persistent synchronization primitives
//!
//! A persistent mutex or rwlock is only a word inside a persisted structure.
//! The blocking state lives here, keyed by the word's pool offset, and is
//! rebuilt from nothing every run. That is what makes a lock observed
//! "locked" after a crash harmless: no thread of the new run owns it.
//!
//! Ownership is tracked per thread so protocol violations are reported as
//! `Error::Lock` instead of deadlocking or silently corrupting the lock.

use dashmap::DashMap;
use nvobj_core::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// How a lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// Exclusive (mutex, rwlock writer)
    Exclusive,
    /// Shared (rwlock reader)
    Shared,
}

/// Encoded state word written back to the persistent lock.
pub const WORD_UNLOCKED: u64 = 0;
/// Encoded state of a writer-held lock.
pub const WORD_EXCLUSIVE: u64 = u64::MAX;

#[derive(Debug, Default)]
struct LockState {
    writer: Option<ThreadId>,
    readers: Vec<ThreadId>,
}

/// Blocking state of one persistent lock.
#[derive(Debug, Default)]
pub struct LockCell {
    state: Mutex<LockState>,
    released: Condvar,
}

impl LockCell {
    /// Unlocked cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire exclusively, blocking while held elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `Error::Lock` if the calling thread already holds the lock in
    /// either mode; waiting would never end.
    pub fn lock_exclusive(&self) -> Result<()> {
        let me = thread::current().id();
        let mut st = self.state.lock();
        if st.writer == Some(me) {
            return Err(Error::Lock(
                "resource deadlock: lock already held by this thread".into(),
            ));
        }
        if st.readers.contains(&me) {
            return Err(Error::Lock(
                "resource deadlock: shared holder requested exclusive access".into(),
            ));
        }
        while st.writer.is_some() || !st.readers.is_empty() {
            self.released.wait(&mut st);
        }
        st.writer = Some(me);
        Ok(())
    }

    /// Acquire exclusively if free.
    pub fn try_lock_exclusive(&self) -> Result<bool> {
        let me = thread::current().id();
        let mut st = self.state.lock();
        if st.writer == Some(me) {
            return Err(Error::Lock(
                "resource deadlock: lock already held by this thread".into(),
            ));
        }
        if st.writer.is_some() || !st.readers.is_empty() {
            return Ok(false);
        }
        st.writer = Some(me);
        Ok(true)
    }

    /// Acquire shared, blocking while a writer holds the lock.
    pub fn lock_shared(&self) -> Result<()> {
        let me = thread::current().id();
        let mut st = self.state.lock();
        if st.writer == Some(me) {
            return Err(Error::Lock(
                "resource deadlock: exclusive holder requested shared access".into(),
            ));
        }
        while st.writer.is_some() {
            self.released.wait(&mut st);
        }
        st.readers.push(me);
        Ok(())
    }

    /// Acquire shared if no writer holds the lock.
    pub fn try_lock_shared(&self) -> Result<bool> {
        let me = thread::current().id();
        let mut st = self.state.lock();
        if st.writer == Some(me) {
            return Err(Error::Lock(
                "resource deadlock: exclusive holder requested shared access".into(),
            ));
        }
        if st.writer.is_some() {
            return Ok(false);
        }
        st.readers.push(me);
        Ok(true)
    }

    /// Acquire in the given mode.
    pub fn lock(&self, kind: LockKind) -> Result<()> {
        match kind {
            LockKind::Exclusive => self.lock_exclusive(),
            LockKind::Shared => self.lock_shared(),
        }
    }

    /// Release an exclusive hold.
    ///
    /// # Errors
    ///
    /// Returns `Error::Lock` if the calling thread is not the writer.
    pub fn unlock_exclusive(&self) -> Result<()> {
        let me = thread::current().id();
        let mut st = self.state.lock();
        let writer = st.writer;
        match writer {
            Some(owner) if owner == me => {
                st.writer = None;
                drop(st);
                self.released.notify_all();
                Ok(())
            }
            Some(_) => Err(Error::Lock(
                "operation not permitted: lock is owned by another thread".into(),
            )),
            None => Err(Error::Lock("unlock of a lock that is not held".into())),
        }
    }

    /// Release one shared hold of the calling thread.
    pub fn unlock_shared(&self) -> Result<()> {
        let me = thread::current().id();
        let mut st = self.state.lock();
        let pos = st.readers.iter().position(|&t| t == me).ok_or_else(|| {
            Error::Lock("unlock of a shared lock not held by this thread".into())
        })?;
        st.readers.swap_remove(pos);
        let now_free = st.readers.is_empty();
        drop(st);
        if now_free {
            self.released.notify_all();
        }
        Ok(())
    }

    /// Release in the given mode.
    pub fn unlock(&self, kind: LockKind) -> Result<()> {
        match kind {
            LockKind::Exclusive => self.unlock_exclusive(),
            LockKind::Shared => self.unlock_shared(),
        }
    }

    /// Release whichever hold the calling thread has.
    pub fn unlock_any(&self) -> Result<LockKind> {
        let me = thread::current().id();
        let writer = self.state.lock().writer;
        if writer == Some(me) {
            self.unlock_exclusive()?;
            Ok(LockKind::Exclusive)
        } else {
            self.unlock_shared()?;
            Ok(LockKind::Shared)
        }
    }

    /// True if held in any mode by any thread.
    pub fn is_locked(&self) -> bool {
        let st = self.state.lock();
        st.writer.is_some() || !st.readers.is_empty()
    }

    /// True if the calling thread holds the lock exclusively.
    pub fn held_exclusively_by_current(&self) -> bool {
        self.state.lock().writer == Some(thread::current().id())
    }

    /// State word mirrored into persistent memory.
    pub fn encoded(&self) -> u64 {
        let st = self.state.lock();
        if st.writer.is_some() {
            WORD_EXCLUSIVE
        } else {
            st.readers.len() as u64
        }
    }
}

/// Blocking state of one persistent condition variable.
#[derive(Debug, Default)]
pub struct CondCell {
    generation: Mutex<u64>,
    signal: Condvar,
}

impl CondCell {
    /// New condition variable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Release `mutex`, wait for a notification, then reacquire `mutex`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Lock` if the calling thread does not hold `mutex`
    /// exclusively.
    pub fn wait(&self, mutex: &LockCell) -> Result<()> {
        if !mutex.held_exclusively_by_current() {
            return Err(Error::Lock(
                "condition wait requires the mutex to be held by this thread".into(),
            ));
        }
        let mut gen = self.generation.lock();
        let start = *gen;
        mutex.unlock_exclusive()?;
        while *gen == start {
            self.signal.wait(&mut gen);
        }
        drop(gen);
        mutex.lock_exclusive()
    }

    /// Like `wait`, giving up after `timeout`. Returns `false` on timeout.
    pub fn wait_for(&self, mutex: &LockCell, timeout: Duration) -> Result<bool> {
        if !mutex.held_exclusively_by_current() {
            return Err(Error::Lock(
                "condition wait requires the mutex to be held by this thread".into(),
            ));
        }
        let deadline = Instant::now() + timeout;
        let mut gen = self.generation.lock();
        let start = *gen;
        mutex.unlock_exclusive()?;
        let mut notified = true;
        while *gen == start {
            if self.signal.wait_until(&mut gen, deadline).timed_out() {
                notified = *gen != start;
                break;
            }
        }
        drop(gen);
        mutex.lock_exclusive()?;
        Ok(notified)
    }

    /// Wake one waiter.
    pub fn notify_one(&self) {
        *self.generation.lock() += 1;
        self.signal.notify_one();
    }

    /// Wake every waiter.
    pub fn notify_all(&self) {
        *self.generation.lock() += 1;
        self.signal.notify_all();
    }
}

/// Runtime lock state of one pool, keyed by persistent word offset.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<u64, Arc<LockCell>>,
    conds: DashMap<u64, Arc<CondCell>>,
}

impl LockTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cell for the lock word at `off`, created on first use.
    ///
    /// `on_first_use` runs exactly once per offset per table, before the cell
    /// is handed out.
    pub fn lock_cell(&self, off: u64, on_first_use: impl FnOnce()) -> Arc<LockCell> {
        Arc::clone(
            self.locks
                .entry(off)
                .or_insert_with(|| {
                    on_first_use();
                    Arc::new(LockCell::new())
                })
                .value(),
        )
    }

    /// Cell for the condition variable word at `off`, created on first use.
    pub fn cond_cell(&self, off: u64, on_first_use: impl FnOnce()) -> Arc<CondCell> {
        Arc::clone(
            self.conds
                .entry(off)
                .or_insert_with(|| {
                    on_first_use();
                    Arc::new(CondCell::new())
                })
                .value(),
        )
    }

    /// Drop cells whose words lie in `[start, end)` (their storage was freed).
    pub fn forget_range(&self, start: u64, end: u64) {
        self.locks.retain(|&off, _| off < start || off >= end);
        self.conds.retain(|&off, _| off < start || off >= end);
    }

    /// Number of tracked locks.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True if no lock was used yet.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
