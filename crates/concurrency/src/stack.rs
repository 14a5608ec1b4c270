//! Per-thread transaction stacks
//!
//! Each thread owns one [`TxStack`] per pool it is transacting against,
//! keyed by pool identity. A stack holds the nested frames and the single
//! undo log of the outermost transaction: inner frames never commit or
//! replay anything on their own.
//!
//! Stacks never cross threads, so there is no locking here; the thread-local
//! map is borrowed only for the duration of one bookkeeping step.

use nvobj_core::{Error, Result, TxStage};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::locks::{LockCell, LockKind};
use crate::undo::UndoLog;

/// A lock attached to a frame, released when the frame ends.
#[derive(Debug, Clone)]
pub struct HeldLock {
    /// Pool offset of the persistent lock word
    pub off: u64,
    /// Runtime state of the lock
    pub cell: Arc<LockCell>,
    /// Mode it was acquired in
    pub kind: LockKind,
}

/// One level of a nested transaction.
#[derive(Debug, Default)]
pub struct Frame {
    /// Locks acquired at this frame's begin, in acquisition order
    pub locks: SmallVec<[HeldLock; 2]>,
}

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// A thread's transaction state for one pool.
#[derive(Debug)]
pub struct TxStack {
    serial: u64,
    frames: Vec<Frame>,
    /// Undo log of the outermost transaction
    pub log: UndoLog,
    aborted: Option<i32>,
    committing: bool,
}

impl Default for TxStack {
    fn default() -> Self {
        Self::new()
    }
}

impl TxStack {
    /// Empty stack with a process-unique serial.
    pub fn new() -> Self {
        TxStack {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            frames: Vec::new(),
            log: UndoLog::new(),
            aborted: None,
            committing: false,
        }
    }

    /// Identifies this outermost transaction among all stacks ever created.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Push a frame; returns its depth (1 for the outermost).
    pub fn push(&mut self, frame: Frame) -> usize {
        self.frames.push(frame);
        self.frames.len()
    }

    /// Pop the frame at `depth`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transaction` unless `depth` is the innermost frame.
    pub fn pop(&mut self, depth: usize) -> Result<Frame> {
        if depth == 0 || depth != self.frames.len() {
            return Err(Error::Transaction(format!(
                "frame at depth {} ended while depth {} is innermost",
                depth,
                self.frames.len()
            )));
        }
        self.frames
            .pop()
            .ok_or_else(|| Error::Transaction("no frame to end".into()))
    }

    /// Remove every frame, innermost first.
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        self.frames.drain(..).rev().collect()
    }

    /// Attach `lock` to the frame at `depth`.
    pub fn attach(&mut self, depth: usize, lock: HeldLock) -> Result<()> {
        let frame = depth
            .checked_sub(1)
            .and_then(|idx| self.frames.get_mut(idx))
            .ok_or_else(|| Error::Transaction(format!("no frame at depth {}", depth)))?;
        frame.locks.push(lock);
        Ok(())
    }

    /// Number of active frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// True once the outermost transaction has been rolled back.
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Abort code, if rolled back.
    pub fn abort_code(&self) -> Option<i32> {
        self.aborted
    }

    /// Record that the transaction was rolled back with `code`.
    ///
    /// The first abort wins; later codes are ignored.
    pub fn mark_aborted(&mut self, code: i32) {
        self.aborted.get_or_insert(code);
    }

    /// Flag the outermost commit as in progress.
    pub fn set_committing(&mut self, committing: bool) {
        self.committing = committing;
    }

    /// Observable stage.
    pub fn stage(&self) -> TxStage {
        if self.aborted.is_some() {
            TxStage::OnAbort
        } else if self.committing {
            TxStage::OnCommit
        } else if self.frames.is_empty() {
            TxStage::Final
        } else {
            TxStage::Work
        }
    }

    /// Fail unless mutations may still be registered.
    pub fn ensure_work(&self) -> Result<()> {
        match self.aborted {
            Some(code) => Err(Error::Transaction(format!(
                "transaction was aborted (code {}); no further mutation is allowed",
                code
            ))),
            None => Ok(()),
        }
    }
}

thread_local! {
    /// Transaction stacks of this thread, by pool identity
    static STACKS: RefCell<FxHashMap<u64, TxStack>> = RefCell::new(FxHashMap::default());
}

/// Run `f` on this thread's stack for `pool_id`, if one exists.
///
/// `f` must not re-enter this module.
pub fn with_stack<R>(pool_id: u64, f: impl FnOnce(Option<&mut TxStack>) -> R) -> R {
    STACKS.with(|stacks| f(stacks.borrow_mut().get_mut(&pool_id)))
}

/// Run `f` on this thread's stack for `pool_id`, failing with
/// `Error::Scope` if no transaction is active.
pub fn with_active<R>(pool_id: u64, f: impl FnOnce(&mut TxStack) -> Result<R>) -> Result<R> {
    with_stack(pool_id, |stack| match stack {
        Some(stack) => f(stack),
        None => Err(Error::Scope(
            "operation requires an active transaction".into(),
        )),
    })
}

/// Run `f` on this thread's stack for `pool_id` only if it is the stack
/// with `serial`.
///
/// # Errors
///
/// Returns `Error::Transaction` if that stack has already ended.
pub fn with_serial<R>(
    pool_id: u64,
    serial: u64,
    f: impl FnOnce(&mut TxStack) -> Result<R>,
) -> Result<R> {
    with_stack(pool_id, |stack| match stack {
        Some(stack) if stack.serial == serial => f(stack),
        _ => Err(Error::Transaction(
            "the transaction this frame belonged to has already ended".into(),
        )),
    })
}

/// Install `stack` for `pool_id`. Returns `false` if one already exists.
pub fn install(pool_id: u64, stack: TxStack) -> bool {
    STACKS.with(|stacks| {
        let mut stacks = stacks.borrow_mut();
        if stacks.contains_key(&pool_id) {
            return false;
        }
        stacks.insert(pool_id, stack);
        true
    })
}

/// Remove and return the stack for `pool_id`.
pub fn remove(pool_id: u64) -> Option<TxStack> {
    STACKS.with(|stacks| stacks.borrow_mut().remove(&pool_id))
}

/// Stage of this thread's transaction on `pool_id`.
pub fn stage(pool_id: u64) -> TxStage {
    with_stack(pool_id, |stack| stack.map_or(TxStage::None, |s| s.stage()))
}
