//! Transaction state for nvobj
//!
//! This crate implements the per-thread half of the transaction engine:
//! - RangeSet: first-write-wins coverage of dirtied bytes
//! - UndoLog: chronological undo entries, durable through a lane journal
//! - TxStack: nested frames of one thread against one pool
//! - LockTable: runtime blocking state behind persistent locks
//!
//! The pool-facing API (begin/commit/abort, allocation, lock attachment)
//! lives in the engine crate and drives these types.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod locks;
pub mod ranges;
pub mod stack;
pub mod undo;

pub use locks::{CondCell, LockCell, LockKind, LockTable, WORD_EXCLUSIVE, WORD_UNLOCKED};
pub use ranges::{Gaps, RangeSet};
pub use stack::{Frame, HeldLock, TxStack};
pub use undo::{CommitReport, LogTarget, RollbackReport, UndoLog};
