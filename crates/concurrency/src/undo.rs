//! Undo log of an outermost transaction
//!
//! Records, in chronological order, everything needed to revert the
//! transaction's effects:
//!
//! - byte-range snapshots, taken the first time a range is registered
//! - allocations, which rollback frees
//! - frees, which are only requests: storage is released after the commit
//!   point, so rolling a free back just drops the request and the object's
//!   bytes are restored from their snapshot
//!
//! Memory allocated by the transaction is covered without a snapshot, since
//! rolling back the allocation discards it anyway.
//!
//! In durable mode every record also goes to the transaction's lane journal
//! and is synced before the guarded mutation may proceed. Blocks released at
//! the end of a transaction only return to the heap's free map after the
//! lane has been truncated, so recovery never replays a record against a
//! block that another transaction has since reused.

use nvobj_core::{Error, Result};
use nvobj_durability::{LaneGuard, LaneSet, UndoRecord};
use nvobj_storage::{Heap, ObjectInfo, Region};
use std::sync::Arc;
use tracing::{error, warn};

use crate::ranges::RangeSet;

/// The pool state an undo log operates on.
#[derive(Clone, Copy)]
pub struct LogTarget<'a> {
    /// Mapped pool
    pub region: &'a Region,
    /// Pool heap
    pub heap: &'a Heap,
    /// Journal lanes; `None` keeps the log volatile
    pub lanes: Option<&'a Arc<LaneSet>>,
}

impl LogTarget<'_> {
    fn durable(&self) -> bool {
        self.lanes.is_some()
    }
}

#[derive(Debug, Clone)]
enum UndoEntry {
    Range { off: u64, bytes: Vec<u8> },
    Alloc { off: u64 },
    Free { off: u64 },
}

/// Effects of a rollback the caller may need to invalidate caches for.
#[derive(Debug, Default)]
pub struct RollbackReport {
    /// Byte ranges rewritten from snapshots
    pub restored: Vec<(u64, u64)>,
    /// Allocations released
    pub released: Vec<ObjectInfo>,
}

/// Effects of a commit.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Allocations released by deferred frees
    pub freed: Vec<ObjectInfo>,
    /// Bytes flushed at the commit point
    pub flushed_bytes: u64,
}

/// Undo log owned by a thread's outermost transaction.
#[derive(Debug, Default)]
pub struct UndoLog {
    entries: Vec<UndoEntry>,
    covered: RangeSet,
    pending_free: Vec<u64>,
    lane: Option<LaneGuard>,
}

impl UndoLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn journal(&mut self, target: &LogTarget<'_>, record: &UndoRecord, sync: bool) -> Result<()> {
        let Some(lanes) = target.lanes else {
            return Ok(());
        };
        let lane = self.lane.get_or_insert_with(|| lanes.acquire());
        let mut journal = lane.journal();
        journal.append(record)?;
        if sync {
            journal.sync()?;
        }
        Ok(())
    }

    /// Register `[off, off + len)` for rollback.
    ///
    /// Only bytes not already covered in this transaction are snapshotted.
    /// Returns the number of bytes snapshotted.
    pub fn add_range(&mut self, target: &LogTarget<'_>, off: u64, len: u64) -> Result<u64> {
        let end = off
            .checked_add(len)
            .filter(|&end| end <= target.region.len())
            .ok_or_else(|| {
                Error::OutOfRange(format!("range {:#x}+{} is outside the pool", off, len))
            })?;
        let gaps = self.covered.insert_uncovered(off, end);
        if gaps.is_empty() {
            return Ok(0);
        }

        let mut snapshotted = 0;
        let last = gaps.len() - 1;
        for (i, (start, stop)) in gaps.into_iter().enumerate() {
            let bytes = target.region.read_bytes(start, (stop - start) as usize)?;
            if target.durable() {
                let record = UndoRecord::Range {
                    off: start,
                    bytes: bytes.clone(),
                };
                self.journal(target, &record, i == last)?;
            }
            snapshotted += stop - start;
            self.entries.push(UndoEntry::Range { off: start, bytes });
        }
        Ok(snapshotted)
    }

    /// Record a fresh allocation of `size` bytes at payload offset `off`.
    ///
    /// Must be called before the allocation is published.
    pub fn record_alloc(&mut self, target: &LogTarget<'_>, off: u64, size: u64) -> Result<()> {
        self.journal(target, &UndoRecord::Alloc { off }, true)?;
        self.entries.push(UndoEntry::Alloc { off });
        self.covered.insert_uncovered(off, off + size);
        Ok(())
    }

    /// Request that the allocation at `off` be freed at commit.
    pub fn record_free(&mut self, target: &LogTarget<'_>, off: u64) -> Result<()> {
        if self.pending_free.contains(&off) {
            return Err(Error::Allocation(format!(
                "double free of {:#x} in one transaction",
                off
            )));
        }
        // synced together with the commit record
        self.journal(target, &UndoRecord::Free { off }, false)?;
        self.entries.push(UndoEntry::Free { off });
        self.pending_free.push(off);
        Ok(())
    }

    #[cfg(test)]
    fn is_pending_free(&self, off: u64) -> bool {
        self.pending_free.contains(&off)
    }

    /// True if `[off, off + len)` is already protected.
    pub fn covers(&self, off: u64, len: u64) -> bool {
        self.covered.covers(off, off.saturating_add(len))
    }

    /// Number of undo entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Revert every recorded effect, newest first.
    ///
    /// Continues past individual failures and reports the first one.
    pub fn rollback(&mut self, target: &LogTarget<'_>) -> Result<RollbackReport> {
        let mut report = RollbackReport::default();
        let mut first_err: Option<Error> = None;

        for entry in self.entries.drain(..).rev() {
            match entry {
                UndoEntry::Range { off, bytes } => {
                    match target.region.write_bytes(off, &bytes) {
                        Ok(()) => report.restored.push((off, bytes.len() as u64)),
                        Err(e) => {
                            error!(target: "nvobj::tx", off, error = %e, "Failed to restore snapshot");
                            first_err.get_or_insert(e);
                        }
                    }
                }
                UndoEntry::Alloc { off } => match target.heap.release(target.region, off) {
                    Ok(info) => report.released.push(info),
                    Err(e) => {
                        warn!(target: "nvobj::tx", off, error = %e, "Failed to release allocation");
                        first_err.get_or_insert(e);
                    }
                },
                UndoEntry::Free { off } => self.pending_free.retain(|&p| p != off),
            }
        }

        if target.durable() {
            for &(off, len) in &report.restored {
                if let Err(e) = target.region.persist(off, len as usize) {
                    first_err.get_or_insert(e);
                }
            }
        }
        match self.finish() {
            // blocks the journal still names stay out of the free map
            Err(e) => {
                first_err.get_or_insert(e);
            }
            Ok(()) => {
                for info in &report.released {
                    target.heap.recycle(info);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Make the transaction's effects durable, then apply deferred frees.
    ///
    /// On error nothing has been discarded and the log can still be rolled
    /// back.
    pub fn commit(&mut self, target: &LogTarget<'_>) -> Result<CommitReport> {
        let mut report = CommitReport::default();
        if target.durable() && !self.entries.is_empty() {
            for (start, end) in self.covered.iter() {
                target.region.persist(start, (end - start) as usize)?;
                report.flushed_bytes += end - start;
            }
            self.journal(target, &UndoRecord::Commit, true)?;
        }

        for off in std::mem::take(&mut self.pending_free) {
            match target.heap.release(target.region, off) {
                Ok(info) => report.freed.push(info),
                // the commit record is durable; recovery re-applies this free
                Err(e) => error!(target: "nvobj::tx", off, error = %e, "Deferred free failed"),
            }
        }
        self.entries.clear();
        // blocks the journal still names stay out of the free map
        self.finish()?;
        for info in &report.freed {
            target.heap.recycle(info);
        }
        Ok(report)
    }

    fn finish(&mut self) -> Result<()> {
        self.covered.clear();
        self.pending_free.clear();
        match self.lane.take() {
            Some(lane) => {
                let result = lane.journal().reset();
                drop(lane);
                result
            }
            None => Ok(()),
        }
    }
}
