//! Lane journal recovery
//!
//! Runs on open, before the heap index is rebuilt. For every lane:
//!
//! - **Committed** (a `Commit` record exists): the transaction's data is
//!   already durable; roll forward by re-applying its deferred frees.
//!   Freeing is idempotent on media, so a crash during recovery is harmless.
//! - **Uncommitted**: roll back in reverse append order. `Range` records
//!   restore snapshot bytes; `Alloc` records release blocks still marked
//!   USED; `Free` records are ignored because frees are deferred to commit.
//!
//! The lane is truncated afterwards.

use nvobj_core::Result;
use nvobj_storage::{release_on_media, Region};
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{info, warn};

use crate::journal::{list_lanes, read_lane, UndoRecord, LANE_HEADER_SIZE};

/// Statistics from lane recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryStats {
    /// Lane files examined
    pub lanes_scanned: usize,
    /// Uncommitted transactions rolled back
    pub rolled_back: usize,
    /// Committed transactions whose frees were re-applied
    pub rolled_forward: usize,
    /// Snapshot ranges written back
    pub ranges_restored: usize,
    /// Allocations released by rollback
    pub allocations_released: usize,
    /// Deferred frees applied by roll forward
    pub frees_applied: usize,
    /// Lanes that ended in a torn record
    pub torn_tails: usize,
}

impl RecoveryStats {
    /// True if recovery changed nothing.
    pub fn is_clean(&self) -> bool {
        self.rolled_back == 0 && self.rolled_forward == 0
    }
}

/// Recover every lane in `dir` against `region`.
pub fn recover(dir: &Path, region: &Region, pool_id: u64) -> Result<RecoveryStats> {
    let mut stats = RecoveryStats::default();

    for path in list_lanes(dir)? {
        stats.lanes_scanned += 1;
        let contents = read_lane(&path)?;
        if contents.pool_id != pool_id {
            warn!(
                target: "nvobj::recovery",
                lane = contents.lane,
                lane_pool = contents.pool_id,
                pool_id,
                "Discarding lane that belongs to another pool"
            );
            truncate_lane(&path)?;
            continue;
        }
        if contents.torn_tail {
            stats.torn_tails += 1;
        }
        if contents.records.is_empty() {
            continue;
        }

        if contents.is_committed() {
            for record in &contents.records {
                if let UndoRecord::Free { off } = record {
                    if release_on_media(region, *off)? {
                        stats.frees_applied += 1;
                    }
                }
            }
            stats.rolled_forward += 1;
            info!(
                target: "nvobj::recovery",
                lane = contents.lane,
                records = contents.records.len(),
                "Rolled committed transaction forward"
            );
        } else {
            for record in contents.records.iter().rev() {
                match record {
                    UndoRecord::Range { off, bytes } => {
                        region.write_bytes(*off, bytes)?;
                        region.persist(*off, bytes.len())?;
                        stats.ranges_restored += 1;
                    }
                    UndoRecord::Alloc { off } => {
                        if release_on_media(region, *off)? {
                            stats.allocations_released += 1;
                        }
                    }
                    UndoRecord::Free { .. } | UndoRecord::Commit => {}
                }
            }
            stats.rolled_back += 1;
            info!(
                target: "nvobj::recovery",
                lane = contents.lane,
                records = contents.records.len(),
                "Rolled back interrupted transaction"
            );
        }
        truncate_lane(&path)?;
    }

    if !stats.is_clean() {
        info!(
            target: "nvobj::recovery",
            lanes = stats.lanes_scanned,
            rolled_back = stats.rolled_back,
            rolled_forward = stats.rolled_forward,
            ranges_restored = stats.ranges_restored,
            "Lane recovery complete"
        );
    }
    Ok(stats)
}

fn truncate_lane(path: &Path) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(LANE_HEADER_SIZE)?;
    file.sync_all()?;
    Ok(())
}
