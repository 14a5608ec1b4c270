//! Durability layer for nvobj
//!
//! This crate handles everything that makes a transaction crash safe:
//!
//! - Durability modes: Always (default), Cache
//! - Lane journals: per-transaction durable undo records (`lane-NNN.log`)
//! - Lane pool: bounded set of lanes shared by a pool's threads
//! - Recovery: roll interrupted transactions back, committed ones forward

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod journal;
pub mod lanes;
pub mod mode;
pub mod recovery;

pub use journal::{
    lane_path, list_lanes, read_lane, LaneContents, LaneJournal, UndoRecord, LANE_HEADER_SIZE,
};
pub use lanes::{LaneGuard, LaneSet};
pub use mode::DurabilityMode;
pub use recovery::{recover, RecoveryStats};
