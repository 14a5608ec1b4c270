//! Identity types shared by every layer
//!
//! - [`Oid`]: raw (pool identity, byte offset) pair stored in persistent memory
//! - [`TypeNum`]: stable per-type key recorded in every allocation header
//! - [`TxStage`]: observable stage of a thread's transaction stack

use bytemuck::{Pod, Zeroable};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// Offset reserved as the NULL sentinel.
///
/// Offset 0 always falls inside the pool header, so no object can live there.
pub const NULL_OFFSET: u64 = 0;

/// Raw persistent object identifier.
///
/// Location independent: it never stores an address, only the owning pool's
/// identity and the byte offset from the pool base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Oid {
    /// Identity of the owning pool (stable across opens)
    pub pool_id: u64,
    /// Byte offset from the pool base
    pub off: u64,
}

impl Oid {
    /// The null identifier.
    pub const NULL: Oid = Oid {
        pool_id: 0,
        off: NULL_OFFSET,
    };

    /// Create an identifier from its parts.
    pub const fn new(pool_id: u64, off: u64) -> Self {
        Oid { pool_id, off }
    }

    /// True if the offset is the NULL sentinel.
    pub const fn is_null(&self) -> bool {
        self.off == NULL_OFFSET
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}:{:#x}", self.pool_id, self.off)
    }
}

/// Stable type identifier.
///
/// Derived deterministically from the type's name with xxh3, so the same
/// type maps to the same key in every process that links it. Zero is
/// reserved for untyped allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeNum(pub u64);

impl TypeNum {
    /// Key for raw, untyped storage.
    pub const UNTYPED: TypeNum = TypeNum(0);

    /// Derive the key for a type name.
    pub fn of_name(name: &str) -> Self {
        match xxh3_64(name.as_bytes()) {
            0 => TypeNum(1),
            h => TypeNum(h),
        }
    }

    /// Raw value as stored in block headers.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TypeNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Stage of the calling thread's transaction for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStage {
    /// No transaction is active
    None,
    /// Inside an active transaction (any nesting depth)
    Work,
    /// The transaction was aborted; frames are still unwinding
    OnAbort,
    /// The outermost frame is committing
    OnCommit,
    /// Commit or rollback completed; the frame is being torn down
    Final,
}

impl TxStage {
    /// True while mutations may be registered.
    pub fn is_work(self) -> bool {
        self == TxStage::Work
    }
}
