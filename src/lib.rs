//! nvobj - transactional objects in persistent memory pools
//!
//! nvobj lets ordinary `#[repr(C)]` data structures live in a memory-mapped
//! pool file and be mutated crash-safely:
//!
//! - [`PersistentPtr`]: a (pool, offset) pointer valid across re-mappings
//! - [`Transaction`]: nested undo-log transactions with rollback on abort
//! - transactional and atomic allocation
//! - persistent locks ([`PMutex`], [`PRwLock`], [`PCondvar`]) that
//!   transactions release at commit or abort
//! - a [`TypeRegistry`] that repairs dispatch tables of polymorphic objects
//!   after a restart
//!
//! # Quick Start
//!
//! ```ignore
//! use nvobj::prelude::*;
//!
//! #[repr(C)]
//! #[derive(Clone, Copy, Pod, Zeroable)]
//! struct Root {
//!     a: u64,
//!     b: u64,
//! }
//!
//! impl Persistent for Root {}
//!
//! let pool = Pool::create("/mnt/pmem/data.pool", "example", 0)?;
//! let root = pool.root::<Root>()?;
//!
//! pool.transaction(|tx| {
//!     tx.write(root.field(|r| &r.a), 5u64)?;
//!     tx.write(root.field(|r| &r.b), 10u64)
//! })?;
//! ```
//!
//! # Architecture
//!
//! The storage, durability and concurrency layers are internal. Their few
//! types that show up in the public API are re-exported here.

pub use nvobj_core::{
    DispatchSlot, Error, Extends, Oid, Persistent, PersistentPtr, Polymorphic, Result, TxStage,
    TypeNum,
};
pub use nvobj_concurrency::{WORD_EXCLUSIVE, WORD_UNLOCKED};
pub use nvobj_durability::{DurabilityMode, RecoveryStats};
pub use nvobj_engine::{
    lookup, CondvarRef, MutexRef, ObjIter, PCondvar, PLockGuard, PMutex, PRwLock, PString,
    PersistentPtrExt, Pool, PoolBuilder, PoolConfig, Runtime, RwLockRef, Transaction, TxLock,
    TypeEntry, TypeRegistry,
};
pub use nvobj_storage::HeapStats;

/// `Pod`/`Zeroable` for deriving persistent types.
pub use bytemuck;

/// Everything needed to define persistent types and run transactions.
pub mod prelude {
    pub use crate::{
        DispatchSlot, Error, Extends, Persistent, PersistentPtr, PersistentPtrExt, Polymorphic,
        Pool, Result, Transaction, TxLock, TxStage,
    };
    pub use bytemuck::{Pod, Zeroable};
}
