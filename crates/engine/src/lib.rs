//! Pool engine for nvobj
//!
//! This crate ties the lower layers together:
//! - Pool: create/open/close, root object, pointer resolution
//! - Transaction: nested undo-log frames over the thread's stack
//! - Allocator bridge: transactional and atomic alloc/free
//! - Persistent locks and their attachment to transactions
//! - Type registry and dispatch repair
//! - Typed iteration
//!
//! The engine is the only component that knows about:
//! - The active-pool registry
//! - Run ids (abandoned-lock detection)
//! - Cross-layer coordination (heap + undo log + journal)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alloc;
pub mod iter;
pub mod pool;
pub mod pstring;
pub mod sync;
pub mod transaction;
pub mod types;

pub use iter::ObjIter;
pub use pool::{lookup, PersistentPtrExt, Pool, PoolBuilder, PoolConfig};
pub use pstring::PString;
pub use sync::{CondvarRef, MutexRef, PCondvar, PLockGuard, PMutex, PRwLock, RwLockRef, TxLock};
pub use transaction::Transaction;
pub use types::{Runtime, TypeEntry, TypeRegistry};
