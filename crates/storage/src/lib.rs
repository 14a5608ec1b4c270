//! Storage layer for nvobj
//!
//! This crate implements the pool media underneath the object model:
//! - Region: memory-mapped pool file (or anonymous map) with bounds-checked
//!   access and range persistence
//! - format: pool header and heap block layouts
//! - Heap: block allocator with a volatile index rebuilt on load
//!
//! Nothing here knows about transactions. The durability and concurrency
//! crates layer undo logging on top of these primitives.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod format;
pub mod heap;
pub mod region;

pub use format::{verify_image, BlockHeader, PoolHeader, HEAP_OFFSET, MIN_POOL_SIZE};
pub use heap::{release_on_media, Heap, HeapStats, ObjectInfo, Reservation};
pub use region::Region;
