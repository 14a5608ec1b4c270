//! Integration tests for the allocator bridge.
//!
//! Transactional alloc/free against the undo log, array construction,
//! atomic allocation and typed iteration over what was allocated.

#[path = "../common/mod.rs"]
mod common;

mod arrays;
mod iteration;
mod objects;
