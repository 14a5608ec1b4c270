//! Integration tests for the transaction engine.
//!
//! These tests drive transactions through the public `nvobj` API against
//! file-backed pools: commit and abort scenarios, nesting, error
//! propagation and the documented hazard of unlogged writes.

#[path = "../common/mod.rs"]
mod common;

mod properties;
mod scenarios;
