//! Core types and traits for nvobj
//!
//! This crate defines the foundational types used throughout the system:
//! - Oid / TypeNum / TxStage: identity and stage types
//! - PersistentPtr: location-independent typed pointer
//! - Persistent / Polymorphic / Extends: what may live in a pool
//! - DispatchSlot: validated dispatch-table word for polymorphic types
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatch;
pub mod error;
pub mod ptr;
pub mod traits;
pub mod types;

pub use dispatch::DispatchSlot;
pub use error::{Error, Result};
pub use ptr::PersistentPtr;
pub use traits::{Extends, Persistent, Polymorphic};
pub use types::{Oid, TxStage, TypeNum, NULL_OFFSET};

// Re-exported so downstream crates derive against the same bytemuck.
pub use bytemuck;
