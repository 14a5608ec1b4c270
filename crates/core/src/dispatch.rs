//! Dispatch-table slots for polymorphic persistent types
//!
//! A polymorphic persistent object stores the address of a `'static` table
//! of function pointers. That address is only meaningful for the process
//! image that wrote it, so a reloaded object may hold a stale slot.
//!
//! Every table handed to [`DispatchSlot::new`] is recorded in a process-wide
//! set. [`DispatchSlot::table`] only dereferences addresses from that set, so
//! an unrepaired slot is reported as `Error::Type` instead of being followed.

use crate::error::{Error, Result};
use bytemuck::{Pod, Zeroable};
use dashmap::DashSet;
use once_cell::sync::Lazy;
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;

/// Tables constructed by this process image, keyed by table type.
static KNOWN_TABLES: Lazy<DashSet<(TypeId, u64)>> = Lazy::new(DashSet::new);

/// Persistent word holding the address of a `&'static V` dispatch table.
#[repr(transparent)]
pub struct DispatchSlot<V: 'static> {
    addr: u64,
    _marker: PhantomData<fn() -> &'static V>,
}

impl<V: 'static> DispatchSlot<V> {
    /// Slot pointing at `table`.
    pub fn new(table: &'static V) -> Self {
        let addr = table as *const V as usize as u64;
        KNOWN_TABLES.insert((TypeId::of::<V>(), addr));
        DispatchSlot {
            addr,
            _marker: PhantomData,
        }
    }

    /// Slot holding an arbitrary word, as found in a reloaded object.
    pub const fn from_raw(addr: u64) -> Self {
        DispatchSlot {
            addr,
            _marker: PhantomData,
        }
    }

    /// Resolve the table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Type` if the stored word is not a table of type `V`
    /// constructed by this process image.
    pub fn table(&self) -> Result<&'static V> {
        if !self.is_valid() {
            return Err(Error::Type(format!(
                "stale dispatch table {:#x}; object was not repaired after reload",
                self.addr
            )));
        }
        // SAFETY: the address came from a `&'static V` in this process image.
        Ok(unsafe { &*(self.addr as usize as *const V) })
    }

    /// True if the slot resolves in this process image.
    pub fn is_valid(&self) -> bool {
        self.addr != 0 && KNOWN_TABLES.contains(&(TypeId::of::<V>(), self.addr))
    }

    /// Stored word.
    pub const fn raw(&self) -> u64 {
        self.addr
    }
}

impl<V: 'static> Clone for DispatchSlot<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V: 'static> Copy for DispatchSlot<V> {}

impl<V: 'static> fmt::Debug for DispatchSlot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DispatchSlot({:#x})", self.addr)
    }
}

// SAFETY: transparent over u64.
unsafe impl<V: 'static> Zeroable for DispatchSlot<V> {}
// SAFETY: any word is representable; `table` validates before use.
unsafe impl<V: 'static> Pod for DispatchSlot<V> {}
