//! Core trait definitions
//!
//! - [`Persistent`]: a plain-bytes type that may live inside a pool
//! - [`Polymorphic`]: a persistent type carrying dispatch metadata that must
//!   be repaired after reload
//! - [`Extends`]: layout prefix relation used for pointer widening

use crate::types::TypeNum;
use bytemuck::Pod;

/// A type that can be stored in persistent memory.
///
/// Implementors must be `Pod`: no native references, no heap ownership, no
/// padding. References to other persistent objects are expressed with
/// `PersistentPtr<T>`.
///
/// # Example
///
/// ```ignore
/// #[repr(C)]
/// #[derive(Clone, Copy, Pod, Zeroable)]
/// struct Counter {
///     hits: u64,
///     misses: u64,
/// }
///
/// impl Persistent for Counter {}
/// ```
pub trait Persistent: Pod {
    /// Name used to derive the type number.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Stable key recorded in allocation headers for this type.
    fn type_num() -> TypeNum {
        TypeNum::of_name(Self::type_name())
    }

    /// Byte offsets of dispatch-table slots inside the type.
    ///
    /// Non-empty only for polymorphic types. Each offset must be 8-byte
    /// aligned and address a `DispatchSlot`.
    fn dispatch_offsets() -> &'static [usize] {
        &[]
    }

    /// In-place destruction hook run by transactional free.
    ///
    /// Runs on an undo-logged copy, so anything it changes is restored if the
    /// transaction aborts. Atomic free never calls it.
    fn on_destroy(&mut self) {}
}

/// A persistent type whose representation embeds dispatch tables.
///
/// `template` builds the canonical instance for the current process image;
/// type registration records its dispatch slots so that stale slots in
/// reloaded objects can be overwritten.
pub trait Polymorphic: Persistent {
    /// Canonical instance: every declared dispatch slot set, other fields zero.
    fn template() -> Self;
}

/// Declares that `Base` is laid out as a prefix of `Self`.
///
/// # Safety
///
/// `Self` must be `#[repr(C)]` and its first field must be `Base` (or a type
/// that itself extends `Base`), so the bytes at offset 0 of every `Self` are
/// a valid `Base`.
pub unsafe trait Extends<Base: Persistent>: Persistent {}

// SAFETY: every type is a prefix of itself.
unsafe impl<T: Persistent> Extends<T> for T {}

macro_rules! impl_persistent_scalar {
    ($($t:ty),*) => {
        $(impl Persistent for $t {})*
    };
}

impl_persistent_scalar!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl<T: Persistent, const N: usize> Persistent for [T; N] {
    fn on_destroy(&mut self) {
        for elem in self.iter_mut() {
            elem.on_destroy();
        }
    }
}
