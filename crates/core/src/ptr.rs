//! Location-independent persistent pointer
//!
//! A [`PersistentPtr<T>`] is a (pool identity, offset) pair. It never caches
//! an address: resolution always goes through the pool's current mapping, so
//! a pointer written in one run stays valid after the pool is re-mapped at a
//! different base in the next.
//!
//! The pointer is itself `Persistent` and is meant to be embedded in
//! persisted structures. Its own stored bytes are transactional data like any
//! other field.

use crate::traits::{Extends, Persistent};
use crate::types::{Oid, NULL_OFFSET};
use bytemuck::{Pod, Zeroable};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;

/// Typed persistent pointer.
///
/// Equality, ordering and hashing compare the offset only; the pool
/// identity is implied to match within a single pool.
#[repr(C)]
pub struct PersistentPtr<T> {
    oid: Oid,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PersistentPtr<T> {
    /// The null pointer.
    pub const fn null() -> Self {
        PersistentPtr {
            oid: Oid::NULL,
            _marker: PhantomData,
        }
    }

    /// Construct from raw parts.
    pub const fn new(pool_id: u64, off: u64) -> Self {
        PersistentPtr {
            oid: Oid::new(pool_id, off),
            _marker: PhantomData,
        }
    }

    /// Construct from a raw identifier.
    pub const fn from_oid(oid: Oid) -> Self {
        PersistentPtr {
            oid,
            _marker: PhantomData,
        }
    }

    /// Raw identifier.
    pub const fn oid(&self) -> Oid {
        self.oid
    }

    /// Byte offset from the pool base.
    pub const fn offset(&self) -> u64 {
        self.oid.off
    }

    /// Identity of the owning pool.
    pub const fn pool_id(&self) -> u64 {
        self.oid.pool_id
    }

    /// True if this is the null pointer.
    pub const fn is_null(&self) -> bool {
        self.oid.off == NULL_OFFSET
    }

    /// Pointer `n` elements past this one.
    pub fn add(self, n: u64) -> Self {
        let step = n.wrapping_mul(mem::size_of::<T>() as u64);
        Self::new(self.oid.pool_id, self.oid.off.wrapping_add(step))
    }

    /// Pointer `n` elements before this one.
    pub fn sub(self, n: u64) -> Self {
        let step = n.wrapping_mul(mem::size_of::<T>() as u64);
        Self::new(self.oid.pool_id, self.oid.off.wrapping_sub(step))
    }

    /// Pointer offset by a signed number of elements.
    pub fn offset_by(self, n: i64) -> Self {
        if n >= 0 {
            self.add(n as u64)
        } else {
            self.sub(n.unsigned_abs())
        }
    }

    /// Signed element distance from `origin` to `self`.
    ///
    /// Zero-sized element types always report 0.
    pub fn distance(self, origin: Self) -> i64 {
        let size = mem::size_of::<T>() as i64;
        if size == 0 {
            return 0;
        }
        (self.oid.off as i64).wrapping_sub(origin.oid.off as i64) / size
    }

    /// Widen to a pointer to a layout prefix of `T`.
    pub fn upcast<B: Persistent>(self) -> PersistentPtr<B>
    where
        T: Extends<B>,
    {
        PersistentPtr::from_oid(self.oid)
    }

    /// Reinterpret the pointee type.
    ///
    /// # Safety
    ///
    /// The pointed-to bytes must be a valid `U` wherever the pointer is
    /// resolved. Prefer `upcast` or the pool's checked downcast.
    pub unsafe fn cast<U>(self) -> PersistentPtr<U> {
        PersistentPtr::from_oid(self.oid)
    }
}

impl<T: Persistent> PersistentPtr<T> {
    /// Project to a field of the pointee.
    ///
    /// The projection is evaluated against a zeroed template to compute the
    /// field's byte offset, so the closure must return a reference into its
    /// argument. A null pointer projects to null.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let next: PersistentPtr<PersistentPtr<Node>> = node.field(|n| &n.next);
    /// tx.write(next, new_node)?;
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the returned reference does not lie within `T`.
    pub fn field<F: Persistent>(self, project: impl FnOnce(&T) -> &F) -> PersistentPtr<F> {
        if self.is_null() {
            return PersistentPtr::null();
        }
        let template = T::zeroed();
        let base = &template as *const T as usize;
        let field = project(&template) as *const F as usize;
        assert!(
            field >= base && field + mem::size_of::<F>() <= base + mem::size_of::<T>(),
            "field projection must return a reference into the pointee"
        );
        PersistentPtr::new(self.oid.pool_id, self.oid.off + (field - base) as u64)
    }
}

impl<T> Clone for PersistentPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PersistentPtr<T> {}

impl<T> Default for PersistentPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> PartialEq for PersistentPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.oid.off == other.oid.off
    }
}

impl<T> Eq for PersistentPtr<T> {}

impl<T> PartialOrd for PersistentPtr<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PersistentPtr<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.oid.off.cmp(&other.oid.off)
    }
}

impl<T> Hash for PersistentPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.oid.off.hash(state);
    }
}

impl<T> fmt::Debug for PersistentPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentPtr")
            .field("pool_id", &format_args!("{:016x}", self.oid.pool_id))
            .field("off", &format_args!("{:#x}", self.oid.off))
            .finish()
    }
}

// SAFETY: repr(C) wrapper around `Oid` (two u64, no padding) plus a ZST.
unsafe impl<T> Zeroable for PersistentPtr<T> {}
// SAFETY: every bit pattern is a valid (pool_id, off) pair.
unsafe impl<T: 'static> Pod for PersistentPtr<T> {}

impl<T: 'static> Persistent for PersistentPtr<T> {}
