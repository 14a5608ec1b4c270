//! Allocator bridge
//!
//! Transactional allocation and free on top of the pool heap.
//!
//! - An allocation is journaled before it is published, so rollback and
//!   crash recovery both release it. Its bytes are covered without a
//!   snapshot.
//! - A free snapshots the object, runs `Persistent::on_destroy` on the
//!   logged bytes and only schedules the storage release. The block is
//!   returned to the heap after the commit point, so an abort restores the
//!   object's bytes and its existence.
//!
//! The atomic variants on [`Pool`] bypass the undo log: an atomic
//! allocation is all-or-nothing on its own, and an atomic free never runs
//! the destruction hook.

use bytemuck::bytes_of;
use nvobj_core::{Error, Persistent, PersistentPtr, Result, TypeNum};
use nvobj_storage::ObjectInfo;
use std::mem;
use tracing::debug;

use crate::pool::Pool;
use crate::transaction::Transaction;

impl<'p> Transaction<'p> {
    /// Allocate a `T` initialized to `value`.
    ///
    /// # Errors
    ///
    /// - `Error::Scope` if no transaction is active on this thread
    /// - `Error::Allocation` if the pool is out of space; the transaction
    ///   is rolled back
    /// - `Error::Type` if `T` is polymorphic and not registered
    pub fn alloc<T: Persistent>(&self, value: T) -> Result<PersistentPtr<T>> {
        self.alloc_with(|| Ok(value))
    }

    /// Allocate a `T` built by `ctor`.
    ///
    /// A constructor error is returned unchanged and nothing is allocated.
    pub fn alloc_with<T: Persistent>(
        &self,
        ctor: impl FnOnce() -> Result<T>,
    ) -> Result<PersistentPtr<T>> {
        self.with_log(|_, _| Ok(()))?;
        self.pool().require_registered::<T>(T::type_num())?;
        let value = ctor()?;
        let off = self.allocate(mem::size_of::<T>() as u64, T::type_num(), bytes_of(&value))?;
        Ok(PersistentPtr::new(self.pool().id(), off))
    }

    /// Allocate `n` default-initialized elements.
    pub fn alloc_array<T: Persistent + Default>(&self, n: u64) -> Result<PersistentPtr<T>> {
        self.alloc_array_with(n, |_| Ok(T::default()))
    }

    /// Allocate `n` elements copied from `items`.
    pub fn alloc_array_from<T: Persistent>(&self, items: &[T]) -> Result<PersistentPtr<T>> {
        self.alloc_array_with(items.len() as u64, |i| Ok(items[i as usize]))
    }

    /// Allocate `n` elements, building element `i` with `ctor(i)`.
    ///
    /// If a constructor fails, the elements already built are destroyed in
    /// reverse order, the block is scheduled for release and
    /// `Error::Allocation` is returned.
    pub fn alloc_array_with<T: Persistent>(
        &self,
        n: u64,
        mut ctor: impl FnMut(u64) -> Result<T>,
    ) -> Result<PersistentPtr<T>> {
        self.with_log(|_, _| Ok(()))?;
        let pool = self.pool();
        pool.require_registered::<T>(T::type_num())?;
        if n == 0 {
            return Err(Error::Allocation(format!(
                "zero-length array of {}",
                T::type_name()
            )));
        }
        let elem = mem::size_of::<T>() as u64;
        let total = elem.checked_mul(n).ok_or_else(|| {
            Error::Allocation(format!("array of {} x {} bytes overflows", n, elem))
        })?;
        let off = self.allocate(total, T::type_num(), &[])?;

        for i in 0..n {
            let value = match ctor(i) {
                Ok(value) => value,
                Err(cause) => {
                    for j in (0..i).rev() {
                        let at = off + j * elem;
                        let mut built: T = pool.region.read(at)?;
                        built.on_destroy();
                        pool.region.write(at, &built)?;
                    }
                    self.with_log(|log, target| log.record_free(target, off))?;
                    debug!(
                        target: "nvobj::heap",
                        off,
                        element = i,
                        error = %cause,
                        "Array construction failed"
                    );
                    return Err(Error::Allocation(format!(
                        "construction of element {} of {} x {} failed: {}",
                        i,
                        n,
                        T::type_name(),
                        cause
                    )));
                }
            };
            pool.region.write(off + i * elem, &value)?;
        }
        Ok(PersistentPtr::new(pool.id(), off))
    }

    /// Reserve a block, journal it, fill it with `init` and publish it.
    fn allocate(&self, payload: u64, type_num: TypeNum, init: &[u8]) -> Result<u64> {
        let reservation = self.with_log(|log, target| {
            let reservation = target.heap.reserve(target.region, payload.max(1))?;
            if let Err(e) = log.record_alloc(target, reservation.offset(), reservation.usable()) {
                target.heap.cancel(reservation);
                return Err(e);
            }
            Ok(reservation)
        })?;
        let pool = self.pool();
        let off = reservation.offset();
        pool.region.write_bytes(off, init)?;
        pool.heap.publish(&pool.region, reservation, type_num, 0)?;
        Ok(off)
    }

    /// Free the referent of `ptr` and null it. Null is a no-op.
    ///
    /// # Errors
    ///
    /// - `Error::Scope` if no transaction is active on this thread
    /// - `Error::Allocation` if `ptr` is not the start of a live allocation
    ///   or was already freed in this transaction
    pub fn free<T: Persistent>(&self, ptr: &mut PersistentPtr<T>) -> Result<()> {
        self.free_array(ptr, 1)
    }

    /// Free an array of `n` elements starting at `ptr` and null it.
    pub fn free_array<T: Persistent>(&self, ptr: &mut PersistentPtr<T>, n: u64) -> Result<()> {
        self.with_log(|_, _| Ok(()))?;
        if ptr.is_null() {
            return Ok(());
        }
        let pool = self.pool();
        let off = pool.check_oid(ptr.oid(), 0)?;
        let info = pool.heap.object(off).ok_or_else(|| {
            Error::Allocation(format!("{} is not the start of a live allocation", ptr.oid()))
        })?;
        if info.is_root() {
            return Err(Error::Allocation("the root object cannot be freed".into()));
        }
        check_freed_type::<T>(&info)?;
        pool.require_registered::<T>(info.type_num)?;
        let total = (mem::size_of::<T>() as u64)
            .checked_mul(n)
            .filter(|&total| total <= info.size)
            .ok_or_else(|| {
                Error::OutOfRange(format!(
                    "{} elements of {} exceed the {}-byte allocation",
                    n,
                    T::type_name(),
                    info.size
                ))
            })?;

        self.add_range(*ptr, total)?;
        self.with_log(|log, target| log.record_free(target, off))?;
        for i in 0..n {
            let elem = ptr.add(i);
            let mut value = pool.read(elem)?;
            value.on_destroy();
            pool.region.write(elem.offset(), &value)?;
        }
        *ptr = PersistentPtr::null();
        Ok(())
    }

    /// Free the referent of the pointer stored at `slot`, then null the
    /// stored pointer transactionally.
    pub fn free_stored<T: Persistent>(&self, slot: PersistentPtr<PersistentPtr<T>>) -> Result<()> {
        self.free_array_stored(slot, 1)
    }

    /// Array form of `free_stored`.
    pub fn free_array_stored<T: Persistent>(
        &self,
        slot: PersistentPtr<PersistentPtr<T>>,
        n: u64,
    ) -> Result<()> {
        let mut target = self.pool().read(slot)?;
        self.free_array(&mut target, n)?;
        self.write(slot, target)
    }
}

impl Pool {
    /// Allocate `value` outside any transaction.
    ///
    /// The object exists once this returns; a crash before that leaves no
    /// trace.
    pub fn alloc_atomic<T: Persistent>(&self, value: T) -> Result<PersistentPtr<T>> {
        self.alloc_atomic_with(|| Ok(value))
    }

    /// Atomic allocation of a `T` built by `ctor`.
    pub fn alloc_atomic_with<T: Persistent>(
        &self,
        ctor: impl FnOnce() -> Result<T>,
    ) -> Result<PersistentPtr<T>> {
        self.ensure_open()?;
        self.require_registered::<T>(T::type_num())?;
        let value = ctor()?;
        let size = mem::size_of::<T>();
        let reservation = self.heap.reserve(&self.region, (size as u64).max(1))?;
        let off = reservation.offset();
        if let Err(e) = self
            .region
            .write_bytes(off, bytes_of(&value))
            .and_then(|()| self.region.persist(off, size))
        {
            self.heap.cancel(reservation);
            return Err(e);
        }
        self.heap.publish(&self.region, reservation, T::type_num(), 0)?;
        Ok(PersistentPtr::new(self.id(), off))
    }

    /// Free the referent of `ptr` outside any transaction and null it.
    ///
    /// `Persistent::on_destroy` is not run.
    pub fn free_atomic<T: Persistent>(&self, ptr: &mut PersistentPtr<T>) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let off = self.check_oid(ptr.oid(), 0)?;
        if let Some(info) = self.heap.object(off) {
            if info.is_root() {
                return Err(Error::Allocation("the root object cannot be freed".into()));
            }
            check_freed_type::<T>(&info)?;
        }
        let info = self.heap.free(&self.region, off)?;
        self.forget_object(&info);
        *ptr = PersistentPtr::null();
        Ok(())
    }
}

/// Frees go through a pointer of the allocation's own type; a base pointer
/// must be downcast first.
fn check_freed_type<T: Persistent>(info: &ObjectInfo) -> Result<()> {
    if info.type_num != T::type_num() {
        return Err(Error::Type(format!(
            "allocation {:#x} has type {}, not {}",
            info.off,
            info.type_num,
            T::type_name()
        )));
    }
    Ok(())
}
