//! Global registry of active pools
//!
//! Ensures only one `Pool` instance exists per filesystem path, and lets a
//! bare `PersistentPtr` find the pool it belongs to by pool identity.
//! Uses weak references so pools are cleaned up when dropped.

use nvobj_core::{Error, Persistent, PersistentPtr, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

use super::Pool;

// =============================================================================
// Global Pool Registry
// =============================================================================
//
// Opening the same path twice returns the same Pool. A second pool with the
// same identity (a copied pool file) cannot be active at the same time,
// because pointer resolution is keyed by identity alone.
//
// Uses parking_lot::Mutex so a panic elsewhere cannot poison the registry.

/// Active pools by canonical path and by pool identity.
#[derive(Default)]
pub(crate) struct PoolRegistry {
    pub(crate) by_path: HashMap<PathBuf, Weak<Pool>>,
    pub(crate) by_id: FxHashMap<u64, Weak<Pool>>,
}

impl PoolRegistry {
    /// Live pool at `path`, if any.
    pub(crate) fn live_at(&self, path: &Path) -> Option<Arc<Pool>> {
        self.by_path.get(path).and_then(Weak::upgrade)
    }

    /// Fail if a live pool already uses `pool_id`.
    pub(crate) fn ensure_id_free(&self, pool_id: u64) -> Result<()> {
        match self.by_id.get(&pool_id) {
            Some(weak) if weak.strong_count() > 0 => Err(Error::Pool(format!(
                "a pool with identity {:016x} is already open",
                pool_id
            ))),
            _ => Ok(()),
        }
    }

    pub(crate) fn insert(&mut self, pool: &Arc<Pool>) {
        if let Some(path) = pool.path() {
            self.by_path.insert(path.to_path_buf(), Arc::downgrade(pool));
        }
        self.by_id.insert(pool.id(), Arc::downgrade(pool));
    }

    /// Remove entries that point at `pool`.
    pub(crate) fn remove_instance(&mut self, pool: &Pool) {
        let this = pool as *const Pool;
        self.by_path.retain(|_, w| w.as_ptr() != this);
        self.by_id.retain(|_, w| w.as_ptr() != this);
    }

    /// Remove entries whose pool has been dropped.
    pub(crate) fn remove_dead(&mut self, pool_id: u64, path: Option<&Path>) {
        if let Some(path) = path {
            if self.by_path.get(path).map_or(false, |w| w.strong_count() == 0) {
                self.by_path.remove(path);
            }
        }
        if self.by_id.get(&pool_id).map_or(false, |w| w.strong_count() == 0) {
            self.by_id.remove(&pool_id);
        }
    }
}

/// Global registry of open pools
pub(crate) static OPEN_POOLS: Lazy<Mutex<PoolRegistry>> =
    Lazy::new(|| Mutex::new(PoolRegistry::default()));

/// The active pool with identity `pool_id`.
pub fn lookup(pool_id: u64) -> Option<Arc<Pool>> {
    // the upgraded Arc must outlive the guard: dropping the last strong
    // reference here would re-enter the registry from Pool::drop
    let pool = OPEN_POOLS.lock().by_id.get(&pool_id).and_then(Weak::upgrade);
    pool
}

/// Resolution of persistent pointers through the active-pool registry.
///
/// Useful where only the pointer travels, e.g. inside persisted data
/// structures that do not carry a pool handle.
pub trait PersistentPtrExt<T> {
    /// The active pool this pointer belongs to.
    fn pool(&self) -> Result<Arc<Pool>>;

    /// Copy the referent out (with dispatch repair).
    fn load(&self) -> Result<T>;

    /// Transient address of the referent.
    ///
    /// Valid only while the owning pool stays open and mapped.
    fn resolve(&self) -> Result<NonNull<T>>;
}

impl<T: Persistent> PersistentPtrExt<T> for PersistentPtr<T> {
    fn pool(&self) -> Result<Arc<Pool>> {
        if self.is_null() {
            return Err(Error::NullDereference(
                "cannot resolve the pool of a null pointer".into(),
            ));
        }
        lookup(self.pool_id()).ok_or_else(|| {
            Error::Pool(format!("no active pool with identity {:016x}", self.pool_id()))
        })
    }

    fn load(&self) -> Result<T> {
        self.pool()?.read(*self)
    }

    fn resolve(&self) -> Result<NonNull<T>> {
        self.pool()?.direct(*self)
    }
}
