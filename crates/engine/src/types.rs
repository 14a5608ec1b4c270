//! Type registry and process runtime
//!
//! A polymorphic persistent type stores dispatch-table addresses that are
//! only valid for the process image that wrote them. Registering a type
//! records, from its canonical template, the value of every declared
//! dispatch slot. Pools use the entry of an allocation's recorded type number
//! to overwrite stale slots the first time the allocation is resolved in a
//! run.
//!
//! Dispatch slots are declared explicitly by `Persistent::dispatch_offsets`.
//! No heuristic scan of the template's words takes place.

use bytemuck::bytes_of;
use nvobj_core::{Error, Polymorphic, Result, TypeNum};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::mem;
use std::sync::Arc;
use tracing::debug;

/// Canonical dispatch pattern of one registered type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry {
    /// Stable key recorded in allocation headers
    pub type_num: TypeNum,
    /// Name the key was derived from
    pub type_name: &'static str,
    /// Size of one instance in bytes
    pub size: usize,
    words: Vec<(usize, u64)>,
}

impl TypeEntry {
    /// (byte offset, canonical value) of every dispatch slot, ascending.
    pub fn words(&self) -> &[(usize, u64)] {
        &self.words
    }
}

/// Registered polymorphic types, keyed by type number.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    entries: RwLock<FxHashMap<TypeNum, Arc<TypeEntry>>>,
}

impl TypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` and return its type number.
    ///
    /// # Errors
    ///
    /// Returns `Error::Type` if:
    /// - `T` declares no dispatch slot, or a slot that is misaligned, out of
    ///   bounds, or zero in the template
    /// - `T` is already registered
    /// - another registered type maps to the same type number
    pub fn register<T: Polymorphic>(&self) -> Result<TypeNum> {
        let type_num = T::type_num();
        let type_name = T::type_name();
        let size = mem::size_of::<T>();

        let offsets = T::dispatch_offsets();
        if offsets.is_empty() {
            return Err(Error::Type(format!(
                "{} declares no dispatch slots",
                type_name
            )));
        }

        let template = T::template();
        let bytes = bytes_of(&template);
        let mut words = Vec::with_capacity(offsets.len());
        for &off in offsets {
            if off % 8 != 0 || off + 8 > size {
                return Err(Error::Type(format!(
                    "{}: dispatch slot at byte {} is not an aligned word inside {} bytes",
                    type_name, off, size
                )));
            }
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[off..off + 8]);
            let value = u64::from_ne_bytes(word);
            if value == 0 {
                return Err(Error::Type(format!(
                    "{}: template leaves dispatch slot at byte {} unset",
                    type_name, off
                )));
            }
            words.push((off, value));
        }
        words.sort_unstable();
        words.dedup();

        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&type_num) {
            return Err(if existing.type_name == type_name {
                Error::Type(format!("type {} is already registered", type_name))
            } else {
                Error::Type(format!(
                    "type number {} of {} collides with registered type {}",
                    type_num, type_name, existing.type_name
                ))
            });
        }
        entries.insert(
            type_num,
            Arc::new(TypeEntry {
                type_num,
                type_name,
                size,
                words,
            }),
        );
        debug!(target: "nvobj::types", type_name, %type_num, slots = offsets.len(), "Registered type");
        Ok(type_num)
    }

    /// Entry for `type_num`.
    pub fn get(&self, type_num: TypeNum) -> Option<Arc<TypeEntry>> {
        self.entries.read().get(&type_num).cloned()
    }

    /// True if `T` is registered.
    pub fn is_registered<T: Polymorphic>(&self) -> bool {
        self.entries.read().contains_key(&T::type_num())
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Process-wide context shared by every pool opened without an explicit
/// type registry.
///
/// Initialized at most once per process and never torn down.
#[derive(Debug)]
pub struct Runtime {
    types: Arc<TypeRegistry>,
}

impl Runtime {
    /// Install the process runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the runtime was already initialized.
    pub fn init(types: TypeRegistry) -> Result<&'static Runtime> {
        RUNTIME
            .set(Runtime {
                types: Arc::new(types),
            })
            .map_err(|_| Error::Config("process runtime is already initialized".into()))?;
        RUNTIME
            .get()
            .ok_or_else(|| Error::Config("process runtime failed to initialize".into()))
    }

    /// The process runtime, if initialized.
    pub fn get() -> Option<&'static Runtime> {
        RUNTIME.get()
    }

    /// The process type registry.
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }
}
