//! Persistent string

use bytemuck::{Pod, Zeroable};
use nvobj_core::{Error, Persistent, PersistentPtr, Result};

use crate::pool::Pool;
use crate::transaction::Transaction;

/// UTF-8 string stored as a byte array in the pool.
///
/// The value itself is two pointers wide and is meant to be embedded in
/// persisted structures. An empty string owns no allocation.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PString {
    data: PersistentPtr<u8>,
    len: u64,
}

impl Persistent for PString {}

impl PString {
    /// Allocate a copy of `s` in the transaction.
    pub fn new(tx: &Transaction<'_>, s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(PString::default());
        }
        Ok(PString {
            data: tx.alloc_array_from(s.as_bytes())?,
            len: s.len() as u64,
        })
    }

    /// Copy the string out of `pool`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corruption` if the stored bytes are not UTF-8.
    pub fn read(&self, pool: &Pool) -> Result<String> {
        if self.len == 0 {
            return Ok(String::new());
        }
        let bytes = pool.read_bytes(self.data, self.len)?;
        String::from_utf8(bytes).map_err(|e| Error::Corruption(format!("string is not UTF-8: {}", e)))
    }

    /// Release the storage. The value becomes empty.
    pub fn free(&mut self, tx: &Transaction<'_>) -> Result<()> {
        tx.free_array(&mut self.data, self.len)?;
        self.len = 0;
        Ok(())
    }

    /// Replace the string stored at `slot` with `s`, freeing the old one.
    pub fn store(tx: &Transaction<'_>, slot: PersistentPtr<PString>, s: &str) -> Result<()> {
        let mut old = tx.pool().read(slot)?;
        old.free(tx)?;
        tx.write(slot, PString::new(tx, s)?)
    }

    /// Length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True for the empty string.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
