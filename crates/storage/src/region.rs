//! Memory-mapped persistent region
//!
//! A [`Region`] owns one mapping of a pool file (or an anonymous mapping for
//! ephemeral pools). All access is offset based and bounds checked; no
//! reference into the mapping escapes this module except the transient
//! address returned by [`Region::address`].
//!
//! `persist` is the durability primitive: it flushes a byte range of a
//! file-backed mapping to stable storage and is a no-op for anonymous ones.

use bytemuck::Pod;
use memmap2::MmapMut;
use nvobj_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::ptr::{self, NonNull};

/// A mapped persistent region.
pub struct Region {
    map: MmapMut,
    base: NonNull<u8>,
    len: u64,
    durable: bool,
    _file: Option<File>,
}

// SAFETY: the mapping is shared memory addressed by offset. All accesses go
// through bounds-checked raw copies; synchronising concurrent writers to the
// same bytes is the caller's job, as with any shared persistent memory.
unsafe impl Send for Region {}
// SAFETY: see above.
unsafe impl Sync for Region {}

impl Region {
    /// Create a new pool file of `size` bytes and map it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Pool` if the file already exists.
    pub fn create(path: &Path, size: u64, mode: u32) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = opts.open(path).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => {
                Error::Pool(format!("pool file '{}' already exists", path.display()))
            }
            _ => Error::Io(e),
        })?;
        file.set_len(size)?;
        Self::map_file(file, size)
    }

    /// Map an existing pool file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    Error::Pool(format!("pool file '{}' does not exist", path.display()))
                }
                _ => Error::Io(e),
            })?;
        let size = file.metadata()?.len();
        Self::map_file(file, size)
    }

    /// Anonymous zero-filled mapping with no backing file.
    pub fn anonymous(size: u64) -> Result<Self> {
        let mut map = MmapMut::map_anon(size as usize)?;
        let base = NonNull::new(map.as_mut_ptr())
            .ok_or_else(|| Error::Pool("anonymous mapping returned null".into()))?;
        Ok(Region {
            map,
            base,
            len: size,
            durable: false,
            _file: None,
        })
    }

    fn map_file(file: File, size: u64) -> Result<Self> {
        if size == 0 {
            return Err(Error::Pool("pool file is empty".into()));
        }
        // SAFETY: the pool file is locked by the owning pool; concurrent
        // modification by other processes is excluded.
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        let base = NonNull::new(map.as_mut_ptr())
            .ok_or_else(|| Error::Pool("mapping returned null".into()))?;
        Ok(Region {
            map,
            base,
            len: size,
            durable: true,
            _file: Some(file),
        })
    }

    /// Length of the region in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True for a zero-length region.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if `persist` reaches stable storage.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    fn check(&self, off: u64, len: usize) -> Result<usize> {
        match off.checked_add(len as u64) {
            Some(end) if end <= self.len => Ok(off as usize),
            _ => Err(Error::OutOfRange(format!(
                "range {:#x}+{} exceeds region of {} bytes",
                off, len, self.len
            ))),
        }
    }

    /// Copy bytes out of the region.
    pub fn read_into(&self, off: u64, buf: &mut [u8]) -> Result<()> {
        let start = self.check(off, buf.len())?;
        // SAFETY: bounds checked above; the mapping outlives `self`.
        unsafe {
            ptr::copy_nonoverlapping(self.base.as_ptr().add(start), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Copy `len` bytes out of the region.
    pub fn read_bytes(&self, off: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(off, &mut buf)?;
        Ok(buf)
    }

    /// Copy bytes into the region (not persisted).
    pub fn write_bytes(&self, off: u64, data: &[u8]) -> Result<()> {
        let start = self.check(off, data.len())?;
        // SAFETY: bounds checked above; the mapping outlives `self`.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.base.as_ptr().add(start), data.len());
        }
        Ok(())
    }

    /// Zero `len` bytes (not persisted).
    pub fn zero(&self, off: u64, len: usize) -> Result<()> {
        let start = self.check(off, len)?;
        // SAFETY: bounds checked above.
        unsafe {
            ptr::write_bytes(self.base.as_ptr().add(start), 0, len);
        }
        Ok(())
    }

    /// Read a plain-bytes value.
    pub fn read<T: Pod>(&self, off: u64) -> Result<T> {
        let start = self.check(off, std::mem::size_of::<T>())?;
        // SAFETY: bounds checked; `T: Pod` accepts any bit pattern.
        Ok(unsafe { ptr::read_unaligned(self.base.as_ptr().add(start) as *const T) })
    }

    /// Write a plain-bytes value (not persisted).
    pub fn write<T: Pod>(&self, off: u64, value: &T) -> Result<()> {
        self.write_bytes(off, bytemuck::bytes_of(value))
    }

    /// Flush a byte range to stable storage.
    pub fn persist(&self, off: u64, len: usize) -> Result<()> {
        let start = self.check(off, len)?;
        if !self.durable || len == 0 {
            return Ok(());
        }
        self.map.flush_range(start, len)?;
        Ok(())
    }

    /// Write a value and flush it.
    pub fn write_persist<T: Pod>(&self, off: u64, value: &T) -> Result<()> {
        self.write(off, value)?;
        self.persist(off, std::mem::size_of::<T>())
    }

    /// Flush the whole mapping.
    pub fn persist_all(&self) -> Result<()> {
        if self.durable {
            self.map.flush()?;
        }
        Ok(())
    }

    /// Transient address of `off` under the current mapping.
    ///
    /// Valid only while this region lives. Writes through it bypass undo
    /// logging entirely.
    pub fn address(&self, off: u64, len: usize) -> Result<NonNull<u8>> {
        let start = self.check(off, len)?;
        // SAFETY: in bounds of a non-null mapping.
        Ok(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(start)) })
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("len", &self.len)
            .field("durable", &self.durable)
            .finish()
    }
}
