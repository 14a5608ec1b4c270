//! Pool header format.
//!
//! The header occupies the start of the pool; the heap begins at
//! [`HEAP_OFFSET`].
//!
//! ```text
//! ┌──────────┬─────────┬───────┬────────────┬─────────┬──────┬─────────────┐
//! │ Magic (8)│ Ver (4) │ Flg(4)│ Layout (64)│ PoolId 8│ Size │ HeapOff (8) │  immutable, checksummed
//! ├──────────┴─────────┴───────┴────────────┴─────────┴──────┴─────────────┤
//! │ RootOff (8) │ RootSize (8) │ RootType (8) │ RunId (8) │ CRC32 │ pad    │  mutable
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

use bytemuck::{Pod, Zeroable};
use nvobj_core::{Error, Result};

/// Magic bytes identifying a pool file: "NVOBJPL\0"
pub const POOL_MAGIC: [u8; 8] = *b"NVOBJPL\0";

/// Current pool format version
pub const POOL_FORMAT_VERSION: u32 = 1;

/// Capacity of the layout tag, including the terminating NUL
pub const LAYOUT_CAPACITY: usize = 64;

/// Byte offset of the first heap block
pub const HEAP_OFFSET: u64 = 4096;

/// Smallest pool the engine will create
pub const MIN_POOL_SIZE: u64 = 8 * 1024 * 1024;

/// Bytes covered by the header checksum (magic through heap offset)
const CHECKSUMMED_LEN: usize = 104;

/// Pool header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PoolHeader {
    /// Magic bytes: "NVOBJPL\0"
    pub magic: [u8; 8],
    /// Format version
    pub version: u32,
    /// Reserved flags
    pub flags: u32,
    /// NUL-padded layout tag
    pub layout: [u8; LAYOUT_CAPACITY],
    /// Pool identity, never 0
    pub pool_id: u64,
    /// Pool size in bytes
    pub size: u64,
    /// Offset of the first heap block
    pub heap_offset: u64,
    /// Payload offset of the root object, 0 if none
    pub root_offset: u64,
    /// Size of the root object
    pub root_size: u64,
    /// Type number of the root object
    pub root_type: u64,
    /// Incremented on every open
    pub run_id: u64,
    /// CRC32 of the immutable prefix
    pub checksum: u32,
    _pad: u32,
}

impl PoolHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = std::mem::size_of::<PoolHeader>();

    /// Fresh header for a new pool.
    pub fn new(pool_id: u64, size: u64, layout: &str) -> Result<Self> {
        let mut header = PoolHeader {
            magic: POOL_MAGIC,
            version: POOL_FORMAT_VERSION,
            flags: 0,
            layout: encode_layout(layout)?,
            pool_id,
            size,
            heap_offset: HEAP_OFFSET,
            root_offset: 0,
            root_size: 0,
            root_type: 0,
            run_id: 0,
            checksum: 0,
            _pad: 0,
        };
        header.checksum = header.compute_checksum();
        Ok(header)
    }

    /// CRC32 of the immutable fields.
    pub fn compute_checksum(&self) -> u32 {
        crc32fast::hash(&bytemuck::bytes_of(self)[..CHECKSUMMED_LEN])
    }

    /// Layout tag as a string.
    pub fn layout_str(&self) -> &str {
        let end = self
            .layout
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(LAYOUT_CAPACITY);
        std::str::from_utf8(&self.layout[..end]).unwrap_or("")
    }

    /// Validate the header against the file length and, optionally, a layout.
    ///
    /// # Errors
    ///
    /// - `Error::Pool` if the magic or layout do not match
    /// - `Error::Corruption` if the version, checksum or geometry are bad
    pub fn validate(&self, file_len: u64, layout: Option<&str>) -> Result<()> {
        if self.magic != POOL_MAGIC {
            return Err(Error::Pool("not an nvobj pool (bad magic)".into()));
        }
        if self.version != POOL_FORMAT_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported pool format version {}",
                self.version
            )));
        }
        let computed = self.compute_checksum();
        if computed != self.checksum {
            return Err(Error::Corruption(format!(
                "pool header checksum mismatch: stored={:#010x}, computed={:#010x}",
                self.checksum, computed
            )));
        }
        if self.size != file_len || self.heap_offset != HEAP_OFFSET || self.pool_id == 0 {
            return Err(Error::Corruption(format!(
                "pool header geometry invalid (size {} vs file {})",
                self.size, file_len
            )));
        }
        if let Some(expected) = layout {
            if self.layout_str() != expected {
                return Err(Error::Pool(format!(
                    "layout mismatch: pool has '{}', caller expects '{}'",
                    self.layout_str(),
                    expected
                )));
            }
        }
        Ok(())
    }

    /// Parse a header from the start of a raw image.
    pub fn from_image(image: &[u8]) -> Result<Self> {
        if image.len() < Self::SIZE {
            return Err(Error::Corruption("image too small for pool header".into()));
        }
        Ok(bytemuck::pod_read_unaligned(&image[..Self::SIZE]))
    }
}

fn encode_layout(layout: &str) -> Result<[u8; LAYOUT_CAPACITY]> {
    let bytes = layout.as_bytes();
    if bytes.len() >= LAYOUT_CAPACITY || bytes.contains(&0) {
        return Err(Error::Pool(format!(
            "layout tag must be under {} bytes without NUL",
            LAYOUT_CAPACITY
        )));
    }
    let mut out = [0u8; LAYOUT_CAPACITY];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}
