//! Heap block format.
//!
//! The heap is a contiguous sequence of blocks from `HEAP_OFFSET` to the end
//! of the pool. Each block starts with a 32-byte header; the payload that
//! follows is what a persistent pointer addresses.
//!
//! ```text
//! ┌──────────┬──────────────┬─────────┬───────────┬───────────┬──────────────┐
//! │ Size (8) │ TypeNum (8)  │ Seq (8) │ State (4) │ Flags (4) │ Payload ...  │
//! └──────────┴──────────────┴─────────┴───────────┴───────────┴──────────────┘
//! ```
//!
//! `Size` covers header plus payload and is a multiple of [`BLOCK_ALIGN`].
//! A block whose state word is not [`STATE_USED`] is free, whatever its other
//! fields say; flipping that word is the commit point of an allocation.

use bytemuck::{Pod, Zeroable};
use nvobj_core::{Error, Result};

use crate::region::Region;

/// Size of a block header in bytes
pub const BLOCK_HEADER_SIZE: u64 = 32;

/// Alignment of every block and payload
pub const BLOCK_ALIGN: u64 = 16;

/// Smallest block worth splitting off a free region
pub const MIN_BLOCK_SIZE: u64 = BLOCK_HEADER_SIZE + BLOCK_ALIGN;

/// State word of a free block: "FREE"
pub const STATE_FREE: u32 = 0x4652_4545;

/// State word of an allocated block: "USED"
pub const STATE_USED: u32 = 0x5553_4544;

/// Block holds the pool's root object
pub const FLAG_ROOT: u32 = 0x1;

/// Heap block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BlockHeader {
    /// Total block size (header + payload)
    pub size: u64,
    /// Type number of the payload
    pub type_num: u64,
    /// Allocation sequence number (iteration order)
    pub seq: u64,
    /// `STATE_FREE` or `STATE_USED`
    pub state: u32,
    /// Block flags
    pub flags: u32,
}

impl BlockHeader {
    /// Header of a free block.
    pub fn free(size: u64) -> Self {
        BlockHeader {
            size,
            type_num: 0,
            seq: 0,
            state: STATE_FREE,
            flags: 0,
        }
    }

    /// True if the block is allocated.
    pub fn is_used(&self) -> bool {
        self.state == STATE_USED
    }

    /// Usable payload bytes.
    pub fn payload_size(&self) -> u64 {
        self.size.saturating_sub(BLOCK_HEADER_SIZE)
    }
}

/// Block size needed for a payload of `payload` bytes.
pub fn block_size_for(payload: u64) -> Option<u64> {
    let padded = payload.max(1).checked_add(BLOCK_ALIGN - 1)? & !(BLOCK_ALIGN - 1);
    padded.checked_add(BLOCK_HEADER_SIZE)
}

/// Payload offset of the block at `block`.
pub const fn payload_of(block: u64) -> u64 {
    block + BLOCK_HEADER_SIZE
}

/// Block offset of the payload at `payload`.
pub const fn block_of(payload: u64) -> u64 {
    payload - BLOCK_HEADER_SIZE
}

/// Anything block headers can be read from.
pub trait BlockSource {
    /// Read the block header at `off`.
    fn block_header(&self, off: u64) -> Result<BlockHeader>;
}

impl BlockSource for Region {
    fn block_header(&self, off: u64) -> Result<BlockHeader> {
        self.read(off)
    }
}

impl BlockSource for [u8] {
    fn block_header(&self, off: u64) -> Result<BlockHeader> {
        let start = off as usize;
        let end = start + BLOCK_HEADER_SIZE as usize;
        if end > self.len() {
            return Err(Error::Corruption(format!(
                "block header at {:#x} past end of image",
                off
            )));
        }
        Ok(bytemuck::pod_read_unaligned(&self[start..end]))
    }
}

/// Walk every block between `start` and `end`.
///
/// # Errors
///
/// Returns `Error::Corruption` if a header has an impossible size or an
/// unknown state word, or if the chain does not end exactly at `end`.
pub fn walk_blocks<S: BlockSource + ?Sized>(
    source: &S,
    start: u64,
    end: u64,
) -> Result<Vec<(u64, BlockHeader)>> {
    let mut blocks = Vec::new();
    let mut off = start;
    while off < end {
        let header = source.block_header(off)?;
        if header.size < BLOCK_HEADER_SIZE + BLOCK_ALIGN
            || header.size % BLOCK_ALIGN != 0
            || header.size > end - off
        {
            return Err(Error::Corruption(format!(
                "block at {:#x} has invalid size {}",
                off, header.size
            )));
        }
        if header.state != STATE_FREE && header.state != STATE_USED {
            return Err(Error::Corruption(format!(
                "block at {:#x} has unknown state {:#010x}",
                off, header.state
            )));
        }
        blocks.push((off, header));
        off += header.size;
    }
    Ok(blocks)
}
