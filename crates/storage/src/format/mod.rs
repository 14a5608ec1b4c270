//! On-media byte formats for pools.
//!
//! # Module Structure
//!
//! - `header`: pool header at offset 0
//! - `block`: heap block headers and the block walker

pub mod block;
pub mod header;

pub use block::{
    block_of, block_size_for, payload_of, walk_blocks, BlockHeader, BlockSource,
    BLOCK_ALIGN, BLOCK_HEADER_SIZE, FLAG_ROOT, MIN_BLOCK_SIZE, STATE_FREE, STATE_USED,
};
pub use header::{
    PoolHeader, HEAP_OFFSET, LAYOUT_CAPACITY, MIN_POOL_SIZE, POOL_FORMAT_VERSION, POOL_MAGIC,
};

use nvobj_core::Result;

/// Validate a complete pool image: header, layout and heap chain.
pub fn verify_image(image: &[u8], layout: Option<&str>) -> Result<PoolHeader> {
    let header = PoolHeader::from_image(image)?;
    header.validate(image.len() as u64, layout)?;
    walk_blocks(image, header.heap_offset, header.size)?;
    Ok(header)
}
