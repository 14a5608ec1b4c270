//! Persistent heap allocator
//!
//! The on-media state is nothing but the block chain (see `format::block`).
//! Everything else here is a volatile index rebuilt by [`Heap::load`]:
//!
//! - a first-fit free map with in-memory coalescing
//! - the live map, payload offset -> [`ObjectInfo`]
//! - a per-type index ordered by allocation sequence, used for iteration
//!
//! # Two-phase allocation
//!
//! 1. [`Heap::reserve`] carves a block and persists its header as FREE
//! 2. the caller fills the payload
//! 3. [`Heap::publish`] persists type and sequence, then flips the state word
//!    to USED
//!
//! A crash anywhere before step 3 leaves a free block behind, which is what
//! gives atomic allocation its all-or-nothing property.

use nvobj_core::{Error, Result, TypeNum};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::ops::Bound;
use tracing::{debug, warn};

use crate::format::{
    block_of, block_size_for, payload_of, walk_blocks, BlockHeader, BLOCK_HEADER_SIZE,
    FLAG_ROOT, MIN_BLOCK_SIZE, STATE_FREE, STATE_USED,
};
use crate::region::Region;

/// Byte offset of the state word inside a block header
const STATE_WORD_OFFSET: u64 = 24;

/// A live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Payload offset (what pointers address)
    pub off: u64,
    /// Type number recorded at allocation
    pub type_num: TypeNum,
    /// Allocation sequence number
    pub seq: u64,
    /// Usable payload bytes
    pub size: u64,
    /// Block flags
    pub flags: u32,
}

impl ObjectInfo {
    /// True if `[off, off + len)` lies inside the payload.
    pub fn contains(&self, off: u64, len: u64) -> bool {
        off >= self.off && off.saturating_add(len) <= self.off + self.size
    }

    /// True for the pool's root object.
    pub fn is_root(&self) -> bool {
        self.flags & FLAG_ROOT != 0
    }
}

/// A carved but unpublished block.
#[derive(Debug)]
#[must_use = "a reservation must be published or cancelled"]
pub struct Reservation {
    block: u64,
    size: u64,
}

impl Reservation {
    /// Payload offset of the reserved block.
    pub fn offset(&self) -> u64 {
        payload_of(self.block)
    }

    /// Usable payload bytes.
    pub fn usable(&self) -> u64 {
        self.size - BLOCK_HEADER_SIZE
    }
}

/// Heap occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Bytes held by live blocks, headers included
    pub used_bytes: u64,
    /// Bytes in free blocks, headers included
    pub free_bytes: u64,
    /// Number of live allocations
    pub objects: usize,
}

#[derive(Default)]
struct HeapState {
    free: BTreeMap<u64, u64>,
    live: BTreeMap<u64, ObjectInfo>,
    by_type: FxHashMap<TypeNum, BTreeMap<u64, u64>>,
    next_seq: u64,
}

impl HeapState {
    fn insert_free(&mut self, mut off: u64, mut size: u64) {
        if let Some((&prev, &prev_size)) = self.free.range(..off).next_back() {
            if prev + prev_size == off {
                self.free.remove(&prev);
                off = prev;
                size += prev_size;
            }
        }
        if let Some(next_size) = self.free.remove(&(off + size)) {
            size += next_size;
        }
        self.free.insert(off, size);
    }

    fn index(&mut self, info: ObjectInfo) {
        if !info.is_root() {
            self.by_type
                .entry(info.type_num)
                .or_default()
                .insert(info.seq, info.off);
        }
        self.live.insert(info.off, info);
    }

    fn unindex(&mut self, info: &ObjectInfo) {
        if let Some(seqs) = self.by_type.get_mut(&info.type_num) {
            seqs.remove(&info.seq);
            if seqs.is_empty() {
                self.by_type.remove(&info.type_num);
            }
        }
    }
}

/// Volatile index over a pool's block chain.
pub struct Heap {
    state: Mutex<HeapState>,
    start: u64,
    end: u64,
}

impl Heap {
    /// Initialise an empty heap spanning `[start, end)`.
    pub fn format(region: &Region, start: u64, end: u64) -> Result<Self> {
        if end < start + MIN_BLOCK_SIZE {
            return Err(Error::Pool(format!(
                "heap of {} bytes is too small",
                end.saturating_sub(start)
            )));
        }
        region.write_persist(start, &BlockHeader::free(end - start))?;
        let heap = Heap {
            state: Mutex::new(HeapState {
                next_seq: 1,
                ..Default::default()
            }),
            start,
            end,
        };
        heap.state.lock().insert_free(start, end - start);
        Ok(heap)
    }

    /// Rebuild the volatile index by walking the block chain.
    pub fn load(region: &Region, start: u64, end: u64) -> Result<Self> {
        let mut state = HeapState::default();
        let mut max_seq = 0;
        for (block, header) in walk_blocks(region, start, end)? {
            if header.state == STATE_USED {
                max_seq = max_seq.max(header.seq);
                state.index(ObjectInfo {
                    off: payload_of(block),
                    type_num: TypeNum(header.type_num),
                    seq: header.seq,
                    size: header.payload_size(),
                    flags: header.flags,
                });
            } else {
                state.insert_free(block, header.size);
            }
        }
        state.next_seq = max_seq + 1;
        debug!(
            target: "nvobj::heap",
            objects = state.live.len(),
            free_extents = state.free.len(),
            "Heap loaded"
        );
        Ok(Heap {
            state: Mutex::new(state),
            start,
            end,
        })
    }

    /// Carve a zeroed block with at least `payload` usable bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Allocation` if no free block is large enough. The
    /// failure is not retried.
    pub fn reserve(&self, region: &Region, payload: u64) -> Result<Reservation> {
        let need = block_size_for(payload)
            .ok_or_else(|| Error::Allocation(format!("request of {} bytes is too large", payload)))?;

        let mut st = self.state.lock();
        let found = st
            .free
            .iter()
            .find(|(_, &size)| size >= need)
            .map(|(&off, &size)| (off, size));
        let (block, avail) = match found {
            Some(hit) => hit,
            None => {
                let largest = st.free.values().copied().max().unwrap_or(0);
                debug!(target: "nvobj::heap", requested = payload, largest, "Out of pool space");
                return Err(Error::Allocation(format!(
                    "out of pool space: requested {} bytes, largest free block {}",
                    payload, largest
                )));
            }
        };
        st.free.remove(&block);

        let size = if avail - need >= MIN_BLOCK_SIZE { need } else { avail };
        let carve = || -> Result<()> {
            if size < avail {
                region.write_persist(block + size, &BlockHeader::free(avail - size))?;
            }
            region.write_persist(block, &BlockHeader::free(size))
        };
        if let Err(e) = carve() {
            st.free.insert(block, avail);
            return Err(e);
        }
        if size < avail {
            st.insert_free(block + size, avail - size);
        }
        drop(st);

        region.zero(payload_of(block), (size - BLOCK_HEADER_SIZE) as usize)?;
        Ok(Reservation { block, size })
    }

    /// Make a reservation a live allocation.
    ///
    /// The payload must already be in place; it is persisted before the
    /// state word flips.
    pub fn publish(
        &self,
        region: &Region,
        reservation: Reservation,
        type_num: TypeNum,
        flags: u32,
    ) -> Result<ObjectInfo> {
        let mut st = self.state.lock();
        let seq = st.next_seq;
        let header = BlockHeader {
            size: reservation.size,
            type_num: type_num.as_u64(),
            seq,
            state: STATE_FREE,
            flags,
        };
        let flip = || -> Result<()> {
            region.write_persist(reservation.block, &header)?;
            region.write_persist(reservation.block + STATE_WORD_OFFSET, &STATE_USED)
        };
        if let Err(e) = flip() {
            st.insert_free(reservation.block, reservation.size);
            return Err(e);
        }
        st.next_seq += 1;
        let info = ObjectInfo {
            off: reservation.offset(),
            type_num,
            seq,
            size: reservation.usable(),
            flags,
        };
        st.index(info);
        Ok(info)
    }

    /// Return an unpublished reservation to the free map.
    pub fn cancel(&self, reservation: Reservation) {
        self.state
            .lock()
            .insert_free(reservation.block, reservation.size);
    }

    /// Free the allocation whose payload starts at `off`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Allocation` if `off` is not a live allocation.
    pub fn free(&self, region: &Region, off: u64) -> Result<ObjectInfo> {
        let info = self.release(region, off)?;
        self.recycle(&info);
        Ok(info)
    }

    /// Mark the allocation at `off` free on media without making its block
    /// available to [`Heap::reserve`].
    ///
    /// The block stays out of the free map until [`Heap::recycle`], so a
    /// journal that still names it can be retired first.
    ///
    /// # Errors
    ///
    /// Returns `Error::Allocation` if `off` is not a live allocation.
    pub fn release(&self, region: &Region, off: u64) -> Result<ObjectInfo> {
        let mut st = self.state.lock();
        let info = st.live.remove(&off).ok_or_else(|| {
            Error::Allocation(format!("{:#x} is not the start of a live allocation", off))
        })?;
        if let Err(e) = region.write_persist(block_of(off) + STATE_WORD_OFFSET, &STATE_FREE) {
            warn!(target: "nvobj::heap", off, error = %e, "Failed to persist free");
            st.live.insert(off, info);
            return Err(e);
        }
        st.unindex(&info);
        Ok(info)
    }

    /// Return a block taken by [`Heap::release`] to the free map.
    pub fn recycle(&self, info: &ObjectInfo) {
        self.state
            .lock()
            .insert_free(block_of(info.off), info.size + BLOCK_HEADER_SIZE);
    }

    /// Allocation starting exactly at `off`.
    pub fn object(&self, off: u64) -> Option<ObjectInfo> {
        self.state.lock().live.get(&off).copied()
    }

    /// Allocation whose payload contains `off`.
    pub fn containing(&self, off: u64) -> Option<ObjectInfo> {
        self.state
            .lock()
            .live
            .range(..=off)
            .next_back()
            .map(|(_, info)| *info)
            .filter(|info| info.contains(off, 0) && off < info.off + info.size.max(1))
    }

    /// True if a live allocation starts at `off`.
    pub fn is_allocated(&self, off: u64) -> bool {
        self.state.lock().live.contains_key(&off)
    }

    /// First live non-root allocation of `type_num` allocated after `after`.
    pub fn next_of_type(&self, type_num: TypeNum, after: Option<u64>) -> Option<ObjectInfo> {
        let st = self.state.lock();
        let seqs = st.by_type.get(&type_num)?;
        let lower = match after {
            Some(seq) => Bound::Excluded(seq),
            None => Bound::Unbounded,
        };
        let (_, off) = seqs.range((lower, Bound::Unbounded)).next()?;
        st.live.get(off).copied()
    }

    /// Current occupancy.
    pub fn stats(&self) -> HeapStats {
        let st = self.state.lock();
        let free_bytes: u64 = st.free.values().sum();
        HeapStats {
            used_bytes: (self.end - self.start) - free_bytes,
            free_bytes,
            objects: st.live.len(),
        }
    }
}

/// Mark the block holding `payload` free directly on media.
///
/// Used by crash recovery before any volatile index exists. Returns `true` if
/// the block was USED.
pub fn release_on_media(region: &Region, payload: u64) -> Result<bool> {
    if payload < BLOCK_HEADER_SIZE {
        return Err(Error::Corruption(format!(
            "journal names impossible allocation {:#x}",
            payload
        )));
    }
    let block = block_of(payload);
    let header: BlockHeader = region.read(block)?;
    if header.is_used() {
        region.write_persist(block + STATE_WORD_OFFSET, &STATE_FREE)?;
        Ok(true)
    } else {
        Ok(false)
    }
}
