//! Lane journal file and undo record format.
//!
//! Each lane is a file named `lane-NNN.log` inside the pool's `.lanes`
//! directory. Only one transaction writes a lane at a time.
//!
//! # File Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Lane Header (32 bytes)             │
//! ├────────────────────────────────────┤
//! │ Record 1                           │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//! ```
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────┬─────────────────────┬──────────┐
//! │ Length (4 bytes)│ Kind (1) │ Payload (variable)  │ CRC32 (4)│
//! └─────────────────┴──────────┴─────────────────────┴──────────┘
//! ```
//!
//! The length covers kind, payload and CRC. The CRC covers kind and payload.
//! A record that is short or fails its CRC ends the scan: it was being
//! written when the process died, and the mutation it guards never started.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nvobj_core::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a lane journal: "NVOL"
pub const LANE_MAGIC: [u8; 4] = *b"NVOL";

/// Current lane format version
pub const LANE_FORMAT_VERSION: u32 = 1;

/// Size of the lane header in bytes
pub const LANE_HEADER_SIZE: u64 = 32;

const KIND_RANGE: u8 = 1;
const KIND_ALLOC: u8 = 2;
const KIND_FREE: u8 = 3;
const KIND_COMMIT: u8 = 4;

/// One durable undo record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoRecord {
    /// Snapshot of bytes at `off` taken before they were first modified
    Range {
        /// Pool offset of the snapshot
        off: u64,
        /// Original bytes
        bytes: Vec<u8>,
    },
    /// Allocation made by the transaction (payload offset)
    Alloc {
        /// Payload offset
        off: u64,
    },
    /// Deferred free requested by the transaction (payload offset)
    Free {
        /// Payload offset
        off: u64,
    },
    /// The transaction's effects are durable; only deferred frees remain
    Commit,
}

impl UndoRecord {
    fn kind(&self) -> u8 {
        match self {
            UndoRecord::Range { .. } => KIND_RANGE,
            UndoRecord::Alloc { .. } => KIND_ALLOC,
            UndoRecord::Free { .. } => KIND_FREE,
            UndoRecord::Commit => KIND_COMMIT,
        }
    }

    /// Serialize record to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(16);
        body.push(self.kind());
        match self {
            UndoRecord::Range { off, bytes } => {
                body.extend_from_slice(&off.to_le_bytes());
                body.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                body.extend_from_slice(bytes);
            }
            UndoRecord::Alloc { off } | UndoRecord::Free { off } => {
                body.extend_from_slice(&off.to_le_bytes());
            }
            UndoRecord::Commit => {}
        }
        let crc = crc32fast::hash(&body);

        let total_len = body.len() + 4;
        let mut record = Vec::with_capacity(4 + total_len);
        record.extend_from_slice(&(total_len as u32).to_le_bytes());
        record.extend_from_slice(&body);
        record.extend_from_slice(&crc.to_le_bytes());
        record
    }

    /// Deserialize one record.
    ///
    /// Returns `Ok(None)` for a torn record (too short or bad CRC) and
    /// `(record, bytes_consumed)` otherwise.
    pub fn from_bytes(bytes: &[u8]) -> Result<Option<(Self, usize)>> {
        if bytes.len() < 4 {
            return Ok(None);
        }
        let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if length < 5 || bytes.len() < 4 + length {
            return Ok(None);
        }
        let body = &bytes[4..4 + length - 4];
        let crc_bytes = &bytes[4 + length - 4..4 + length];
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if crc32fast::hash(body) != stored_crc {
            return Ok(None);
        }

        let mut cur = Cursor::new(&body[1..]);
        let record = match body[0] {
            KIND_RANGE => {
                let off = cur.read_u64::<LittleEndian>()?;
                let n = cur.read_u32::<LittleEndian>()? as usize;
                let mut data = vec![0u8; n];
                cur.read_exact(&mut data)?;
                UndoRecord::Range { off, bytes: data }
            }
            KIND_ALLOC => UndoRecord::Alloc {
                off: cur.read_u64::<LittleEndian>()?,
            },
            KIND_FREE => UndoRecord::Free {
                off: cur.read_u64::<LittleEndian>()?,
            },
            KIND_COMMIT => UndoRecord::Commit,
            other => {
                return Err(Error::Corruption(format!(
                    "unknown undo record kind {}",
                    other
                )))
            }
        };
        Ok(Some((record, 4 + length)))
    }
}

/// Lane file name for lane `n`.
pub fn lane_path(dir: &Path, lane: u32) -> PathBuf {
    dir.join(format!("lane-{:03}.log", lane))
}

/// Every lane file present in `dir`, sorted by name.
pub fn list_lanes(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut lanes: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("lane-") && n.ends_with(".log"))
                .unwrap_or(false)
        })
        .collect();
    lanes.sort();
    Ok(lanes)
}

/// Parsed contents of a lane file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneContents {
    /// Pool the lane belongs to
    pub pool_id: u64,
    /// Lane number
    pub lane: u32,
    /// Intact records in append order
    pub records: Vec<UndoRecord>,
    /// True if a torn record followed the intact ones
    pub torn_tail: bool,
}

impl LaneContents {
    /// True if the transaction reached its commit point.
    pub fn is_committed(&self) -> bool {
        self.records.contains(&UndoRecord::Commit)
    }
}

fn encode_header(pool_id: u64, lane: u32) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(LANE_HEADER_SIZE as usize);
    buf.write_all(&LANE_MAGIC)?;
    buf.write_u32::<LittleEndian>(LANE_FORMAT_VERSION)?;
    buf.write_u64::<LittleEndian>(pool_id)?;
    buf.write_u32::<LittleEndian>(lane)?;
    buf.resize(LANE_HEADER_SIZE as usize, 0);
    Ok(buf)
}

/// Read and validate a lane file.
///
/// # Errors
///
/// Returns `Error::Corruption` if the header is invalid.
pub fn read_lane(path: &Path) -> Result<LaneContents> {
    let data = fs::read(path)?;
    if (data.len() as u64) < LANE_HEADER_SIZE {
        return Err(Error::Corruption(format!(
            "lane file '{}' is shorter than its header",
            path.display()
        )));
    }
    let mut cur = Cursor::new(&data[..LANE_HEADER_SIZE as usize]);
    let mut magic = [0u8; 4];
    cur.read_exact(&mut magic)?;
    let version = cur.read_u32::<LittleEndian>()?;
    let pool_id = cur.read_u64::<LittleEndian>()?;
    let lane = cur.read_u32::<LittleEndian>()?;
    if magic != LANE_MAGIC || version != LANE_FORMAT_VERSION {
        return Err(Error::Corruption(format!(
            "lane file '{}' has an invalid header",
            path.display()
        )));
    }

    let mut records = Vec::new();
    let mut pos = LANE_HEADER_SIZE as usize;
    let mut torn_tail = false;
    while pos < data.len() {
        match UndoRecord::from_bytes(&data[pos..])? {
            Some((record, used)) => {
                records.push(record);
                pos += used;
            }
            None => {
                torn_tail = true;
                break;
            }
        }
    }
    Ok(LaneContents {
        pool_id,
        lane,
        records,
        torn_tail,
    })
}

/// Writable lane journal.
#[derive(Debug)]
pub struct LaneJournal {
    file: File,
    path: PathBuf,
    lane: u32,
    len: u64,
}

impl LaneJournal {
    /// Create or reinitialise lane `lane` in `dir`.
    ///
    /// Any previous contents are discarded, so recovery must have run first.
    pub fn open(dir: &Path, pool_id: u64, lane: u32) -> Result<Self> {
        let path = lane_path(dir, lane);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.write_all(&encode_header(pool_id, lane)?)?;
        file.sync_all()?;
        Ok(LaneJournal {
            file,
            path,
            lane,
            len: LANE_HEADER_SIZE,
        })
    }

    /// Append a record (not synced).
    pub fn append(&mut self, record: &UndoRecord) -> Result<()> {
        let bytes = record.to_bytes();
        self.file.write_all(&bytes)?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    /// Make appended records durable.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Append a record and sync it.
    pub fn append_sync(&mut self, record: &UndoRecord) -> Result<()> {
        self.append(record)?;
        self.sync()
    }

    /// Discard every record, keeping the header.
    pub fn reset(&mut self) -> Result<()> {
        if self.len == LANE_HEADER_SIZE {
            return Ok(());
        }
        self.file.set_len(LANE_HEADER_SIZE)?;
        self.file.seek(SeekFrom::Start(LANE_HEADER_SIZE))?;
        self.file.sync_data()?;
        self.len = LANE_HEADER_SIZE;
        Ok(())
    }

    /// True if the lane holds no records.
    pub fn is_empty(&self) -> bool {
        self.len == LANE_HEADER_SIZE
    }

    /// Lane number.
    pub fn lane(&self) -> u32 {
        self.lane
    }

    /// Path of the lane file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
