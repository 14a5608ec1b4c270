//! Lane pool
//!
//! A fixed set of lane journals shared by all threads of one pool. An
//! outermost transaction holds one lane from its first journaled operation
//! until it commits or rolls back. When every lane is busy, `acquire` blocks.

use nvobj_core::{Error, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::journal::LaneJournal;

/// The lanes of one pool.
#[derive(Debug)]
pub struct LaneSet {
    dir: PathBuf,
    lanes: Vec<Mutex<LaneJournal>>,
    free: Mutex<Vec<usize>>,
    available: Condvar,
}

impl LaneSet {
    /// Create `count` empty lanes in `dir`.
    pub fn open(dir: &Path, pool_id: u64, count: usize) -> Result<Arc<Self>> {
        if count == 0 {
            return Err(Error::Config("a pool needs at least one lane".into()));
        }
        fs::create_dir_all(dir)?;
        let lanes = (0..count)
            .map(|n| LaneJournal::open(dir, pool_id, n as u32).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(LaneSet {
            dir: dir.to_path_buf(),
            lanes,
            free: Mutex::new((0..count).rev().collect()),
            available: Condvar::new(),
        }))
    }

    /// Take a lane, waiting for one to be released if necessary.
    pub fn acquire(self: &Arc<Self>) -> LaneGuard {
        let mut free = self.free.lock();
        loop {
            if let Some(idx) = free.pop() {
                return LaneGuard {
                    set: Arc::clone(self),
                    idx,
                };
            }
            self.available.wait(&mut free);
        }
    }

    /// Take a lane if one is free.
    pub fn try_acquire(self: &Arc<Self>) -> Option<LaneGuard> {
        self.free.lock().pop().map(|idx| LaneGuard {
            set: Arc::clone(self),
            idx,
        })
    }

    /// Number of lanes.
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    /// True if there are no lanes.
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Number of currently free lanes.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Directory holding the lane files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn release(&self, idx: usize) {
        self.free.lock().push(idx);
        self.available.notify_one();
    }
}

/// Exclusive use of one lane; returned to the set on drop.
#[derive(Debug)]
pub struct LaneGuard {
    set: Arc<LaneSet>,
    idx: usize,
}

impl LaneGuard {
    /// The lane's journal.
    pub fn journal(&self) -> MutexGuard<'_, LaneJournal> {
        self.set.lanes[self.idx].lock()
    }

    /// Lane number.
    pub fn index(&self) -> usize {
        self.idx
    }
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        self.set.release(self.idx);
    }
}
