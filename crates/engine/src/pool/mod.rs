//! Pool manager
//!
//! A [`Pool`] owns the mapping of one persistent region and is the entry
//! point for everything else: the root object, pointer resolution, the
//! allocator bridge, persistent locks, typed iteration and transactions.
//!
//! ## Files
//!
//! ```text
//! data.pool          the mapped pool image
//! data.pool.toml     PoolConfig
//! data.pool.lanes/   undo journal lanes (Always mode)
//! data.pool.lock     exclusive process lock (fs2)
//! ```
//!
//! ## Open flow
//!
//! 1. Return the live instance if the path is already open in this process
//! 2. Lock `<pool>.lock` against other processes
//! 3. Map the file and validate the header against the layout tag
//! 4. Increment and persist the run id
//! 5. Recover interrupted transactions from the lane journals
//! 6. Rebuild the heap index, reset a never-published root
//! 7. Register under path and identity

mod builder;
pub mod config;
pub(crate) mod registry;

pub use builder::PoolBuilder;
pub use config::PoolConfig;
pub use registry::{lookup, PersistentPtrExt};

use bytemuck::bytes_of;
use dashmap::DashSet;
use nvobj_concurrency::{stack, LockTable, LogTarget, RollbackReport, CommitReport};
use nvobj_core::{Error, Oid, Persistent, PersistentPtr, Result, TxStage, TypeNum};
use nvobj_durability::{recover, DurabilityMode, LaneSet, RecoveryStats};
use nvobj_storage::format::FLAG_ROOT;
use nvobj_storage::{verify_image, Heap, HeapStats, ObjectInfo, PoolHeader, Region, HEAP_OFFSET};
use nvobj_storage::MIN_POOL_SIZE;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::mem;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{TypeEntry, TypeRegistry};
use config::{sidecar_path, CONFIG_SUFFIX, LANES_SUFFIX, LOCK_SUFFIX};
use registry::OPEN_POOLS;

/// Lifecycle bit set once the pool is closed
const CLOSED: usize = 1 << (usize::BITS - 1);

/// An open persistent memory pool.
///
/// Shared as `Arc<Pool>`; every handle to the same path is the same
/// instance.
pub struct Pool {
    path: Option<PathBuf>,
    layout: String,
    pool_id: u64,
    run_id: u64,
    mode: DurabilityMode,
    config: PoolConfig,

    pub(crate) region: Region,
    pub(crate) heap: Heap,
    /// Journal lanes; `None` in Cache mode
    pub(crate) lanes: Option<Arc<LaneSet>>,
    /// Runtime state behind persistent locks
    pub(crate) locks: LockTable,
    types: Arc<TypeRegistry>,
    /// Allocations whose dispatch slots were repaired this run
    repaired: DashSet<u64>,

    recovery: RecoveryStats,
    /// Outermost transactions in flight across threads, plus [`CLOSED`]
    lifecycle: AtomicUsize,
    root_lock: Mutex<()>,

    /// Exclusive lock file preventing concurrent process access to the pool.
    ///
    /// Held until close or drop. None for ephemeral pools.
    lock_file: Mutex<Option<File>>,
}

/// Resolved creation/open parameters.
pub(crate) struct OpenParams {
    pub(crate) layout: String,
    pub(crate) size: u64,
    pub(crate) config: PoolConfig,
    pub(crate) types: Arc<TypeRegistry>,
}

impl Pool {
    /// Create a pool file at `path` with the given layout tag.
    ///
    /// A `size` of 0 uses the configured `pool_size`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let pool = Pool::create("/mnt/pmem/data.pool", "queue", 0)?;
    /// let root = pool.root::<Root>()?;
    /// ```
    pub fn create<P: AsRef<Path>>(path: P, layout: &str, size: u64) -> Result<Arc<Self>> {
        PoolBuilder::new().layout(layout).size(size).create(path)
    }

    /// Open an existing pool, verifying its layout tag.
    pub fn open<P: AsRef<Path>>(path: P, layout: &str) -> Result<Arc<Self>> {
        PoolBuilder::new().layout(layout).open(path)
    }

    /// Builder for custom configuration.
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Pool over an anonymous mapping: no files, Cache durability.
    pub fn ephemeral(layout: &str, size: u64) -> Result<Arc<Self>> {
        PoolBuilder::new().layout(layout).size(size).ephemeral()
    }

    /// Validate the pool file at `path`: header, layout and heap chain.
    ///
    /// Returns `Ok(false)` for a malformed or foreign pool.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read.
    pub fn check<P: AsRef<Path>>(path: P, layout: &str) -> Result<bool> {
        let image = std::fs::read(path.as_ref())?;
        match verify_image(&image, Some(layout)) {
            Ok(_) => Ok(true),
            Err(Error::Pool(reason)) | Err(Error::Corruption(reason)) => {
                debug!(target: "nvobj::pool", path = ?path.as_ref(), %reason, "Pool check failed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// True if a valid pool with this layout exists at `path`.
    pub fn exists<P: AsRef<Path>>(path: P, layout: &str) -> bool {
        path.as_ref().is_file() && Self::check(path, layout).unwrap_or(false)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub(crate) fn create_at(path: &Path, params: OpenParams) -> Result<Arc<Self>> {
        params.config.validate()?;
        let mode = params.config.durability_mode()?;
        let size = if params.size == 0 {
            params.config.pool_size
        } else {
            params.size
        };
        // keeps the block chain 16-byte aligned to the end
        let size = size & !0xf;
        if size < MIN_POOL_SIZE {
            return Err(Error::Pool(format!(
                "pool size {} is below the minimum of {} bytes",
                size, MIN_POOL_SIZE
            )));
        }

        let mut registry = OPEN_POOLS.lock();
        let lock_file = acquire_lock_file(path)?;
        let region = Region::create(path, size, params.config.file_mode)?;
        let canonical = path.canonicalize()?;

        let pool_id = new_pool_id();
        let header = PoolHeader::new(pool_id, size, &params.layout)?;
        region.write_persist(0, &header)?;
        let heap = Heap::format(&region, HEAP_OFFSET, size)?;

        let config_path = sidecar_path(path, CONFIG_SUFFIX);
        if !config_path.exists() {
            params.config.write_to_file(&config_path)?;
        }
        let lanes = if mode.requires_journal() {
            Some(LaneSet::open(
                &sidecar_path(path, LANES_SUFFIX),
                pool_id,
                params.config.lanes,
            )?)
        } else {
            None
        };

        info!(
            target: "nvobj::pool",
            path = ?canonical,
            layout = %params.layout,
            size,
            pool_id = %format!("{:016x}", pool_id),
            mode = mode.description(),
            "Pool created"
        );

        let pool = Arc::new(Self::assemble(
            Some(canonical),
            pool_id,
            0,
            region,
            heap,
            lanes,
            mode,
            params,
            RecoveryStats::default(),
            Some(lock_file),
        ));
        registry.insert(&pool);
        Ok(pool)
    }

    pub(crate) fn open_at(path: &Path, params: OpenParams) -> Result<Arc<Self>> {
        params.config.validate()?;
        let mode = params.config.durability_mode()?;
        let canonical = path.canonicalize().map_err(|e| {
            Error::Pool(format!("cannot open pool '{}': {}", path.display(), e))
        })?;

        // Hold the registry for the entire operation so only one thread
        // creates the instance for a given path.
        let mut registry = OPEN_POOLS.lock();
        if let Some(pool) = registry.live_at(&canonical) {
            info!(target: "nvobj::pool", path = ?canonical, "Returning existing pool instance");
            return Ok(pool);
        }

        let lock_file = acquire_lock_file(path)?;
        let region = Region::open(path)?;
        let mut header: PoolHeader = region.read(0)?;
        header.validate(region.len(), Some(params.layout.as_str()))?;
        registry.ensure_id_free(header.pool_id)?;

        header.run_id += 1;
        region.write_persist(0, &header)?;

        let lanes_dir = sidecar_path(path, LANES_SUFFIX);
        let recovery = recover(&lanes_dir, &region, header.pool_id)?;

        let heap = Heap::load(&region, header.heap_offset, header.size)?;
        if header.root_offset != 0 && !heap.object(header.root_offset).map_or(false, |o| o.is_root())
        {
            warn!(
                target: "nvobj::pool",
                root_offset = header.root_offset,
                "Root object was never published; resetting root"
            );
            header.root_offset = 0;
            header.root_size = 0;
            header.root_type = 0;
            region.write_persist(0, &header)?;
        }

        let lanes = if mode.requires_journal() {
            Some(LaneSet::open(&lanes_dir, header.pool_id, params.config.lanes)?)
        } else {
            None
        };

        info!(
            target: "nvobj::pool",
            path = ?canonical,
            layout = %params.layout,
            run_id = header.run_id,
            objects = heap.stats().objects,
            rolled_back = recovery.rolled_back,
            rolled_forward = recovery.rolled_forward,
            "Pool opened"
        );

        let pool = Arc::new(Self::assemble(
            Some(canonical),
            header.pool_id,
            header.run_id,
            region,
            heap,
            lanes,
            mode,
            params,
            recovery,
            Some(lock_file),
        ));
        registry.insert(&pool);
        Ok(pool)
    }

    pub(crate) fn ephemeral_with(params: OpenParams) -> Result<Arc<Self>> {
        let size = if params.size == 0 {
            MIN_POOL_SIZE
        } else {
            params.size & !0xf
        };
        if size < MIN_POOL_SIZE {
            return Err(Error::Pool(format!(
                "pool size {} is below the minimum of {} bytes",
                size, MIN_POOL_SIZE
            )));
        }
        let region = Region::anonymous(size)?;
        let pool_id = new_pool_id();
        region.write(0, &PoolHeader::new(pool_id, size, &params.layout)?)?;
        let heap = Heap::format(&region, HEAP_OFFSET, size)?;
        debug!(target: "nvobj::pool", size, "Ephemeral pool created");

        let pool = Arc::new(Self::assemble(
            None,
            pool_id,
            0,
            region,
            heap,
            None,
            DurabilityMode::Cache,
            params,
            RecoveryStats::default(),
            None,
        ));
        OPEN_POOLS.lock().insert(&pool);
        Ok(pool)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        path: Option<PathBuf>,
        pool_id: u64,
        run_id: u64,
        region: Region,
        heap: Heap,
        lanes: Option<Arc<LaneSet>>,
        mode: DurabilityMode,
        params: OpenParams,
        recovery: RecoveryStats,
        lock_file: Option<File>,
    ) -> Self {
        Pool {
            path,
            layout: params.layout,
            pool_id,
            run_id,
            mode,
            config: params.config,
            region,
            heap,
            lanes,
            locks: LockTable::new(),
            types: params.types,
            repaired: DashSet::new(),
            recovery,
            lifecycle: AtomicUsize::new(0),
            root_lock: Mutex::new(()),
            lock_file: Mutex::new(lock_file),
        }
    }

    /// Close the pool.
    ///
    /// Flushes the mapping, releases the process lock and removes the pool
    /// from the active registry. Every later operation on this handle fails
    /// with `Error::Pool`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Pool` if the pool is already closed or transactions
    /// are still in flight.
    pub fn close(&self) -> Result<()> {
        match self
            .lifecycle
            .compare_exchange(0, CLOSED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {}
            Err(word) if word & CLOSED != 0 => {
                return Err(Error::Pool("pool already closed".into()));
            }
            Err(active) => {
                return Err(Error::Pool(format!(
                    "cannot close pool with {} active transaction(s)",
                    active
                )));
            }
        }
        self.region.persist_all()?;
        OPEN_POOLS.lock().remove_instance(self);
        self.lock_file.lock().take();
        info!(target: "nvobj::pool", path = ?self.path, "Pool closed");
        Ok(())
    }

    /// True until `close` is called.
    pub fn is_open(&self) -> bool {
        self.lifecycle.load(Ordering::SeqCst) & CLOSED == 0
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Pool("pool is closed".into()));
        }
        Ok(())
    }

    /// Count a new outermost transaction, unless the pool has closed.
    pub(crate) fn enter_tx(&self) -> Result<()> {
        let word = self.lifecycle.fetch_add(1, Ordering::SeqCst);
        if word & CLOSED != 0 {
            self.lifecycle.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Pool("pool is closed".into()));
        }
        Ok(())
    }

    pub(crate) fn exit_tx(&self) {
        self.lifecycle.fetch_sub(1, Ordering::SeqCst);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Pool identity.
    pub fn id(&self) -> u64 {
        self.pool_id
    }

    /// Run id of this open (increments on every open).
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Layout tag.
    pub fn layout(&self) -> &str {
        &self.layout
    }

    /// Canonical pool file path; `None` for ephemeral pools.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Effective durability mode.
    pub fn durability(&self) -> DurabilityMode {
        self.mode
    }

    /// Configuration the pool was opened with.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Type registry used for dispatch repair.
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// What crash recovery did when this pool was opened.
    pub fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery
    }

    /// Heap occupancy.
    pub fn stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Stage of the calling thread's transaction on this pool.
    pub fn stage(&self) -> TxStage {
        stack::stage(self.pool_id)
    }

    pub(crate) fn log_target(&self) -> LogTarget<'_> {
        LogTarget {
            region: &self.region,
            heap: &self.heap,
            lanes: self.lanes.as_ref(),
        }
    }

    // ========================================================================
    // Root object
    // ========================================================================

    /// The root object, created zeroed on first request.
    ///
    /// # Errors
    ///
    /// Returns `Error::Pool` if a root of a different size already exists.
    pub fn root<R: Persistent>(&self) -> Result<PersistentPtr<R>> {
        self.ensure_open()?;
        let size = mem::size_of::<R>() as u64;
        let _guard = self.root_lock.lock();
        let mut header: PoolHeader = self.region.read(0)?;
        if header.root_offset != 0 {
            if header.root_size != size {
                return Err(Error::Pool(format!(
                    "root object is {} bytes, requested type {} is {} bytes",
                    header.root_size,
                    R::type_name(),
                    size
                )));
            }
            return Ok(PersistentPtr::new(self.pool_id, header.root_offset));
        }

        let reservation = self.heap.reserve(&self.region, size.max(1))?;
        let off = reservation.offset();
        header.root_offset = off;
        header.root_size = size;
        header.root_type = R::type_num().as_u64();
        if let Err(e) = self.region.write_persist(0, &header) {
            self.heap.cancel(reservation);
            return Err(e);
        }
        self.region.persist(off, size as usize)?;
        self.heap
            .publish(&self.region, reservation, R::type_num(), FLAG_ROOT)?;
        debug!(target: "nvobj::pool", off, size, "Root object created");
        Ok(PersistentPtr::new(self.pool_id, off))
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Validate `oid` for an access of `len` bytes; returns its offset.
    pub(crate) fn check_oid(&self, oid: Oid, len: u64) -> Result<u64> {
        self.ensure_open()?;
        if oid.is_null() {
            return Err(Error::NullDereference(
                "dereference of a null persistent pointer".into(),
            ));
        }
        if oid.pool_id != self.pool_id {
            return Err(Error::Pool(format!(
                "pointer {} does not belong to pool {:016x}",
                oid, self.pool_id
            )));
        }
        match oid.off.checked_add(len) {
            Some(end) if oid.off >= HEAP_OFFSET && end <= self.region.len() => Ok(oid.off),
            _ => Err(Error::OutOfRange(format!(
                "pointer {} (+{} bytes) is outside the heap",
                oid, len
            ))),
        }
    }

    /// Copy the referent of `ptr` out of the pool.
    ///
    /// The first resolution of a registered polymorphic allocation in this
    /// run repairs its dispatch slots.
    ///
    /// # Errors
    ///
    /// - `Error::NullDereference` for a null pointer
    /// - `Error::Type` if `T` is polymorphic and the allocation's type is not
    ///   registered
    pub fn read<T: Persistent>(&self, ptr: PersistentPtr<T>) -> Result<T> {
        let off = self.check_oid(ptr.oid(), mem::size_of::<T>() as u64)?;
        self.repair_dispatch::<T>(off)?;
        self.region.read(off)
    }

    /// Copy `len` raw bytes starting at `ptr`.
    pub fn read_bytes(&self, ptr: PersistentPtr<u8>, len: u64) -> Result<Vec<u8>> {
        let off = self.check_oid(ptr.oid(), len)?;
        self.region.read_bytes(off, len as usize)
    }

    /// Transient address of the referent under the current mapping.
    ///
    /// Writing through the address without first registering the range in
    /// a transaction bypasses the undo log: an abort will not restore those
    /// bytes.
    pub fn direct<T: Persistent>(&self, ptr: PersistentPtr<T>) -> Result<NonNull<T>> {
        let len = mem::size_of::<T>();
        let off = self.check_oid(ptr.oid(), len as u64)?;
        self.repair_dispatch::<T>(off)?;
        Ok(self.region.address(off, len)?.cast())
    }

    /// Checked narrowing conversion based on the allocation's type number.
    pub fn downcast<D, B>(&self, ptr: PersistentPtr<B>) -> Result<PersistentPtr<D>>
    where
        B: Persistent,
        D: Persistent + nvobj_core::Extends<B>,
    {
        let off = self.check_oid(ptr.oid(), mem::size_of::<B>() as u64)?;
        let info = self.heap.object(off).ok_or_else(|| {
            Error::Type(format!("{} is not the start of a live allocation", ptr.oid()))
        })?;
        if info.type_num != D::type_num() {
            return Err(Error::Type(format!(
                "allocation {:#x} has type {}, not {}",
                off,
                info.type_num,
                D::type_name()
            )));
        }
        // SAFETY: the allocation was created as a `D`.
        Ok(unsafe { ptr.cast::<D>() })
    }

    /// Usable bytes of the allocation starting at `ptr`.
    pub fn usable_size<T>(&self, ptr: PersistentPtr<T>) -> Result<u64> {
        let off = self.check_oid(ptr.oid(), 0)?;
        self.heap
            .object(off)
            .map(|info| info.size)
            .ok_or_else(|| Error::OutOfRange(format!("{} is not a live allocation", ptr.oid())))
    }

    /// Fail with `Error::Type` if `T` is polymorphic but unregistered.
    pub(crate) fn require_registered<T: Persistent>(&self, type_num: TypeNum) -> Result<()> {
        if !T::dispatch_offsets().is_empty() && self.types.get(type_num).is_none() {
            return Err(Error::Type(format!(
                "polymorphic type {} ({}) is not registered",
                T::type_name(),
                type_num
            )));
        }
        Ok(())
    }

    fn repair_dispatch<T: Persistent>(&self, off: u64) -> Result<()> {
        let polymorphic = !T::dispatch_offsets().is_empty();
        let Some(info) = self.heap.containing(off) else {
            if polymorphic {
                return Err(Error::Type(format!(
                    "no live allocation of {} at {:#x}",
                    T::type_name(),
                    off
                )));
            }
            return Ok(());
        };
        if self.repaired.contains(&info.off) {
            return Ok(());
        }
        match self.types.get(info.type_num) {
            Some(entry) => {
                self.apply_repair(&info, &entry)?;
                self.repaired.insert(info.off);
                Ok(())
            }
            None if polymorphic => Err(Error::Type(format!(
                "allocation {:#x} has unregistered type {}; cannot repair {}",
                info.off,
                info.type_num,
                T::type_name()
            ))),
            None => Ok(()),
        }
    }

    fn apply_repair(&self, info: &ObjectInfo, entry: &TypeEntry) -> Result<()> {
        let stride = entry.size as u64;
        if stride == 0 {
            return Ok(());
        }
        let mut fixed = 0usize;
        for k in 0..info.size / stride {
            let base = info.off + k * stride;
            for &(word_off, value) in entry.words() {
                let at = base + word_off as u64;
                if self.region.read::<u64>(at)? != value {
                    self.region.write(at, &value)?;
                    fixed += 1;
                }
            }
        }
        if fixed > 0 {
            debug!(
                target: "nvobj::types",
                off = info.off,
                type_name = entry.type_name,
                slots = fixed,
                "Repaired dispatch slots"
            );
        }
        Ok(())
    }

    /// Forget per-run caches covering a released allocation.
    pub(crate) fn forget_object(&self, info: &ObjectInfo) {
        self.repaired.remove(&info.off);
        self.locks.forget_range(info.off, info.off + info.size);
    }

    pub(crate) fn after_rollback(&self, report: &RollbackReport) {
        for &(off, len) in &report.restored {
            // restored bytes may carry stale dispatch slots again
            for at in [off, off + len.saturating_sub(1)] {
                if let Some(info) = self.heap.containing(at) {
                    self.repaired.remove(&info.off);
                }
            }
        }
        for info in &report.released {
            self.forget_object(info);
        }
    }

    pub(crate) fn after_commit(&self, report: &CommitReport) {
        for info in &report.freed {
            self.forget_object(info);
        }
    }

    // ========================================================================
    // Non-transactional stores
    // ========================================================================

    /// Flush the referent of `ptr` to stable storage.
    pub fn persist<T: Persistent>(&self, ptr: PersistentPtr<T>) -> Result<()> {
        self.persist_range(ptr, mem::size_of::<T>() as u64)
    }

    /// Flush `len` bytes starting at `ptr`.
    pub fn persist_range<T>(&self, ptr: PersistentPtr<T>, len: u64) -> Result<()> {
        let off = self.check_oid(ptr.oid(), len)?;
        self.region.persist(off, len as usize)
    }

    /// Store `value` at `ptr` and flush it, outside any undo protection.
    pub fn write_persist<T: Persistent>(&self, ptr: PersistentPtr<T>, value: &T) -> Result<()> {
        let off = self.check_oid(ptr.oid(), mem::size_of::<T>() as u64)?;
        self.region.write_bytes(off, bytes_of(value))?;
        self.region.persist(off, mem::size_of::<T>())
    }

    /// Store `value` at `slot`, undo-logged when a transaction is active on
    /// this thread, otherwise written and flushed directly.
    ///
    /// Use this for persistent pointers embedded in persisted structures:
    /// their bytes are transactional data like any other field.
    pub fn assign<T: Persistent>(&self, slot: PersistentPtr<T>, value: T) -> Result<()> {
        if self.stage() == TxStage::None {
            self.write_persist(slot, &value)
        } else {
            crate::transaction::Transaction::current(self)?.write(slot, value)
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("path", &self.path)
            .field("layout", &self.layout)
            .field("pool_id", &format_args!("{:016x}", self.pool_id))
            .field("run_id", &self.run_id)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.region.persist_all() {
                warn!(target: "nvobj::pool", error = %e, "Final flush failed");
            }
        }
        OPEN_POOLS
            .lock()
            .remove_dead(self.pool_id, self.path.as_deref());
    }
}

fn new_pool_id() -> u64 {
    let v = Uuid::new_v4().as_u128();
    match (v as u64) ^ ((v >> 64) as u64) {
        0 => 1,
        id => id,
    }
}

fn acquire_lock_file(path: &Path) -> Result<File> {
    let lock_path = sidecar_path(path, LOCK_SUFFIX);
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| Error::Pool(format!("failed to open lock file: {}", e)))?;
    fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|_| {
        Error::Pool(format!(
            "pool '{}' is already in use by another process",
            path.display()
        ))
    })?;
    Ok(lock_file)
}
