//! Pool builder for programmatic configuration
//!
//! The alternative to editing `<pool>.toml`: settings given here take
//! precedence over the file.

use nvobj_core::Result;
use nvobj_durability::DurabilityMode;
use std::path::Path;
use std::sync::Arc;

use super::config::{sidecar_path, PoolConfig, CONFIG_SUFFIX};
use super::{OpenParams, Pool};
use crate::types::{Runtime, TypeRegistry};

// ============================================================================
// Pool Builder Pattern
// ============================================================================

/// Builder for pool configuration
///
/// ```ignore
/// use nvobj::Pool;
///
/// // 1. Defaults from <pool>.toml
/// let pool = Pool::open("/mnt/pmem/data.pool", "queue")?;
///
/// // 2. Builder for custom settings
/// let pool = Pool::builder()
///     .layout("queue")
///     .size(64 << 20)
///     .lanes(4)
///     .create("/mnt/pmem/data.pool")?;
///
/// // 3. Ephemeral (no files, testing)
/// let pool = Pool::builder().layout("queue").ephemeral()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct PoolBuilder {
    layout: String,
    size: u64,
    config: Option<PoolConfig>,
    types: Option<Arc<TypeRegistry>>,
}

impl PoolBuilder {
    /// Builder with an empty layout tag and defaults everywhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout tag written at create and verified at open.
    pub fn layout(mut self, layout: &str) -> Self {
        self.layout = layout.to_string();
        self
    }

    /// Pool size in bytes for `create`; 0 uses the configured default.
    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Use this configuration instead of `<pool>.toml`.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the durability mode.
    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        let config = self.config.get_or_insert_with(PoolConfig::default);
        config.durability = match mode {
            DurabilityMode::Always => "always",
            DurabilityMode::Cache => "cache",
        }
        .to_string();
        self
    }

    /// Override the number of journal lanes.
    pub fn lanes(mut self, lanes: usize) -> Self {
        self.config.get_or_insert_with(PoolConfig::default).lanes = lanes;
        self
    }

    /// Type registry for dispatch repair.
    ///
    /// Defaults to the process runtime's registry when one is initialized,
    /// otherwise to an empty registry private to the pool.
    pub fn types(mut self, types: Arc<TypeRegistry>) -> Self {
        self.types = Some(types);
        self
    }

    fn params(self, path: Option<&Path>) -> Result<OpenParams> {
        let config = match (self.config, path) {
            (Some(config), _) => config,
            (None, Some(path)) => PoolConfig::load_or_default(&sidecar_path(path, CONFIG_SUFFIX))?,
            (None, None) => PoolConfig::default(),
        };
        let types = self
            .types
            .or_else(|| Runtime::get().map(|rt| Arc::clone(rt.types())))
            .unwrap_or_else(|| Arc::new(TypeRegistry::new()));
        Ok(OpenParams {
            layout: self.layout,
            size: self.size,
            config,
            types,
        })
    }

    /// Create a new pool file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Pool` if the file exists or the size is below the
    /// minimum, `Error::Config` for an invalid configuration.
    pub fn create<P: AsRef<Path>>(self, path: P) -> Result<Arc<Pool>> {
        let path = path.as_ref();
        let params = self.params(Some(path))?;
        Pool::create_at(path, params)
    }

    /// Open an existing pool file, running crash recovery.
    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<Arc<Pool>> {
        let path = path.as_ref();
        let params = self.params(Some(path))?;
        Pool::open_at(path, params)
    }

    /// Pool over an anonymous mapping.
    ///
    /// No files are created and durability is always Cache.
    pub fn ephemeral(self) -> Result<Arc<Pool>> {
        let params = self.params(None)?;
        Pool::ephemeral_with(params)
    }
}
