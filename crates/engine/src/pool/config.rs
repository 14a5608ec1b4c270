//! Pool configuration via `<pool>.toml`
//!
//! A pool file `data.pool` is accompanied by `data.pool.toml`. On create the
//! file is written with the effective settings if it does not exist yet; on
//! open it is read back. Edit the file and reopen the pool to change
//! settings.

use nvobj_core::{Error, Result};
use nvobj_durability::DurabilityMode;
use nvobj_storage::MIN_POOL_SIZE;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Suffix appended to the pool path for the config file.
pub const CONFIG_SUFFIX: &str = ".toml";

/// Suffix appended to the pool path for the lane journal directory.
pub const LANES_SUFFIX: &str = ".lanes";

/// Suffix appended to the pool path for the process lock file.
pub const LOCK_SUFFIX: &str = ".lock";

/// Default number of lane journals.
pub const DEFAULT_LANES: usize = 8;

/// Default permission bits of a new pool file.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// Pool configuration loaded from `<pool>.toml`.
///
/// # Example
///
/// ```toml
/// # "always" (default) or "cache"
/// durability = "always"
/// lanes = 8
/// pool_size = 8388608
/// file_mode = 384
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Durability mode: `"always"` or `"cache"`.
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Number of undo journal lanes (concurrent durable transactions).
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    /// Size in bytes used when creating a pool without an explicit size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u64,
    /// Unix permission bits of a newly created pool file.
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,
}

fn default_durability_str() -> String {
    "always".to_string()
}

fn default_lanes() -> usize {
    DEFAULT_LANES
}

fn default_pool_size() -> u64 {
    MIN_POOL_SIZE
}

fn default_file_mode() -> u32 {
    DEFAULT_FILE_MODE
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            durability: default_durability_str(),
            lanes: default_lanes(),
            pool_size: default_pool_size(),
            file_mode: default_file_mode(),
        }
    }
}

impl PoolConfig {
    /// Parse the durability string into a `DurabilityMode`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the string is not `"always"` or `"cache"`.
    pub fn durability_mode(&self) -> Result<DurabilityMode> {
        DurabilityMode::parse(&self.durability).ok_or_else(|| {
            Error::Config(format!(
                "Invalid durability mode '{}'. Expected \"always\" or \"cache\".",
                self.durability
            ))
        })
    }

    /// Check every field.
    pub fn validate(&self) -> Result<()> {
        self.durability_mode()?;
        if self.lanes == 0 {
            return Err(Error::Config("lanes must be at least 1".into()));
        }
        if self.pool_size < MIN_POOL_SIZE {
            return Err(Error::Config(format!(
                "pool_size {} is below the minimum of {} bytes",
                self.pool_size, MIN_POOL_SIZE
            )));
        }
        if self.file_mode & !0o777 != 0 {
            return Err(Error::Config(format!(
                "file_mode {:#o} has bits outside 0o777",
                self.file_mode
            )));
        }
        Ok(())
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: PoolConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path` if it exists, otherwise return the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

/// `<pool path><suffix>`, e.g. `data.pool.toml`.
pub fn sidecar_path(pool: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = pool.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
