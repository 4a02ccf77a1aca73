//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Largest accepted file store map size (1 TiB).
pub const MAX_MAP_SIZE_MB: usize = 1 << 20;

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackpackConfig {
    /// Which backend medium to open
    pub storage_mode: StorageMode,
    /// Title given to freshly created containers
    pub default_title: String,
    /// Capacity used by hosts that have no capacity policy of their own
    pub default_capacity: usize,
    /// Upper bound applied to every resolved capacity
    pub max_capacity: usize,
    /// Directory for file-mode storage
    pub data_dir: PathBuf,
    /// Map size of the file store, in megabytes
    pub map_size_mb: usize,
}

impl Default for BackpackConfig {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::Memory,
            default_title: "Backpack".to_string(),
            default_capacity: 9,
            max_capacity: 54,
            data_dir: PathBuf::from("backpacks"),
            map_size_mb: 64,
        }
    }
}

impl BackpackConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `BACKPACK_STORAGE_MODE`: `memory`, `file` or `database` (default: memory)
    /// - `BACKPACK_DEFAULT_TITLE`: Title of new containers (default: Backpack)
    /// - `BACKPACK_DEFAULT_CAPACITY`: Fallback capacity (default: 9)
    /// - `BACKPACK_MAX_CAPACITY`: Capacity ceiling (default: 54)
    /// - `BACKPACK_DATA_DIR`: File store directory (default: backpacks)
    /// - `BACKPACK_MAP_SIZE_MB`: File store map size (default: 64)
    ///
    /// Unparseable values fall back to the default for that field.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` is this over the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            storage_mode: lookup("BACKPACK_STORAGE_MODE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.storage_mode),
            default_title: lookup("BACKPACK_DEFAULT_TITLE").unwrap_or(defaults.default_title),
            default_capacity: lookup("BACKPACK_DEFAULT_CAPACITY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_capacity),
            max_capacity: lookup("BACKPACK_MAX_CAPACITY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_capacity),
            data_dir: lookup("BACKPACK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            map_size_mb: lookup("BACKPACK_MAP_SIZE_MB")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.map_size_mb),
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(BackpackError::Config) if invalid.
    ///
    /// Validates:
    /// - default_title is not blank
    /// - default_capacity <= max_capacity
    /// - 0 < map_size_mb <= MAX_MAP_SIZE_MB and data_dir is set when
    ///   storage_mode is File
    pub fn validate(&self) -> BackpackResult<()> {
        if self.default_title.trim().is_empty() {
            return Err(BackpackError::Config(ConfigError::InvalidValue {
                field: "default_title".to_string(),
                value: self.default_title.clone(),
                reason: "default_title must not be blank".to_string(),
            }));
        }

        if self.default_capacity > self.max_capacity {
            return Err(BackpackError::Config(ConfigError::InvalidValue {
                field: "default_capacity".to_string(),
                value: self.default_capacity.to_string(),
                reason: format!(
                    "default_capacity must not exceed max_capacity ({})",
                    self.max_capacity
                ),
            }));
        }

        if self.storage_mode == StorageMode::File {
            if self.data_dir.as_os_str().is_empty() {
                return Err(BackpackError::Config(ConfigError::MissingRequired {
                    field: "data_dir".to_string(),
                }));
            }
            if self.map_size_mb == 0 {
                return Err(BackpackError::Config(ConfigError::InvalidValue {
                    field: "map_size_mb".to_string(),
                    value: self.map_size_mb.to_string(),
                    reason: "map_size_mb must be greater than 0".to_string(),
                }));
            }
            if self.map_size_mb > MAX_MAP_SIZE_MB {
                return Err(BackpackError::Config(ConfigError::InvalidValue {
                    field: "map_size_mb".to_string(),
                    value: self.map_size_mb.to_string(),
                    reason: format!("map_size_mb must not exceed {MAX_MAP_SIZE_MB}"),
                }));
            }
        }

        Ok(())
    }

    /// Clamp a resolved capacity to the configured ceiling.
    pub fn clamp_capacity(&self, capacity: usize) -> usize {
        capacity.min(self.max_capacity)
    }
}

// =============================================================================
// TESTS
// =============================================================================
