//! Durable storage for inventory containers.
//!
//! A [`StorageBackend`] persists containers per (entity, namespace) pair.
//! [`open_backend`] picks the implementation named by
//! [`BackpackConfig::storage_mode`]:
//!
//! | Mode       | Backend           |
//! |------------|-------------------|
//! | `memory`   | [`MemoryBackend`] |
//! | `file`     | [`LmdbBackend`]   |
//! | `database` | not available     |

pub mod backed;
pub mod lmdb;
pub mod memory;
pub mod scoped_key;
pub mod traits;

use std::sync::Arc;

use backpack_core::{BackpackConfig, BackpackResult, ConfigError, StorageMode};
use tracing::info;

pub use backed::BackedInventory;
pub use lmdb::{BackendStats, LmdbBackend, LmdbBackendError};
pub use memory::MemoryBackend;
pub use scoped_key::NamespaceScopedKey;
pub use traits::StorageBackend;

/// Build the backend for `config.storage_mode`.
///
/// The backend is not set up yet; call [`StorageBackend::setup`] (or let
/// [`BackedInventory`] do it on first use).
pub fn open_backend(config: &BackpackConfig) -> BackpackResult<Arc<dyn StorageBackend>> {
    config.validate()?;
    let backend: Arc<dyn StorageBackend> = match config.storage_mode {
        StorageMode::Memory => Arc::new(MemoryBackend::new()),
        StorageMode::File => Arc::new(LmdbBackend::from_config(config)),
        StorageMode::Database => {
            return Err(ConfigError::ModeNotSupported {
                mode: StorageMode::Database,
            }
            .into())
        }
    };
    info!(mode = %config.storage_mode, "storage backend selected");
    Ok(backend)
}
