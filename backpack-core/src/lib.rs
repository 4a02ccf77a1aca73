//! BACKPACK Core - Container Types
//!
//! Pure data structures shared by every other crate: identities, containers,
//! errors and configuration. No caching or persistence logic lives here.

pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;

pub use config::{BackpackConfig, MAX_MAP_SIZE_MB};
pub use entities::{empty_slots, Container, Item, Slot};
pub use enums::{StorageMode, StorageModeParseError};
pub use error::{BackpackError, BackpackResult, ConfigError, StorageError, ValidationError};
pub use identity::{EntityId, EntityRef, NamespaceId};
