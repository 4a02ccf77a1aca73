//! Enum types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// STORAGE MODE
// ============================================================================

/// The medium backing a storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Containers live only in process memory and vanish on shutdown
    #[default]
    Memory,
    /// Containers are written to a local file store
    File,
    /// Containers are written to an external database
    Database,
}

impl StorageMode {
    /// Convert to the lowercase configuration string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Memory => "memory",
            StorageMode::File => "file",
            StorageMode::Database => "database",
        }
    }

    /// Whether containers survive a process restart in this mode.
    pub fn is_durable(&self) -> bool {
        !matches!(self, StorageMode::Memory)
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = StorageModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "none" => Ok(StorageMode::Memory),
            "file" => Ok(StorageMode::File),
            "database" | "sql" => Ok(StorageMode::Database),
            _ => Err(StorageModeParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid storage mode string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageModeParseError(pub String);

impl fmt::Display for StorageModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid storage mode: {}", self.0)
    }
}

impl std::error::Error for StorageModeParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_mode_roundtrip_str() {
        for mode in [StorageMode::Memory, StorageMode::File, StorageMode::Database] {
            assert_eq!(mode.as_str().parse::<StorageMode>(), Ok(mode));
        }
    }

    #[test]
    fn test_storage_mode_aliases() {
        assert_eq!("NONE".parse::<StorageMode>(), Ok(StorageMode::Memory));
        assert_eq!(" sql ".parse::<StorageMode>(), Ok(StorageMode::Database));
        assert_eq!("File".parse::<StorageMode>(), Ok(StorageMode::File));
    }

    #[test]
    fn test_storage_mode_parse_error() {
        let err = "tape".parse::<StorageMode>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid storage mode: tape");
    }

    #[test]
    fn test_storage_mode_durability() {
        assert!(!StorageMode::Memory.is_durable());
        assert!(StorageMode::File.is_durable());
        assert!(StorageMode::Database.is_durable());
        assert_eq!(StorageMode::default(), StorageMode::Memory);
    }

    #[test]
    fn test_storage_mode_serde_lowercase() {
        let json = serde_json::to_string(&StorageMode::File).unwrap();
        assert_eq!(json, "\"file\"");
        let back: StorageMode = serde_json::from_str("\"database\"").unwrap();
        assert_eq!(back, StorageMode::Database);
    }
}
