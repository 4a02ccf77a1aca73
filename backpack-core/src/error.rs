//! Error types for BACKPACK operations

use crate::StorageMode;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Container lock poisoned for entity {entity} in namespace {namespace}")]
    LockPoisoned { entity: String, namespace: String },

    #[error("Backend {mode} failed: {reason}")]
    Backend { mode: StorageMode, reason: String },

    #[error("Backend {mode} used before setup")]
    NotInitialized { mode: StorageMode },

    #[error("Corrupt container record for entity {entity} in namespace {namespace}: {reason}")]
    CorruptRecord {
        entity: String,
        namespace: String,
        reason: String,
    },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Storage mode not supported: {mode}")]
    ModeNotSupported { mode: StorageMode },
}

/// Master error type for all BACKPACK errors.
#[derive(Debug, Clone, Error)]
pub enum BackpackError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl BackpackError {
    /// Shorthand for a missing required input.
    pub fn missing(field: impl Into<String>) -> Self {
        BackpackError::Validation(ValidationError::RequiredFieldMissing {
            field: field.into(),
        })
    }

    /// Whether this error was caused by caller input rather than the store.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, BackpackError::Validation(_))
    }
}

/// Result type alias for BACKPACK operations.
pub type BackpackResult<T> = Result<T, BackpackError>;

// =============================================================================
// TESTS
// =============================================================================
