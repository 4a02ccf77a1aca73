//! Identity types for BACKPACK namespaces and entities

use crate::{BackpackError, BackpackResult, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generates a strongly-typed UUID wrapper.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap an existing UUID.
            pub const fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// Generate a new timestamp-sortable id (UUIDv7).
            pub fn now_v7() -> Self {
                Self(Uuid::now_v7())
            }

            /// The nil id, never valid as a cache key.
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a namespace (one top-level partition of the cache).
    NamespaceId
);

uuid_id!(
    /// Permanent identifier of an entity. This, not the display name, keys the cache.
    EntityId
);

impl NamespaceId {
    /// Reject the nil namespace.
    pub fn validate(&self) -> BackpackResult<()> {
        if self.is_nil() {
            return Err(BackpackError::missing("namespace"));
        }
        Ok(())
    }
}

/// The owner of a set of containers.
///
/// Equality and hashing are by `id` only; `display_name` is a mutable
/// attribute carried along for container titles and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: EntityId,
    pub display_name: String,
}

impl EntityRef {
    pub fn new(id: EntityId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    /// Check that the reference can be used as a cache key.
    pub fn validate(&self) -> BackpackResult<()> {
        if self.id.is_nil() {
            return Err(BackpackError::missing("entity.id"));
        }
        if self.display_name.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "entity.display_name".to_string(),
                reason: "display name must not be blank".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EntityRef {}

impl std::hash::Hash for EntityRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}
