//! Namespace-scoped storage keys for the file backend.
//!
//! A `NamespaceScopedKey` cannot be built without naming the namespace, so a
//! backend lookup can never wander into another namespace's records.

use backpack_core::{EntityId, NamespaceId};
use uuid::Uuid;

/// Separator byte between namespace_id and entity_id.
const SEPARATOR: u8 = 0xFF;

/// Length of an encoded key.
pub const KEY_LEN: usize = 33;

/// Length of a namespace prefix.
pub const PREFIX_LEN: usize = 17;

/// A storage key scoped to one namespace.
///
/// # Binary Format
///
/// The key encodes to a fixed 33-byte array:
/// - Bytes 0-15: namespace_id (UUID as bytes)
/// - Byte 16: separator (0xFF)
/// - Bytes 17-32: entity_id (UUID as bytes)
///
/// Keys sort by namespace first, so a prefix scan walks exactly one
/// namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceScopedKey {
    inner: ScopedKeyInner,
}

/// Private inner struct - prevents external construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ScopedKeyInner {
    namespace: NamespaceId,
    entity: EntityId,
}

impl NamespaceScopedKey {
    /// Create a key for `entity` inside `namespace`. This is the only
    /// constructor.
    pub fn new(namespace: NamespaceId, entity: EntityId) -> Self {
        Self {
            inner: ScopedKeyInner { namespace, entity },
        }
    }

    pub fn namespace(&self) -> NamespaceId {
        self.inner.namespace
    }

    pub fn entity(&self) -> EntityId {
        self.inner.entity
    }

    /// Encode to the fixed 33-byte layout.
    pub fn encode(&self) -> [u8; KEY_LEN] {
        let mut bytes = [0u8; KEY_LEN];
        bytes[0..16].copy_from_slice(self.inner.namespace.as_uuid().as_bytes());
        bytes[16] = SEPARATOR;
        bytes[17..33].copy_from_slice(self.inner.entity.as_uuid().as_bytes());
        bytes
    }

    /// Decode a key from bytes.
    ///
    /// Returns `None` if the slice is not exactly 33 bytes or the separator
    /// byte is wrong.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != KEY_LEN || bytes[16] != SEPARATOR {
            return None;
        }

        let namespace = Uuid::from_slice(&bytes[0..16]).ok()?;
        let entity = Uuid::from_slice(&bytes[17..33]).ok()?;

        Some(Self::new(namespace.into(), entity.into()))
    }

    /// Prefix shared by every key in `namespace`.
    pub fn namespace_prefix(namespace: NamespaceId) -> [u8; PREFIX_LEN] {
        let mut prefix = [0u8; PREFIX_LEN];
        prefix[0..16].copy_from_slice(namespace.as_uuid().as_bytes());
        prefix[16] = SEPARATOR;
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_getters() {
        let namespace = NamespaceId::now_v7();
        let entity = EntityId::now_v7();

        let key = NamespaceScopedKey::new(namespace, entity);

        assert_eq!(key.namespace(), namespace);
        assert_eq!(key.entity(), entity);
    }

    #[test]
    fn test_decode_wrong_length() {
        assert!(NamespaceScopedKey::decode(&[0u8; 32]).is_none());
        assert!(NamespaceScopedKey::decode(&[0u8; 34]).is_none());
    }

    #[test]
    fn test_decode_wrong_separator() {
        let mut bytes = NamespaceScopedKey::new(NamespaceId::now_v7(), EntityId::now_v7()).encode();
        bytes[16] = 0x00;
        assert!(NamespaceScopedKey::decode(&bytes).is_none());
    }

    #[test]
    fn test_namespace_prefix() {
        let namespace = NamespaceId::now_v7();
        let prefix = NamespaceScopedKey::namespace_prefix(namespace);

        assert_eq!(&prefix[0..16], namespace.as_uuid().as_bytes());
        assert_eq!(prefix[16], SEPARATOR);
    }

    #[test]
    fn test_different_namespaces_different_keys() {
        let entity = EntityId::now_v7();
        let key1 = NamespaceScopedKey::new(NamespaceId::now_v7(), entity);
        let key2 = NamespaceScopedKey::new(NamespaceId::now_v7(), entity);
        assert_ne!(key1.encode(), key2.encode());
    }

    #[test]
    fn test_same_namespace_different_entities_different_keys() {
        let namespace = NamespaceId::now_v7();
        let key1 = NamespaceScopedKey::new(namespace, EntityId::now_v7());
        let key2 = NamespaceScopedKey::new(namespace, EntityId::now_v7());
        assert_ne!(key1.encode(), key2.encode());
    }
}
