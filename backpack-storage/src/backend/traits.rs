//! The contract a persistence backend must satisfy.

use async_trait::async_trait;
use backpack_core::{BackpackResult, Container, EntityRef, NamespaceId, StorageMode};

/// Storage backend trait for pluggable persistence.
///
/// The [`InventoryCache`](crate::InventoryCache) is the transient half of the
/// system; a backend is the durable half. [`BackedInventory`](super::BackedInventory)
/// composes the two: a cache miss consults `load_container` first, and
/// callers persist mutations through `store_container`.
///
/// # Requirements
///
/// - `setup` runs once before any other call is trusted and is idempotent
/// - `load_container` returns `Ok(None)` for a pair it has never stored
/// - `store_container` overwrites whatever was stored for the pair
/// - Implementations are shared across tasks and must be `Send + Sync`
///
/// Callers never hold a cache lock while awaiting a backend call, so
/// implementations may be slow.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// The medium backing this implementation.
    fn mode(&self) -> StorageMode;

    /// Prepare the backend (open files, run migrations, ...).
    async fn setup(&self) -> BackpackResult<()>;

    /// Fetch the stored container for `(entity, namespace)`.
    async fn load_container(
        &self,
        entity: &EntityRef,
        namespace: NamespaceId,
    ) -> BackpackResult<Option<Container>>;

    /// Durably write `container` for `(entity, namespace)`.
    async fn store_container(
        &self,
        entity: &EntityRef,
        namespace: NamespaceId,
        container: &Container,
    ) -> BackpackResult<()>;
}
