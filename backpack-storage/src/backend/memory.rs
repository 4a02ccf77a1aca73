//! Memory-only mode: the cache is the store.

use async_trait::async_trait;
use backpack_core::{BackpackResult, Container, EntityRef, NamespaceId, StorageMode};
use tracing::trace;

use super::traits::StorageBackend;

/// Backend for [`StorageMode::Memory`].
///
/// Nothing is ever loaded, and stores are accepted and dropped: the
/// containers already live in the [`InventoryCache`](crate::InventoryCache)
/// and vanish with the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBackend;

impl MemoryBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn setup(&self) -> BackpackResult<()> {
        Ok(())
    }

    async fn load_container(
        &self,
        _entity: &EntityRef,
        _namespace: NamespaceId,
    ) -> BackpackResult<Option<Container>> {
        Ok(None)
    }

    async fn store_container(
        &self,
        entity: &EntityRef,
        namespace: NamespaceId,
        _container: &Container,
    ) -> BackpackResult<()> {
        trace!(entity = %entity.id, %namespace, "memory mode store skipped");
        Ok(())
    }
}
