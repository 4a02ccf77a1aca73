//! BACKPACK Storage - Inventory Cache and Storage Backends
//!
//! The [`InventoryCache`] keeps one container per (namespace, entity) pair in
//! memory. The [`Aggregator`] reads an entity's containers across namespaces.
//! A [`StorageBackend`] persists containers, and [`BackedInventory`] puts the
//! cache in front of one.

pub mod backend;
pub mod inventory;

pub use backend::{
    open_backend, BackedInventory, BackendStats, LmdbBackend, LmdbBackendError, MemoryBackend,
    NamespaceScopedKey, StorageBackend,
};
pub use inventory::{
    Aggregator, CacheStats, CapacityResolver, ContainerFactory, FixedCapacity, InventoryCache,
    NamespaceEnumerator, SharedContainer, StaticNamespaces, TitledContainerFactory,
};
