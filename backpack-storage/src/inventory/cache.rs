//! Namespace → entity → container store with lazy creation and capacity
//! reconciliation.
//!
//! # Locking
//!
//! - Namespaces live in a sharded map; each namespace owns its own sharded
//!   partition, so traffic on one namespace never blocks another.
//! - Creation goes through the partition's entry API: concurrent misses on
//!   the same key reserve one slot and build exactly one container.
//! - Each container sits behind its own `RwLock`. A resize holds the write
//!   lock for the whole migration, so no reader sees a half-resized sequence.
//!
//! No lock is held across a call that leaves this module except the factory
//! call on a miss, which must not re-enter the cache.

use std::sync::{Arc, RwLock};

use backpack_core::{
    BackpackConfig, BackpackResult, Container, EntityId, EntityRef, NamespaceId, StorageError,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use super::stats::{CacheStats, StatsRecorder};
use super::traits::{CapacityResolver, ContainerFactory, TitledContainerFactory};

/// Cache-owned handle to a container. Two handles refer to the same container
/// when `Arc::ptr_eq` holds.
pub type SharedContainer = Arc<RwLock<Container>>;

type Partition = DashMap<EntityId, SharedContainer>;

/// In-memory inventory cache.
///
/// # Example
///
/// ```ignore
/// let cache = InventoryCache::new(Arc::new(FixedCapacity(9)), Arc::new(TitledContainerFactory::default()));
/// let backpack = cache.get(&alice, overworld)?;
/// backpack.write().unwrap().set_slot(0, Some(Item::new("torch", 16)));
/// ```
pub struct InventoryCache {
    partitions: DashMap<NamespaceId, Arc<Partition>>,
    capacity: Arc<dyn CapacityResolver>,
    factory: Arc<dyn ContainerFactory>,
    max_capacity: usize,
    stats: StatsRecorder,
}

impl InventoryCache {
    /// Create an empty cache around the given collaborators.
    pub fn new(capacity: Arc<dyn CapacityResolver>, factory: Arc<dyn ContainerFactory>) -> Self {
        Self {
            partitions: DashMap::new(),
            capacity,
            factory,
            max_capacity: usize::MAX,
            stats: StatsRecorder::default(),
        }
    }

    /// Create a cache whose factory titles containers with
    /// `config.default_title` and whose capacities are clamped to
    /// `config.max_capacity`.
    pub fn from_config(config: &BackpackConfig, capacity: Arc<dyn CapacityResolver>) -> Self {
        Self::new(
            capacity,
            Arc::new(TitledContainerFactory::new(config.default_title.clone())),
        )
        .with_max_capacity(config.max_capacity)
    }

    /// Clamp every resolved capacity to `max`.
    pub fn with_max_capacity(mut self, max: usize) -> Self {
        self.max_capacity = max;
        self
    }

    /// The capacity `entity` should have right now.
    pub fn resolve_capacity(&self, entity: &EntityRef) -> usize {
        self.capacity.capacity(entity).min(self.max_capacity)
    }

    /// Store `container` for `(entity, namespace)`, replacing whatever was
    /// there. Never reads the previous content.
    pub fn put(
        &self,
        entity: &EntityRef,
        namespace: NamespaceId,
        container: Container,
    ) -> BackpackResult<SharedContainer> {
        validate_request(entity, namespace)?;

        let shared = Arc::new(RwLock::new(container));
        let previous = self
            .partition(namespace)
            .insert(entity.id, Arc::clone(&shared));

        if previous.is_some() {
            self.stats.record_overwrite();
            trace!(entity = %entity.id, %namespace, "container overwritten");
        }
        Ok(shared)
    }

    /// Store a fresh factory-built container sized by the capacity resolver.
    pub fn put_default(
        &self,
        entity: &EntityRef,
        namespace: NamespaceId,
    ) -> BackpackResult<SharedContainer> {
        validate_request(entity, namespace)?;
        let capacity = self.resolve_capacity(entity);
        self.put(entity, namespace, self.factory.create(entity, capacity))
    }

    /// Fetch the container for `(entity, namespace)`.
    ///
    /// A miss creates and stores a factory container. A hit migrates the
    /// stored container in place when the resolved capacity has drifted.
    pub fn get(&self, entity: &EntityRef, namespace: NamespaceId) -> BackpackResult<SharedContainer> {
        self.get_or_seed(entity, namespace, None)
    }

    /// Like [`get`](Self::get), but a miss stores `seed` (resized to the
    /// current capacity) instead of a factory container. On a hit the seed is
    /// discarded.
    pub fn get_or_seed(
        &self,
        entity: &EntityRef,
        namespace: NamespaceId,
        seed: Option<Container>,
    ) -> BackpackResult<SharedContainer> {
        validate_request(entity, namespace)?;

        let capacity = self.resolve_capacity(entity);
        let partition = self.partition(namespace);

        // Hits only take the shard read lock.
        let cached = partition.get(&entity.id).map(|entry| Arc::clone(entry.value()));
        if let Some(existing) = cached {
            return self.hit(existing, entity, namespace, capacity);
        }

        let existing = match partition.entry(entity.id) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let seeded = seed.is_some();
                let mut container = match seed {
                    Some(container) => container,
                    None => self.factory.create(entity, capacity),
                };
                let dropped = container.resize(capacity);
                if dropped > 0 {
                    warn!(
                        entity = %entity.id,
                        %namespace,
                        dropped,
                        capacity,
                        "seeded container exceeded capacity"
                    );
                }

                let shared = Arc::new(RwLock::new(container));
                entry.insert(Arc::clone(&shared));
                self.stats.record_miss(seeded);
                debug!(entity = %entity.id, %namespace, capacity, seeded, "container created");
                return Ok(shared);
            }
        };

        self.hit(existing, entity, namespace, capacity)
    }

    /// The cached container, reconciled to the current capacity, or `None`
    /// on a miss. Never creates anything, so callers can fall back to
    /// [`get_or_seed`](Self::get_or_seed) with a loaded container.
    pub fn get_cached(
        &self,
        entity: &EntityRef,
        namespace: NamespaceId,
    ) -> BackpackResult<Option<SharedContainer>> {
        validate_request(entity, namespace)?;

        let capacity = self.resolve_capacity(entity);
        let Some(existing) = self.peek(entity.id, namespace) else {
            return Ok(None);
        };
        self.hit(existing, entity, namespace, capacity).map(Some)
    }

    /// Whether a container is cached for `(entity, namespace)`.
    pub fn contains(&self, entity: EntityId, namespace: NamespaceId) -> bool {
        self.partitions
            .get(&namespace)
            .is_some_and(|partition| partition.contains_key(&entity))
    }

    /// The cached container, if any, without creating or resizing it.
    pub fn peek(&self, entity: EntityId, namespace: NamespaceId) -> Option<SharedContainer> {
        let partition = self.existing_partition(namespace)?;
        let shared = partition.get(&entity).map(|entry| Arc::clone(entry.value()));
        shared
    }

    /// Remove the container for `(entity, namespace)` and hand it back.
    pub fn evict(&self, entity: EntityId, namespace: NamespaceId) -> Option<SharedContainer> {
        let partition = self.existing_partition(namespace)?;
        let (_, shared) = partition.remove(&entity)?;
        self.stats.record_evictions(1);
        debug!(%entity, %namespace, "container evicted");
        Some(shared)
    }

    /// Remove every container owned by `entity`. Returns how many were removed.
    pub fn evict_entity(&self, entity: EntityId) -> usize {
        let removed = self
            .partition_handles()
            .iter()
            .filter(|partition| partition.remove(&entity).is_some())
            .count();
        if removed > 0 {
            self.stats.record_evictions(removed as u64);
            debug!(%entity, removed, "entity evicted");
        }
        removed
    }

    /// Namespaces in which `entity` currently has a cached container.
    pub fn namespaces_for(&self, entity: EntityId) -> Vec<NamespaceId> {
        self.partitions
            .iter()
            .filter(|partition| partition.value().contains_key(&entity))
            .map(|partition| *partition.key())
            .collect()
    }

    /// Total number of cached containers.
    pub fn len(&self) -> usize {
        self.partition_handles()
            .iter()
            .map(|partition| partition.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len() as u64)
    }

    fn hit(
        &self,
        existing: SharedContainer,
        entity: &EntityRef,
        namespace: NamespaceId,
        capacity: usize,
    ) -> BackpackResult<SharedContainer> {
        self.stats.record_hit();
        self.reconcile(&existing, entity, namespace, capacity)?;
        Ok(existing)
    }

    /// Bring `shared` to `capacity`, holding its write lock for the migration.
    fn reconcile(
        &self,
        shared: &SharedContainer,
        entity: &EntityRef,
        namespace: NamespaceId,
        capacity: usize,
    ) -> BackpackResult<()> {
        let current = shared
            .read()
            .map_err(|_| poisoned(entity, namespace))?
            .capacity();
        if current == capacity {
            return Ok(());
        }

        let mut container = shared.write().map_err(|_| poisoned(entity, namespace))?;
        // Another caller may have migrated it while we waited for the lock.
        let previous = container.capacity();
        if previous == capacity {
            return Ok(());
        }
        let dropped = container.resize(capacity);
        drop(container);

        self.stats.record_resize();
        debug!(
            entity = %entity.id,
            %namespace,
            previous,
            capacity,
            dropped,
            "container capacity reconciled"
        );
        Ok(())
    }

    /// The partition for `namespace`, created on first touch.
    fn partition(&self, namespace: NamespaceId) -> Arc<Partition> {
        if let Some(partition) = self.existing_partition(namespace) {
            return partition;
        }
        Arc::clone(self.partitions.entry(namespace).or_default().value())
    }

    fn existing_partition(&self, namespace: NamespaceId) -> Option<Arc<Partition>> {
        self.partitions
            .get(&namespace)
            .map(|partition| Arc::clone(partition.value()))
    }

    /// Clone out every partition so callers can walk them without holding
    /// the outer map's shard locks.
    fn partition_handles(&self) -> Vec<Arc<Partition>> {
        self.partitions
            .iter()
            .map(|partition| Arc::clone(partition.value()))
            .collect()
    }
}

impl std::fmt::Debug for InventoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryCache")
            .field("namespaces", &self.partitions.len())
            .field("max_capacity", &self.max_capacity)
            .finish_non_exhaustive()
    }
}

fn validate_request(entity: &EntityRef, namespace: NamespaceId) -> BackpackResult<()> {
    entity
        .validate()
        .and_then(|()| namespace.validate())
        .inspect_err(|e| warn!(error = %e, "rejected inventory request"))
}

pub(crate) fn poisoned(entity: &EntityRef, namespace: NamespaceId) -> StorageError {
    StorageError::LockPoisoned {
        entity: entity.id.to_string(),
        namespace: namespace.to_string(),
    }
}
