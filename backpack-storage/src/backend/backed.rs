//! Read-through composition of the inventory cache and a storage backend.
//!
//! Reads consult the cache first. A miss loads from the backend, and the
//! loaded container (or a fresh factory container when nothing is stored)
//! seeds the cache. Writes go to the cache, and `save` pushes a snapshot of a
//! cached container to the backend.
//!
//! No cache lock is ever held across an await: snapshots are cloned under
//! the container's read lock and the guard is dropped before the backend
//! call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use backpack_core::{BackpackResult, Container, EntityId, EntityRef, NamespaceId, StorageMode};
use dashmap::DashMap;
use tracing::{debug, warn};

use super::traits::StorageBackend;
use crate::inventory::cache::poisoned;
use crate::inventory::{InventoryCache, NamespaceEnumerator, SharedContainer};

/// An [`InventoryCache`] backed by durable storage.
pub struct BackedInventory<B: StorageBackend + ?Sized> {
    cache: Arc<InventoryCache>,
    backend: Arc<B>,
    namespaces: Arc<dyn NamespaceEnumerator>,
    ready: Arc<AtomicBool>,
    /// Containers evicted by `unload` whose store has not finished yet.
    unloading: Arc<DashMap<(EntityId, NamespaceId), SharedContainer>>,
}

impl<B: StorageBackend + ?Sized> BackedInventory<B> {
    pub fn new(
        cache: Arc<InventoryCache>,
        backend: Arc<B>,
        namespaces: Arc<dyn NamespaceEnumerator>,
    ) -> Self {
        Self {
            cache,
            backend,
            namespaces,
            ready: Arc::new(AtomicBool::new(false)),
            unloading: Arc::new(DashMap::new()),
        }
    }

    pub fn cache(&self) -> &InventoryCache {
        &self.cache
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn mode(&self) -> StorageMode {
        self.backend.mode()
    }

    /// Run the backend's setup. Reads and writes call this on first use, so
    /// calling it up front only moves the cost.
    #[tracing::instrument(skip_all, fields(mode = %self.backend.mode()))]
    pub async fn setup(&self) -> BackpackResult<()> {
        self.backend.setup().await?;
        self.ready.store(true, Ordering::Release);
        debug!("storage backend ready");
        Ok(())
    }

    async fn ensure_ready(&self) -> BackpackResult<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        self.setup().await
    }

    /// Fetch the container for `(entity, namespace)`.
    ///
    /// A cached container is returned (and reconciled) without touching the
    /// backend. Otherwise the container is seeded from, in order: one that
    /// is still being stored by [`unload`](Self::unload), the backend record,
    /// or the factory. When two tasks miss concurrently both may load, but
    /// only the first seed is kept and both receive the same container.
    #[tracing::instrument(skip_all, fields(entity = %entity.id, namespace = %namespace))]
    pub async fn get(
        &self,
        entity: &EntityRef,
        namespace: NamespaceId,
    ) -> BackpackResult<SharedContainer> {
        if let Some(shared) = self.cache.get_cached(entity, namespace)? {
            return Ok(shared);
        }

        let seed = match self.unloading_snapshot(entity, namespace)? {
            Some(pending) => {
                debug!("container reseeded from pending unload");
                Some(pending)
            }
            None => {
                self.ensure_ready().await?;
                let stored = self.backend.load_container(entity, namespace).await?;
                if stored.is_some() {
                    debug!("container loaded from backend");
                }
                stored
            }
        };
        self.cache.get_or_seed(entity, namespace, seed)
    }

    /// [`get`](Self::get) for every enumerated namespace.
    #[tracing::instrument(skip_all, fields(entity = %entity.id))]
    pub async fn get_all(
        &self,
        entity: &EntityRef,
    ) -> BackpackResult<HashMap<NamespaceId, SharedContainer>> {
        entity.validate()?;
        let mut all = HashMap::new();
        for namespace in self.namespaces.namespaces() {
            let shared = self.get(entity, namespace).await?;
            all.insert(namespace, shared);
        }
        Ok(all)
    }

    /// Replace the cached container. Nothing reaches the backend until
    /// [`save`](Self::save).
    pub fn put(
        &self,
        entity: &EntityRef,
        namespace: NamespaceId,
        container: Container,
    ) -> BackpackResult<SharedContainer> {
        self.cache.put(entity, namespace, container)
    }

    /// Store a snapshot of the cached container. Returns `false` when nothing
    /// is cached for the pair.
    #[tracing::instrument(skip_all, fields(entity = %entity.id, namespace = %namespace))]
    pub async fn save(&self, entity: &EntityRef, namespace: NamespaceId) -> BackpackResult<bool> {
        entity.validate()?;
        namespace.validate()?;

        let Some(shared) = self.cache.peek(entity.id, namespace) else {
            return Ok(false);
        };
        self.store_snapshot(entity, namespace, &shared).await?;
        Ok(true)
    }

    /// Save every cached container owned by `entity`. Returns how many were
    /// stored.
    #[tracing::instrument(skip_all, fields(entity = %entity.id))]
    pub async fn save_all(&self, entity: &EntityRef) -> BackpackResult<usize> {
        entity.validate()?;
        let mut saved = 0;
        for namespace in self.cache.namespaces_for(entity.id) {
            if self.save(entity, namespace).await? {
                saved += 1;
            }
        }
        Ok(saved)
    }

    /// Evict and store every cached container owned by `entity`. Returns how
    /// many were unloaded.
    ///
    /// Each container leaves the cache before its snapshot is taken, so a
    /// write made through the cache during the store lands in a fresh
    /// container instead of being discarded. A failed store puts the
    /// container back in the cache and stops.
    #[tracing::instrument(skip_all, fields(entity = %entity.id))]
    pub async fn unload(&self, entity: &EntityRef) -> BackpackResult<usize> {
        entity.validate()?;
        let mut unloaded = 0;
        for namespace in self.cache.namespaces_for(entity.id) {
            if self.unload_one(entity, namespace).await? {
                unloaded += 1;
            }
        }
        debug!(unloaded, "entity unloaded");
        Ok(unloaded)
    }

    async fn unload_one(&self, entity: &EntityRef, namespace: NamespaceId) -> BackpackResult<bool> {
        let key = (entity.id, namespace);

        // Registered before the eviction so a concurrent miss never falls
        // through to the stale backend record.
        let Some(cached) = self.cache.peek(entity.id, namespace) else {
            return Ok(false);
        };
        self.unloading.insert(key, cached);
        let Some(shared) = self.cache.evict(entity.id, namespace) else {
            self.unloading.remove(&key);
            return Ok(false);
        };
        self.unloading.insert(key, Arc::clone(&shared));

        let stored = self.store_snapshot(entity, namespace, &shared).await;
        self.unloading
            .remove_if(&key, |_, pending| Arc::ptr_eq(pending, &shared));

        if let Err(e) = stored {
            warn!(error = %e, namespace = %namespace, "unload store failed, container restored");
            let snapshot = read_snapshot(&shared, entity, namespace)?;
            self.cache.get_or_seed(entity, namespace, Some(snapshot))?;
            return Err(e);
        }
        Ok(true)
    }

    fn unloading_snapshot(
        &self,
        entity: &EntityRef,
        namespace: NamespaceId,
    ) -> BackpackResult<Option<Container>> {
        let pending = self
            .unloading
            .get(&(entity.id, namespace))
            .map(|entry| Arc::clone(entry.value()));
        pending
            .map(|shared| read_snapshot(&shared, entity, namespace))
            .transpose()
    }

    async fn store_snapshot(
        &self,
        entity: &EntityRef,
        namespace: NamespaceId,
        shared: &SharedContainer,
    ) -> BackpackResult<()> {
        let snapshot = read_snapshot(shared, entity, namespace)?;
        self.ensure_ready().await?;
        self.backend
            .store_container(entity, namespace, &snapshot)
            .await
    }
}

/// Clone the container out from under its read lock.
fn read_snapshot(
    shared: &SharedContainer,
    entity: &EntityRef,
    namespace: NamespaceId,
) -> BackpackResult<Container> {
    let guard = shared.read().map_err(|_| poisoned(entity, namespace))?;
    Ok(guard.clone())
}

impl<B: StorageBackend + ?Sized> Clone for BackedInventory<B> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            backend: Arc::clone(&self.backend),
            namespaces: Arc::clone(&self.namespaces),
            ready: Arc::clone(&self.ready),
            unloading: Arc::clone(&self.unloading),
        }
    }
}

impl<B: StorageBackend + ?Sized> std::fmt::Debug for BackedInventory<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackedInventory")
            .field("mode", &self.backend.mode())
            .field("cache", &self.cache)
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{
        CapacityResolver, FixedCapacity, StaticNamespaces, TitledContainerFactory,
    };
    use async_trait::async_trait;
    use backpack_core::{BackpackError, Item, ValidationError};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Mutex, OnceLock, Weak};
    use tokio::sync::Notify;

    /// Mock backend for testing.
    #[derive(Default)]
    struct MockBackend {
        records: Mutex<HashMap<(EntityId, NamespaceId), Container>>,
        setups: AtomicUsize,
        loads: AtomicUsize,
        stores: AtomicUsize,
    }

    impl MockBackend {
        fn with_record(entity: EntityId, namespace: NamespaceId, container: Container) -> Self {
            let backend = Self::default();
            backend
                .records
                .lock()
                .unwrap()
                .insert((entity, namespace), container);
            backend
        }

        fn stored(&self, entity: EntityId, namespace: NamespaceId) -> Option<Container> {
            self.records.lock().unwrap().get(&(entity, namespace)).cloned()
        }
    }

    #[async_trait]
    impl StorageBackend for MockBackend {
        fn mode(&self) -> StorageMode {
            StorageMode::File
        }

        async fn setup(&self) -> BackpackResult<()> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn load_container(
            &self,
            entity: &EntityRef,
            namespace: NamespaceId,
        ) -> BackpackResult<Option<Container>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.stored(entity.id, namespace))
        }

        async fn store_container(
            &self,
            entity: &EntityRef,
            namespace: NamespaceId,
            container: &Container,
        ) -> BackpackResult<()> {
            self.stores.fetch_add(1, Ordering::SeqCst);
            self.records
                .lock()
                .unwrap()
                .insert((entity.id, namespace), container.clone());
            Ok(())
        }
    }

    /// Evicts one cached pair the next time capacity is resolved after being
    /// armed.
    struct EvictingCapacity {
        cache: OnceLock<Weak<InventoryCache>>,
        armed: AtomicBool,
        target: (EntityId, NamespaceId),
    }

    impl CapacityResolver for EvictingCapacity {
        fn capacity(&self, _entity: &EntityRef) -> usize {
            if self.armed.swap(false, Ordering::SeqCst) {
                if let Some(cache) = self.cache.get().and_then(Weak::upgrade) {
                    cache.evict(self.target.0, self.target.1);
                }
            }
            9
        }
    }

    /// Writes `slot` through the cache while a store is in flight.
    struct WritingDuringStore {
        inner: MockBackend,
        cache: OnceLock<Weak<InventoryCache>>,
        entity: EntityRef,
        slot: usize,
    }

    #[async_trait]
    impl StorageBackend for WritingDuringStore {
        fn mode(&self) -> StorageMode {
            StorageMode::File
        }

        async fn setup(&self) -> BackpackResult<()> {
            self.inner.setup().await
        }

        async fn load_container(
            &self,
            entity: &EntityRef,
            namespace: NamespaceId,
        ) -> BackpackResult<Option<Container>> {
            self.inner.load_container(entity, namespace).await
        }

        async fn store_container(
            &self,
            entity: &EntityRef,
            namespace: NamespaceId,
            container: &Container,
        ) -> BackpackResult<()> {
            self.inner.store_container(entity, namespace, container).await?;
            if let Some(cache) = self.cache.get().and_then(Weak::upgrade) {
                let shared = cache.get(&self.entity, namespace)?;
                let mut guard = shared.write().map_err(|_| poisoned(entity, namespace))?;
                assert!(guard.set_slot(self.slot, Some(Item::new("late arrival", 1))).is_ok());
            }
            Ok(())
        }
    }

    /// Parks every store until released.
    #[derive(Default)]
    struct GatedBackend {
        inner: MockBackend,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl StorageBackend for GatedBackend {
        fn mode(&self) -> StorageMode {
            StorageMode::File
        }

        async fn setup(&self) -> BackpackResult<()> {
            self.inner.setup().await
        }

        async fn load_container(
            &self,
            entity: &EntityRef,
            namespace: NamespaceId,
        ) -> BackpackResult<Option<Container>> {
            self.inner.load_container(entity, namespace).await
        }

        async fn store_container(
            &self,
            entity: &EntityRef,
            namespace: NamespaceId,
            container: &Container,
        ) -> BackpackResult<()> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.store_container(entity, namespace, container).await
        }
    }

    fn cache(capacity: usize) -> Arc<InventoryCache> {
        Arc::new(InventoryCache::new(
            Arc::new(FixedCapacity(capacity)),
            Arc::new(TitledContainerFactory::default()),
        ))
    }

    fn alice() -> EntityRef {
        EntityRef::new(EntityId::now_v7(), "Alice")
    }

    fn inventory(
        backend: MockBackend,
        capacity: usize,
        namespaces: Vec<NamespaceId>,
    ) -> BackedInventory<MockBackend> {
        BackedInventory::new(
            cache(capacity),
            Arc::new(backend),
            Arc::new(StaticNamespaces::new(namespaces)),
        )
    }

    #[tokio::test]
    async fn test_miss_loads_stored_container() {
        let alice = alice();
        let ns = NamespaceId::now_v7();
        let mut stored = Container::new(alice.id, "Backpack", 9);
        stored.set_slot(2, Some(Item::new("map", 1))).unwrap();

        let inv = inventory(MockBackend::with_record(alice.id, ns, stored.clone()), 9, vec![ns]);

        let shared = inv.get(&alice, ns).await.unwrap();
        assert_eq!(*shared.read().unwrap(), stored);
        assert_eq!(inv.backend().setups.load(Ordering::SeqCst), 1);

        // Second read is served by the cache.
        let again = inv.get(&alice, ns).await.unwrap();
        assert!(Arc::ptr_eq(&shared, &again));
        assert_eq!(inv.backend().loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loaded_container_is_resized_to_current_capacity() {
        let alice = alice();
        let ns = NamespaceId::now_v7();
        let stored = Container::new(alice.id, "Backpack", 9);

        let inv = inventory(MockBackend::with_record(alice.id, ns, stored), 18, vec![ns]);

        let shared = inv.get(&alice, ns).await.unwrap();
        assert_eq!(shared.read().unwrap().capacity(), 18);
    }

    #[tokio::test]
    async fn test_miss_without_record_uses_factory() {
        let alice = alice();
        let ns = NamespaceId::now_v7();
        let inv = inventory(MockBackend::default(), 9, vec![ns]);

        let shared = inv.get(&alice, ns).await.unwrap();
        let container = shared.read().unwrap();
        assert_eq!(container.capacity(), 9);
        assert_eq!(container.title, "Backpack");
        assert!(container.is_empty());
    }

    #[tokio::test]
    async fn test_save_persists_snapshot() {
        let alice = alice();
        let ns = NamespaceId::now_v7();
        let inv = inventory(MockBackend::default(), 9, vec![ns]);

        assert!(!inv.save(&alice, ns).await.unwrap());

        let shared = inv.get(&alice, ns).await.unwrap();
        shared
            .write()
            .unwrap()
            .set_slot(0, Some(Item::new("apple", 3)))
            .unwrap();

        assert!(inv.save(&alice, ns).await.unwrap());
        let stored = inv.backend().stored(alice.id, ns).unwrap();
        assert_eq!(stored.slot(0), Some(&Item::new("apple", 3)));
    }

    #[tokio::test]
    async fn test_put_is_not_persisted_until_save() {
        let alice = alice();
        let ns = NamespaceId::now_v7();
        let inv = inventory(MockBackend::default(), 9, vec![ns]);

        inv.put(&alice, ns, Container::new(alice.id, "Chest", 27)).unwrap();
        assert_eq!(inv.backend().stores.load(Ordering::SeqCst), 0);

        inv.save(&alice, ns).await.unwrap();
        assert_eq!(inv.backend().stored(alice.id, ns).unwrap().capacity(), 27);
    }

    #[tokio::test]
    async fn test_get_all_covers_every_namespace() {
        let alice = alice();
        let namespaces: Vec<_> = (0..3).map(|_| NamespaceId::now_v7()).collect();
        let inv = inventory(MockBackend::default(), 9, namespaces.clone());

        let all = inv.get_all(&alice).await.unwrap();
        assert_eq!(all.len(), 3);
        for ns in &namespaces {
            assert!(all.contains_key(ns));
        }
    }

    #[tokio::test]
    async fn test_unload_stores_then_evicts() {
        let alice = alice();
        let overworld = NamespaceId::now_v7();
        let nether = NamespaceId::now_v7();
        let inv = inventory(MockBackend::default(), 9, vec![overworld, nether]);

        inv.get_all(&alice).await.unwrap();
        assert_eq!(inv.save_all(&alice).await.unwrap(), 2);

        assert_eq!(inv.unload(&alice).await.unwrap(), 2);
        assert!(inv.cache().is_empty());
        assert!(inv.backend().stored(alice.id, overworld).is_some());
        assert!(inv.backend().stored(alice.id, nether).is_some());
        assert_eq!(inv.backend().stores.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_get_reloads_when_evicted_between_lookup_and_read() {
        let alice = alice();
        let ns = NamespaceId::now_v7();
        let mut stored = Container::new(alice.id, "Backpack", 9);
        stored.set_slot(0, Some(Item::new("compass", 1))).unwrap();

        let resolver = Arc::new(EvictingCapacity {
            cache: OnceLock::new(),
            armed: AtomicBool::new(false),
            target: (alice.id, ns),
        });
        let cache = Arc::new(InventoryCache::new(
            Arc::clone(&resolver) as Arc<dyn CapacityResolver>,
            Arc::new(TitledContainerFactory::default()),
        ));
        resolver.cache.set(Arc::downgrade(&cache)).unwrap();
        let inv = BackedInventory::new(
            cache,
            Arc::new(MockBackend::with_record(alice.id, ns, stored)),
            Arc::new(StaticNamespaces::new([ns])),
        );

        assert_eq!(inv.get(&alice, ns).await.unwrap().read().unwrap().occupied(), 1);

        resolver.armed.store(true, Ordering::SeqCst);
        let reread = inv.get(&alice, ns).await.unwrap();
        assert_eq!(reread.read().unwrap().slot(0), Some(&Item::new("compass", 1)));
        assert_eq!(inv.backend().loads.load(Ordering::SeqCst), 2);

        assert!(inv.save(&alice, ns).await.unwrap());
        let saved = inv.backend().stored(alice.id, ns).unwrap();
        assert_eq!(saved.slot(0), Some(&Item::new("compass", 1)));
    }

    #[tokio::test]
    async fn test_unload_keeps_writes_made_during_store() {
        let alice = alice();
        let ns = NamespaceId::now_v7();
        let cache = cache(9);
        let backend = Arc::new(WritingDuringStore {
            inner: MockBackend::default(),
            cache: OnceLock::new(),
            entity: alice.clone(),
            slot: 5,
        });
        backend.cache.set(Arc::downgrade(&cache)).unwrap();
        let inv = BackedInventory::new(
            Arc::clone(&cache),
            Arc::clone(&backend),
            Arc::new(StaticNamespaces::new([ns])),
        );

        inv.get(&alice, ns)
            .await
            .unwrap()
            .write()
            .unwrap()
            .set_slot(0, Some(Item::new("torch", 4)))
            .unwrap();

        assert_eq!(inv.unload(&alice).await.unwrap(), 1);

        let stored = backend.inner.stored(alice.id, ns).unwrap();
        assert_eq!(stored.slot(0), Some(&Item::new("torch", 4)));
        assert_eq!(stored.slot(5), None);

        // The write that raced the store is still cached for the next save.
        let survivor = cache.peek(alice.id, ns).unwrap();
        assert_eq!(
            survivor.read().unwrap().slot(5),
            Some(&Item::new("late arrival", 1))
        );
    }

    #[tokio::test]
    async fn test_get_during_unload_sees_unsaved_contents() {
        let alice = alice();
        let ns = NamespaceId::now_v7();
        let backend = Arc::new(GatedBackend::default());
        backend
            .inner
            .records
            .lock()
            .unwrap()
            .insert((alice.id, ns), Container::new(alice.id, "Backpack", 9));
        let inv = BackedInventory::new(
            cache(9),
            Arc::clone(&backend),
            Arc::new(StaticNamespaces::new([ns])),
        );

        inv.get(&alice, ns)
            .await
            .unwrap()
            .write()
            .unwrap()
            .set_slot(3, Some(Item::new("emerald", 2)))
            .unwrap();

        let unloader = {
            let inv = inv.clone();
            let alice = alice.clone();
            tokio::spawn(async move { inv.unload(&alice).await })
        };
        backend.entered.notified().await;

        let during = inv.get(&alice, ns).await.unwrap();
        assert_eq!(during.read().unwrap().slot(3), Some(&Item::new("emerald", 2)));
        assert_eq!(backend.inner.loads.load(Ordering::SeqCst), 1);

        backend.release.notify_one();
        assert_eq!(unloader.await.unwrap().unwrap(), 1);
        let stored = backend.inner.stored(alice.id, ns).unwrap();
        assert_eq!(stored.slot(3), Some(&Item::new("emerald", 2)));
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected_before_backend() {
        let inv = inventory(MockBackend::default(), 9, vec![]);
        let nil = EntityRef::new(EntityId::nil(), "Nobody");

        let err = inv.get(&nil, NamespaceId::now_v7()).await.unwrap_err();
        assert!(matches!(
            err,
            BackpackError::Validation(ValidationError::RequiredFieldMissing { .. })
        ));
        assert!(inv.get(&alice(), NamespaceId::nil()).await.is_err());
        assert_eq!(inv.backend().loads.load(Ordering::SeqCst), 0);
        assert!(inv.cache().is_empty());
    }

    #[tokio::test]
    async fn test_works_through_trait_object() {
        let alice = alice();
        let ns = NamespaceId::now_v7();
        let backend: Arc<dyn StorageBackend> = Arc::new(MockBackend::default());
        let inv = BackedInventory::new(cache(9), backend, Arc::new(StaticNamespaces::new([ns])));

        inv.get(&alice, ns).await.unwrap();
        assert!(inv.save(&alice, ns).await.unwrap());
        assert_eq!(inv.mode(), StorageMode::File);
    }
}
