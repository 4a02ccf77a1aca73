//! BACKPACK Test Utilities
//!
//! Centralized test infrastructure for the BACKPACK workspace:
//! - Mock capacity policies, factories and backends
//! - Proptest generators for items, containers and identities
//! - Test fixtures for common scenarios
//! - Custom assertions for BACKPACK-specific validation

// Re-export core types for convenience
pub use backpack_core::{
    BackpackConfig, BackpackError, BackpackResult, ConfigError, Container, EntityId, EntityRef,
    Item, NamespaceId, Slot, StorageError, StorageMode, ValidationError,
};
pub use backpack_storage::{
    CapacityResolver, ContainerFactory, InventoryCache, NamespaceEnumerator, StorageBackend,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ============================================================================
// MOCKS
// ============================================================================

/// Capacity policy whose answer can be changed while the cache is live.
#[derive(Debug)]
pub struct DialCapacity {
    capacity: AtomicUsize,
}

impl DialCapacity {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: AtomicUsize::new(capacity),
        }
    }

    /// Change the capacity every entity resolves to from now on.
    pub fn set(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }
}

impl CapacityResolver for DialCapacity {
    fn capacity(&self, _entity: &EntityRef) -> usize {
        self.get()
    }
}

/// Container factory that counts its invocations.
#[derive(Debug, Default)]
pub struct CountingFactory {
    calls: AtomicUsize,
}

impl CountingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ContainerFactory for CountingFactory {
    fn create(&self, entity: &EntityRef, capacity: usize) -> Container {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Container::new(entity.id, format!("{}'s Backpack", entity.display_name), capacity)
    }
}

/// In-memory durable backend that records every call.
#[derive(Debug)]
pub struct RecordingBackend {
    mode: StorageMode,
    records: Mutex<HashMap<(EntityId, NamespaceId), Container>>,
    setups: AtomicUsize,
    loads: AtomicUsize,
    stores: AtomicUsize,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new(StorageMode::File)
    }
}

impl RecordingBackend {
    pub fn new(mode: StorageMode) -> Self {
        Self {
            mode,
            records: Mutex::new(HashMap::new()),
            setups: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            stores: AtomicUsize::new(0),
        }
    }

    /// Pre-populate a record without counting it as a store.
    pub fn insert(&self, entity: EntityId, namespace: NamespaceId, container: Container) {
        self.lock().insert((entity, namespace), container);
    }

    pub fn stored(&self, entity: EntityId, namespace: NamespaceId) -> Option<Container> {
        self.lock().get(&(entity, namespace)).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.lock().len()
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(EntityId, NamespaceId), Container>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    fn mode(&self) -> StorageMode {
        self.mode
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
        self.lock().insert((entity.id, namespace), container.clone());
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating BACKPACK types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random non-nil UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>()
            .prop_filter("nil uuid", |bytes| bytes.iter().any(|b| *b != 0))
            .prop_map(Uuid::from_bytes)
    }

    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        arb_uuid().prop_map(EntityId::new)
    }

    pub fn arb_namespace_id() -> impl Strategy<Value = NamespaceId> {
        arb_uuid().prop_map(NamespaceId::new)
    }

    /// Generate a valid EntityRef.
    pub fn arb_entity_ref() -> impl Strategy<Value = EntityRef> {
        (arb_entity_id(), "[A-Za-z][A-Za-z0-9_]{0,15}")
            .prop_map(|(id, name)| EntityRef::new(id, name))
    }

    /// Generate an Item, sometimes carrying metadata.
    pub fn arb_item() -> impl Strategy<Value = Item> {
        (
            "[a-z_]{1,16}",
            1u32..=64,
            proptest::option::of("[a-z ]{0,12}"),
        )
            .prop_map(|(material, amount, lore)| {
                let item = Item::new(material, amount);
                match lore {
                    Some(lore) => item.with_metadata(serde_json::json!({ "lore": lore })),
                    None => item,
                }
            })
    }

    /// Generate a slot that is empty about half the time.
    pub fn arb_slot() -> impl Strategy<Value = Slot> {
        proptest::option::of(arb_item())
    }

    /// Generate a container of up to `max_capacity` slots owned by `owner`.
    pub fn arb_container_for(
        owner: EntityId,
        max_capacity: usize,
    ) -> impl Strategy<Value = Container> {
        prop::collection::vec(arb_slot(), 0..=max_capacity)
            .prop_map(move |slots| Container::with_slots(owner, "Backpack", slots))
    }

    /// Generate a capacity in the range hosts typically configure.
    pub fn arb_capacity() -> impl Strategy<Value = usize> {
        prop_oneof![Just(0usize), 1usize..=54]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// An entity with a fresh id.
    pub fn entity(name: &str) -> EntityRef {
        EntityRef::new(EntityId::now_v7(), name)
    }

    pub fn alice() -> EntityRef {
        entity("Alice")
    }

    pub fn bob() -> EntityRef {
        entity("Bob")
    }

    /// `count` distinct namespaces.
    pub fn namespaces(count: usize) -> Vec<NamespaceId> {
        (0..count).map(|_| NamespaceId::now_v7()).collect()
    }

    /// A container with items in its first and last slots.
    pub fn stocked_container(owner: EntityId, capacity: usize) -> Container {
        let mut container = Container::new(owner, "Backpack", capacity);
        if capacity > 0 {
            let _ = container.set_slot(0, Some(Item::new("torch", 16)));
            let _ = container.set_slot(capacity - 1, Some(Item::new("compass", 1)));
        }
        container
    }

    /// A cache driven by a [`DialCapacity`] and a [`CountingFactory`], with
    /// handles to both.
    pub fn dial_cache(
        capacity: usize,
    ) -> (Arc<InventoryCache>, Arc<DialCapacity>, Arc<CountingFactory>) {
        let dial = Arc::new(DialCapacity::new(capacity));
        let factory = Arc::new(CountingFactory::new());
        let cache = Arc::new(InventoryCache::new(
            Arc::clone(&dial) as Arc<dyn CapacityResolver>,
            Arc::clone(&factory) as Arc<dyn ContainerFactory>,
        ));
        (cache, dial, factory)
    }

    /// A file-mode config rooted at `dir`.
    pub fn file_config(dir: &std::path::Path) -> BackpackConfig {
        BackpackConfig {
            storage_mode: StorageMode::File,
            data_dir: dir.to_path_buf(),
            map_size_mb: 8,
            ..BackpackConfig::default()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for BACKPACK-specific validation.

    use super::*;

    /// Assert that a BackpackResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &BackpackResult<T>) {
        match result {
            Err(BackpackError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a BackpackResult is a RequiredFieldMissing error for `field`.
    #[track_caller]
    pub fn assert_missing_field<T: std::fmt::Debug>(result: &BackpackResult<T>, field: &str) {
        match result {
            Err(BackpackError::Validation(ValidationError::RequiredFieldMissing { field: f })) => {
                assert_eq!(f, field, "Wrong field in RequiredFieldMissing error");
            }
            other => panic!("Expected RequiredFieldMissing({}), got: {:?}", field, other),
        }
    }

    /// Assert that a BackpackResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &BackpackResult<T>) {
        match result {
            Err(BackpackError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a BackpackResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &BackpackResult<T>) {
        match result {
            Err(BackpackError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that the first `len` slots of two containers match.
    #[track_caller]
    pub fn assert_prefix_preserved(before: &Container, after: &Container, len: usize) {
        assert!(
            before.capacity() >= len && after.capacity() >= len,
            "prefix of {} exceeds a capacity ({} / {})",
            len,
            before.capacity(),
            after.capacity()
        );
        assert_eq!(
            &before.slots()[..len],
            &after.slots()[..len],
            "slots below {} changed",
            len
        );
    }

    /// Assert that every slot at or past `from` is empty.
    #[track_caller]
    pub fn assert_empty_from(container: &Container, from: usize) {
        for (index, slot) in container.slots().iter().enumerate().skip(from) {
            assert!(slot.is_none(), "slot {} should be empty, got {:?}", index, slot);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
