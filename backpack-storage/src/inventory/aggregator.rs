//! Cross-namespace reads for a single entity.

use std::collections::HashMap;
use std::sync::Arc;

use backpack_core::{BackpackResult, EntityRef, NamespaceId};

use super::cache::{InventoryCache, SharedContainer};
use super::traits::NamespaceEnumerator;

/// Collects one entity's containers across every known namespace.
#[derive(Clone)]
pub struct Aggregator {
    cache: Arc<InventoryCache>,
    namespaces: Arc<dyn NamespaceEnumerator>,
}

impl Aggregator {
    pub fn new(cache: Arc<InventoryCache>, namespaces: Arc<dyn NamespaceEnumerator>) -> Self {
        Self { cache, namespaces }
    }

    pub fn cache(&self) -> &InventoryCache {
        &self.cache
    }

    /// The namespaces an aggregate read would cover right now.
    pub fn namespaces(&self) -> Vec<NamespaceId> {
        self.namespaces.namespaces()
    }

    /// One container per enumerated namespace, all owned by `entity`.
    ///
    /// Each namespace goes through [`InventoryCache::get`], so missing
    /// containers are created and drifted ones resized on the way. The first
    /// failing namespace aborts the whole read.
    pub fn get_all(
        &self,
        entity: &EntityRef,
    ) -> BackpackResult<HashMap<NamespaceId, SharedContainer>> {
        entity.validate()?;
        self.namespaces
            .namespaces()
            .into_iter()
            .map(|namespace| -> BackpackResult<_> {
                Ok((namespace, self.cache.get(entity, namespace)?))
            })
            .collect()
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::traits::{FixedCapacity, StaticNamespaces, TitledContainerFactory};
    use backpack_core::{EntityId, Item};
    use std::sync::RwLock;

    fn setup(namespaces: Vec<NamespaceId>) -> Aggregator {
        let cache = Arc::new(InventoryCache::new(
            Arc::new(FixedCapacity(9)),
            Arc::new(TitledContainerFactory::default()),
        ));
        Aggregator::new(cache, Arc::new(StaticNamespaces::new(namespaces)))
    }

    #[test]
    fn test_one_entry_per_namespace() {
        let worlds: Vec<NamespaceId> = (0..3).map(|_| NamespaceId::now_v7()).collect();
        let aggregator = setup(worlds.clone());
        let alice = EntityRef::new(EntityId::now_v7(), "Alice");

        let all = aggregator.get_all(&alice).unwrap();
        assert_eq!(all.len(), 3);
        for world in &worlds {
            let container = all[world].read().unwrap();
            assert_eq!(container.owner, alice.id);
        }
        assert_eq!(aggregator.cache().len(), 3);
    }

    #[test]
    fn test_returns_existing_handles() {
        let world = NamespaceId::now_v7();
        let aggregator = setup(vec![world]);
        let alice = EntityRef::new(EntityId::now_v7(), "Alice");

        let cached = aggregator.cache().get(&alice, world).unwrap();
        cached
            .write()
            .unwrap()
            .set_slot(0, Some(Item::new("bread", 5)))
            .unwrap();

        let all = aggregator.get_all(&alice).unwrap();
        assert!(Arc::ptr_eq(&all[&world], &cached));
    }

    #[test]
    fn test_other_entities_never_included() {
        let world = NamespaceId::now_v7();
        let aggregator = setup(vec![world]);
        let alice = EntityRef::new(EntityId::now_v7(), "Alice");
        let bob = EntityRef::new(EntityId::now_v7(), "Bob");

        let bobs: Arc<RwLock<_>> = aggregator.cache().get(&bob, world).unwrap();
        let all = aggregator.get_all(&alice).unwrap();
        assert_eq!(all.len(), 1);
        assert!(!Arc::ptr_eq(&all[&world], &bobs));
        assert_eq!(all[&world].read().unwrap().owner, alice.id);
    }

    #[test]
    fn test_enumeration_is_read_per_call() {
        let worlds = Arc::new(RwLock::new(vec![NamespaceId::now_v7()]));
        let source = Arc::clone(&worlds);
        let cache = Arc::new(InventoryCache::new(
            Arc::new(FixedCapacity(9)),
            Arc::new(TitledContainerFactory::default()),
        ));
        let aggregator = Aggregator::new(cache, Arc::new(move || source.read().unwrap().clone()));
        let alice = EntityRef::new(EntityId::now_v7(), "Alice");

        assert_eq!(aggregator.get_all(&alice).unwrap().len(), 1);
        worlds.write().unwrap().push(NamespaceId::now_v7());
        assert_eq!(aggregator.get_all(&alice).unwrap().len(), 2);
    }

    #[test]
    fn test_no_namespaces_yields_empty_map() {
        let aggregator = setup(vec![]);
        let alice = EntityRef::new(EntityId::now_v7(), "Alice");
        assert!(aggregator.get_all(&alice).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_entity_rejected() {
        let aggregator = setup(vec![NamespaceId::now_v7()]);
        let ghost = EntityRef::new(EntityId::nil(), "Ghost");
        assert!(aggregator.get_all(&ghost).unwrap_err().is_invalid_argument());
        assert!(aggregator.cache().is_empty());
    }
}
