//! Collaborator traits consumed by the inventory cache.
//!
//! The cache does not decide how big a container should be, which namespaces
//! exist, or what a fresh container looks like. Hosts supply those three
//! answers through the traits below. Plain closures implement each trait, so
//! simple hosts never need a named type.

use backpack_core::{BackpackConfig, Container, EntityRef, NamespaceId};

/// Maps an entity to the number of slots it is currently allowed.
///
/// # Implementation Requirements
///
/// - Must be side-effect free and fast; it runs on every `get`
/// - Must be `Send + Sync`, callers hit the cache from many threads
pub trait CapacityResolver: Send + Sync {
    fn capacity(&self, entity: &EntityRef) -> usize;
}

impl<F> CapacityResolver for F
where
    F: Fn(&EntityRef) -> usize + Send + Sync,
{
    fn capacity(&self, entity: &EntityRef) -> usize {
        self(entity)
    }
}

/// Lists every namespace an aggregate read should cover.
pub trait NamespaceEnumerator: Send + Sync {
    fn namespaces(&self) -> Vec<NamespaceId>;
}

impl<F> NamespaceEnumerator for F
where
    F: Fn() -> Vec<NamespaceId> + Send + Sync,
{
    fn namespaces(&self) -> Vec<NamespaceId> {
        self()
    }
}

/// Builds the container handed out on a cache miss.
///
/// The factory is invoked while the entry for `(namespace, entity)` is
/// reserved, so it must not call back into the cache.
pub trait ContainerFactory: Send + Sync {
    fn create(&self, entity: &EntityRef, capacity: usize) -> Container;
}

impl<F> ContainerFactory for F
where
    F: Fn(&EntityRef, usize) -> Container + Send + Sync,
{
    fn create(&self, entity: &EntityRef, capacity: usize) -> Container {
        self(entity, capacity)
    }
}

// ============================================================================
// STOCK IMPLEMENTATIONS
// ============================================================================

/// Every entity gets the same capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedCapacity(pub usize);

impl FixedCapacity {
    /// `config.default_capacity`, clamped to `config.max_capacity`.
    pub fn from_config(config: &BackpackConfig) -> Self {
        Self(config.clamp_capacity(config.default_capacity))
    }
}

impl CapacityResolver for FixedCapacity {
    fn capacity(&self, _entity: &EntityRef) -> usize {
        self.0
    }
}

/// A namespace list fixed at construction time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticNamespaces(Vec<NamespaceId>);

impl StaticNamespaces {
    pub fn new(namespaces: impl IntoIterator<Item = NamespaceId>) -> Self {
        Self(namespaces.into_iter().collect())
    }
}

impl NamespaceEnumerator for StaticNamespaces {
    fn namespaces(&self) -> Vec<NamespaceId> {
        self.0.clone()
    }
}

/// Creates empty containers carrying a fixed title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitledContainerFactory {
    title: String,
}

impl TitledContainerFactory {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

impl Default for TitledContainerFactory {
    fn default() -> Self {
        Self::new("Backpack")
    }
}

impl ContainerFactory for TitledContainerFactory {
    fn create(&self, entity: &EntityRef, capacity: usize) -> Container {
        Container::new(entity.id, self.title.clone(), capacity)
    }
}
