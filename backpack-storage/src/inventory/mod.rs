//! In-memory inventory cache.
//!
//! Holds one container per (namespace, entity) pair. Containers are created
//! lazily on first access and migrated in place whenever the capacity policy
//! for their owner changes.
//!
//! # Reconciliation
//!
//! Every `get` on a cached container asks the [`CapacityResolver`] for the
//! owner's current capacity. When it differs, the container is resized under
//! its write lock: slots below the new capacity keep their content, new slots
//! are empty, and slots past a shrunken capacity are discarded.
//!
//! # Example
//!
//! ```ignore
//! let cache = Arc::new(InventoryCache::new(resolver, factory));
//! let aggregator = Aggregator::new(Arc::clone(&cache), worlds);
//!
//! let overworld_pack = cache.get(&alice, overworld)?;
//! let every_pack = aggregator.get_all(&alice)?;
//! ```

pub mod aggregator;
pub mod cache;
pub mod stats;
pub mod traits;

pub use aggregator::Aggregator;
pub use cache::{InventoryCache, SharedContainer};
pub use stats::CacheStats;
pub use traits::{
    CapacityResolver, ContainerFactory, FixedCapacity, NamespaceEnumerator, StaticNamespaces,
    TitledContainerFactory,
};
