//! Core container structures

use crate::EntityId;
use serde::{Deserialize, Serialize};

/// Opaque payload held in a slot. The cache copies it by value and never
/// looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub material: String,
    pub amount: u32,
    pub metadata: Option<serde_json::Value>,
}

impl Item {
    pub fn new(material: impl Into<String>, amount: u32) -> Self {
        Self {
            material: material.into(),
            amount,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// One position in a container. `None` is the empty sentinel.
pub type Slot = Option<Item>;

/// Ordered, fixed-capacity sequence of slots owned by one entity.
///
/// Capacity is the length of `slots` and may change over the container's
/// lifetime through [`Container::resize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub owner: EntityId,
    pub title: String,
    slots: Vec<Slot>,
}

impl Container {
    /// Create a container with `capacity` empty slots.
    pub fn new(owner: EntityId, title: impl Into<String>, capacity: usize) -> Self {
        Self {
            owner,
            title: title.into(),
            slots: empty_slots(capacity),
        }
    }

    /// Create a container from existing contents. Capacity is `slots.len()`.
    pub fn with_slots(owner: EntityId, title: impl Into<String>, slots: Vec<Slot>) -> Self {
        Self {
            owner,
            title: title.into(),
            slots,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&Item> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Place `item` at `index`, returning the previous occupant.
    ///
    /// Returns `Err(item)` when `index` is out of bounds.
    pub fn set_slot(&mut self, index: usize, item: Slot) -> Result<Slot, Slot> {
        match self.slots.get_mut(index) {
            Some(slot) => Ok(std::mem::replace(slot, item)),
            None => Err(item),
        }
    }

    /// Replace the whole content sequence. Capacity becomes `slots.len()`.
    pub fn set_contents(&mut self, slots: Vec<Slot>) {
        self.slots = slots;
    }

    /// Migrate to `new_capacity`, keeping the prefix that still fits.
    ///
    /// Slot `i` survives for every `i < min(old, new)`; growth pads with
    /// empty slots and shrinking discards the tail. Returns how many occupied
    /// slots were discarded.
    pub fn resize(&mut self, new_capacity: usize) -> usize {
        if new_capacity == self.slots.len() {
            return 0;
        }
        let dropped = self
            .slots
            .iter()
            .skip(new_capacity)
            .filter(|slot| slot.is_some())
            .count();
        self.slots.resize(new_capacity, None);
        dropped
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }
}

/// A content sequence of `capacity` empty slots.
pub fn empty_slots(capacity: usize) -> Vec<Slot> {
    vec![None; capacity]
}
