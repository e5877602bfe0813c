//! Entity index: handle allocation, generation tracking, and locations.
//!
//! The index is the single indirection between entity handles and storage.
//! Every non-destroyed handle resolves to a live `(archetype, chunk, row)`
//! location; chunk compaction updates locations, never handles.

use crate::engine::error::SpawnError;
use crate::engine::types::{
    make_entity, Entity, EntityLocation, GenerationId, IndexId, INDEX_CAP,
};

const GROWTH_BLOCK: u32 = 1024;

/// Indirection table mapping entity handles to storage locations.
///
/// Slot indices are reused after destruction; the generation of a slot
/// increments on despawn so stale handles are detectable.
#[derive(Default)]
pub struct EntityIndex {
    generations: Vec<GenerationId>,
    alive: Vec<bool>,
    locations: Vec<EntityLocation>,
    free: Vec<IndexId>,
}

impl EntityIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live entities.
    pub fn live_count(&self) -> usize {
        self.alive.iter().filter(|a| **a).count()
    }

    /// Grows the slot table so at least `additional` more entities can spawn
    /// without reallocation.
    pub fn ensure_capacity(&mut self, additional: u32) -> Result<(), SpawnError> {
        if additional == 0 {
            return Ok(());
        }

        let current = self.generations.len() as u64;
        let needed = current + additional as u64;
        let capacity = INDEX_CAP as u64 + 1;
        if needed > capacity {
            return Err(SpawnError::Capacity { needed, capacity });
        }

        self.generations.resize(needed as usize, 0);
        self.alive.resize(needed as usize, false);
        self.locations.resize(needed as usize, EntityLocation::default());
        for index in current..needed {
            self.free.push(index as IndexId);
        }
        Ok(())
    }

    /// Allocates a fresh or reused handle and records its location.
    pub fn spawn(&mut self, location: EntityLocation) -> Result<Entity, SpawnError> {
        let index = if let Some(index) = self.free.pop() {
            index
        } else {
            self.ensure_capacity(GROWTH_BLOCK)?;
            self.free.pop().expect("capacity growth must yield a slot")
        };

        let generation = self.generations[index as usize];
        self.alive[index as usize] = true;
        self.locations[index as usize] = location;
        Ok(make_entity(index, generation))
    }

    /// Releases a handle; the freed index's generation is incremented.
    ///
    /// Returns `false` for stale or already-destroyed handles.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        let index = entity.index() as usize;
        match self.generations.get_mut(index) {
            Some(live) if *live == entity.generation()
                && self.alive.get(index).copied().unwrap_or(false) =>
            {
                *live = live.wrapping_add(1);
                self.alive[index] = false;
                self.locations[index] = EntityLocation::default();
                self.free.push(entity.index());
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if the handle refers to a live entity.
    pub fn is_alive(&self, entity: Entity) -> bool {
        let index = entity.index() as usize;
        index < self.generations.len()
            && self.alive.get(index).copied().unwrap_or(false)
            && self.generations[index] == entity.generation()
    }

    /// Returns the storage location of a live entity.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        if self.is_alive(entity) {
            Some(self.locations[entity.index() as usize])
        } else {
            None
        }
    }

    /// Updates the storage location of a live entity.
    pub fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        let index = entity.index() as usize;
        debug_assert!(
            self.is_alive(entity),
            "set_location on a dead or stale entity: {:?} -> {:?}",
            entity,
            location
        );
        if index < self.locations.len() {
            self.locations[index] = location;
        }
    }
}
