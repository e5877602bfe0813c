//! Shared fragment value store.
//!
//! A shared fragment is a value owned by a *group* of entities rather than
//! duplicated per row. Values live here, keyed by [`SharedKey`]; each entity's
//! membership in a group is an assignment recorded against its handle.
//!
//! Shared value identity is deliberately **not** part of the archetype
//! signature: presence of the shared fragment *type* is a signature bit, but
//! entities with different shared values share one archetype, with the key as
//! a secondary grouping criterion. This bounds archetype count.
//!
//! Slots are reference-counted by their assignments and freed when the count
//! reaches zero. A shared value never changes in place; [`SharedStore::replace_value`]
//! commits a whole replacement, so partial mutation is never observable.

use std::any::Any;

use fxhash::FxHashMap;

use crate::engine::types::{Entity, FragmentId};

/// Identifies one shared value group within a shared fragment type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SharedKey {
    /// Shared fragment type this key belongs to.
    pub fragment: FragmentId,
    /// Slot within the fragment's value pool.
    pub slot: u32,
}

struct SharedSlot {
    value: Box<dyn Any + Send + Sync>,
    refs: u32,
}

#[derive(Default)]
struct SharedPool {
    slots: Vec<Option<SharedSlot>>,
    free: Vec<u32>,
}

impl SharedPool {
    fn insert(&mut self, value: Box<dyn Any + Send + Sync>) -> u32 {
        let slot = SharedSlot { value, refs: 0 };
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(slot);
            index
        } else {
            self.slots.push(Some(slot));
            (self.slots.len() - 1) as u32
        }
    }
}

/// Reference-counted storage for shared fragment values.
#[derive(Default)]
pub struct SharedStore {
    pools: FxHashMap<FragmentId, SharedPool>,
    assignments: FxHashMap<(FragmentId, Entity), SharedKey>,
}

impl SharedStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a new shared value and returns its key.
    ///
    /// The slot starts unreferenced; it is freed once assigned entities all
    /// release it, or immediately if never assigned.
    pub fn insert_value_erased(
        &mut self,
        fragment: FragmentId,
        value: Box<dyn Any + Send + Sync>,
    ) -> SharedKey {
        let pool = self.pools.entry(fragment).or_default();
        let slot = pool.insert(value);
        SharedKey { fragment, slot }
    }

    /// Interns a new shared value of type `T` and returns its key.
    pub fn insert_value<T: Send + Sync + 'static>(
        &mut self,
        fragment: FragmentId,
        value: T,
    ) -> SharedKey {
        self.insert_value_erased(fragment, Box::new(value))
    }

    /// Assigns `entity` to the group identified by `key`, releasing any prior
    /// assignment for the same fragment type.
    pub fn assign(&mut self, entity: Entity, key: SharedKey) {
        match self.assignments.insert((key.fragment, entity), key) {
            Some(previous) if previous == key => return,
            Some(previous) => self.release_key(previous),
            None => {}
        }
        if let Some(slot) = self
            .pools
            .get_mut(&key.fragment)
            .and_then(|p| p.slots.get_mut(key.slot as usize))
            .and_then(|s| s.as_mut())
        {
            slot.refs += 1;
        }
    }

    /// Returns the group key assigned to `entity` for `fragment`, if any.
    pub fn key_of(&self, fragment: FragmentId, entity: Entity) -> Option<SharedKey> {
        self.assignments.get(&(fragment, entity)).copied()
    }

    /// Returns the shared value behind `key`, if the slot is live and the
    /// type matches.
    pub fn value<T: Send + Sync + 'static>(&self, key: SharedKey) -> Option<&T> {
        self.pools
            .get(&key.fragment)?
            .slots
            .get(key.slot as usize)?
            .as_ref()?
            .value
            .downcast_ref::<T>()
    }

    /// Commits a wholesale replacement of the value behind `key`.
    ///
    /// Returns `false` if the slot is dead or stores a different type. The
    /// old value is dropped atomically with respect to readers: there is no
    /// intermediate state.
    pub fn replace_value<T: Send + Sync + 'static>(&mut self, key: SharedKey, value: T) -> bool {
        let Some(slot) = self
            .pools
            .get_mut(&key.fragment)
            .and_then(|p| p.slots.get_mut(key.slot as usize))
            .and_then(|s| s.as_mut())
        else {
            return false;
        };
        if !slot.value.is::<T>() {
            return false;
        }
        slot.value = Box::new(value);
        true
    }

    /// Releases `entity`'s assignment for `fragment`, freeing the slot when
    /// its reference count reaches zero.
    pub fn release(&mut self, fragment: FragmentId, entity: Entity) {
        if let Some(key) = self.assignments.remove(&(fragment, entity)) {
            self.release_key(key);
        }
    }

    /// Returns the number of live entities assigned to `key`.
    pub fn ref_count(&self, key: SharedKey) -> u32 {
        self.pools
            .get(&key.fragment)
            .and_then(|p| p.slots.get(key.slot as usize))
            .and_then(|s| s.as_ref())
            .map(|s| s.refs)
            .unwrap_or(0)
    }

    /// Returns `true` if the slot behind `key` still holds a value.
    pub fn is_live(&self, key: SharedKey) -> bool {
        self.pools
            .get(&key.fragment)
            .and_then(|p| p.slots.get(key.slot as usize))
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    fn release_key(&mut self, key: SharedKey) {
        let Some(pool) = self.pools.get_mut(&key.fragment) else { return };
        let Some(entry) = pool.slots.get_mut(key.slot as usize) else { return };
        if let Some(slot) = entry.as_mut() {
            slot.refs = slot.refs.saturating_sub(1);
            if slot.refs == 0 {
                *entry = None;
                pool.free.push(key.slot);
            }
        }
    }
}
