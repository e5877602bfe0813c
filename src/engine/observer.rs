//! Observer registry for fragment add/remove notifications.
//!
//! Subscriptions are keyed by `(fragment-or-tag type, operation)`. Callbacks
//! fire synchronously after a command-buffer replay pass applies the
//! corresponding change, batched once per unique key with every entity
//! affected in that pass — not once per entity, not once per op.

use fxhash::FxHashMap;

use crate::engine::types::{Entity, FragmentId};

/// Structural operation an observer subscribes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FragmentOp {
    /// A fragment or tag was added to an entity.
    Added,
    /// A fragment or tag was removed from an entity.
    Removed,
}

/// Handle identifying one subscription, for unsubscribing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObserverId(u32);

type ObserverFn = Box<dyn Fn(&[Entity]) + Send + Sync>;

/// Callback table keyed by `(fragment, operation)`.
#[derive(Default)]
pub struct ObserverRegistry {
    subscriptions: FxHashMap<(FragmentId, FragmentOp), Vec<(ObserverId, ObserverFn)>>,
    next_id: u32,
}

impl ObserverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for the given fragment and operation.
    pub fn subscribe(
        &mut self,
        fragment: FragmentId,
        op: FragmentOp,
        callback: impl Fn(&[Entity]) + Send + Sync + 'static,
    ) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.subscriptions
            .entry((fragment, op))
            .or_default()
            .push((id, Box::new(callback)));
        id
    }

    /// Removes a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&mut self, id: ObserverId) {
        for callbacks in self.subscriptions.values_mut() {
            callbacks.retain(|(observer, _)| *observer != id);
        }
    }

    /// Fires all callbacks registered for `(fragment, op)` with the batch of
    /// affected entities.
    pub fn fire(&self, fragment: FragmentId, op: FragmentOp, entities: &[Entity]) {
        if entities.is_empty() {
            return;
        }
        if let Some(callbacks) = self.subscriptions.get(&(fragment, op)) {
            for (_, callback) in callbacks {
                callback(entities);
            }
        }
    }
}

/// Accumulates affected entities per `(fragment, op)` over one replay pass.
///
/// Drained at the end of the pass into batched [`ObserverRegistry::fire`]
/// calls, in ascending key order for determinism.
#[derive(Default)]
pub struct ObserverBatch {
    events: FxHashMap<(FragmentId, FragmentOp), Vec<Entity>>,
}

impl ObserverBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `entity` was affected by `(fragment, op)`.
    pub fn record(&mut self, fragment: FragmentId, op: FragmentOp, entity: Entity) {
        self.events.entry((fragment, op)).or_default().push(entity);
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Dispatches every recorded batch and clears the accumulator.
    pub fn dispatch(&mut self, registry: &ObserverRegistry) {
        let mut keys: Vec<(FragmentId, FragmentOp)> = self.events.keys().copied().collect();
        keys.sort();
        for key in keys {
            if let Some(entities) = self.events.remove(&key) {
                registry.fire(key.0, key.1, &entities);
            }
        }
    }
}
