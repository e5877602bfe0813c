//! Named, entity-addressed signal bus.
//!
//! Signals are lightweight events delivered between processing phases. A
//! producer appends `(entity, name)` pairs; a subscribed processor drains the
//! entries whose entities fall inside its own query result set during its
//! scheduled execution. Entries no subscriber drained before the cycle ends
//! are discarded — there is no retention beyond one processing pass.
//!
//! The bus is internally synchronized so processors running on worker threads
//! may signal and drain concurrently.

use std::sync::Mutex;

use fxhash::FxHashMap;

use crate::engine::types::Entity;

/// Subscription handle naming the signal a processor consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalToken {
    name: u32,
}

#[derive(Default)]
struct SignalState {
    interned: FxHashMap<String, u32>,
    pending: FxHashMap<u32, Vec<Entity>>,
}

impl SignalState {
    fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.interned.get(name) {
            return id;
        }
        let id = self.interned.len() as u32;
        self.interned.insert(name.to_owned(), id);
        id
    }
}

/// Bus of named pending signals.
#[derive(Default)]
pub struct SignalBus {
    state: Mutex<SignalState>,
}

impl SignalBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `(entity, name)` to the pending list for every given entity.
    pub fn signal(&self, name: &str, entities: &[Entity]) {
        let mut state = self.state.lock().unwrap();
        let id = state.intern(name);
        state.pending.entry(id).or_default().extend_from_slice(entities);
    }

    /// Registers a consumer for `name` and returns its token.
    pub fn subscribe(&self, name: &str) -> SignalToken {
        let mut state = self.state.lock().unwrap();
        SignalToken { name: state.intern(name) }
    }

    /// Drains and returns the pending entries accepted by `matcher`,
    /// leaving the rest pending for other subscribers within the cycle.
    pub fn drain(&self, token: SignalToken, mut matcher: impl FnMut(Entity) -> bool) -> Vec<Entity> {
        let mut state = self.state.lock().unwrap();
        let Some(pending) = state.pending.get_mut(&token.name) else {
            return Vec::new();
        };
        let mut drained = Vec::new();
        pending.retain(|&entity| {
            if matcher(entity) {
                drained.push(entity);
                false
            } else {
                true
            }
        });
        drained
    }

    /// Discards every pending entry. Called at the end of a processing cycle;
    /// signals carry no retention guarantee past it.
    pub fn end_cycle(&self) {
        let mut state = self.state.lock().unwrap();
        state.pending.clear();
    }

    /// Returns the number of pending entries for `name`, for diagnostics.
    pub fn pending_len(&self, name: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .interned
            .get(name)
            .and_then(|id| state.pending.get(id))
            .map(Vec::len)
            .unwrap_or(0)
    }
}
