//! Registry of named external resources.
//!
//! Resources are collaborators the engine does not own — asset caches,
//! terrain fields, RNG streams. A query declares the resources its processor
//! touches; the declaration is resolved here exactly once at configuration
//! time, and only the resolved identity participates in scheduling: two
//! processors sharing a resource id are serialized.

use fxhash::FxHashMap;

/// Opaque identity of one registered external resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(pub u16);

/// Name → identity table for external resources.
#[derive(Default)]
pub struct ResourceRegistry {
    by_name: FxHashMap<String, ResourceId>,
    names: Vec<String>,
}

impl ResourceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, returning the existing id if already present.
    pub fn register(&mut self, name: &str) -> ResourceId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = ResourceId(self.names.len() as u16);
        self.by_name.insert(name.to_owned(), id);
        self.names.push(name.to_owned());
        id
    }

    /// Resolves `name` to its id, if registered.
    pub fn resolve(&self, name: &str) -> Option<ResourceId> {
        self.by_name.get(name).copied()
    }

    /// Returns the name behind `id`, for diagnostics.
    pub fn name(&self, id: ResourceId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }
}
