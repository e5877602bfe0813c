//! Query construction, cached matching, and chunk iteration.
//!
//! A query is a cached predicate over archetype signatures plus chunk-wise
//! iteration over the matching archetypes. Queries are configured once — a
//! fragment type unknown to the registry or an unresolvable external resource
//! surfaces here, at build time, never per entity at runtime.
//!
//! ## Matching
//!
//! An archetype matches iff its signature is a superset of the required set
//! and disjoint from the excluded set. Optional fragments never affect
//! matching; their columns are simply absent from some chunk views.
//!
//! ## Cache
//!
//! Each query caches the ids of matching archetypes together with the
//! archetype-table generation it last saw. Because archetypes are never
//! destroyed and ids are creation-ordered, a refresh scans only archetypes
//! created since — an O(new) incremental update, not a re-scan per execution.
//!
//! ## Iteration contract
//!
//! Matching archetypes are visited in creation order and chunks within each
//! archetype in creation order, yielding per-chunk column views sliced to the
//! occupied rows. Order is stable across repeated calls absent structural
//! changes, but does not reflect entity creation order once migrations have
//! occurred. Views must not be retained across a command-buffer replay.

use std::any::type_name;
use std::sync::Mutex;

use crate::engine::archetype::ArchetypeTable;
use crate::engine::chunk::ChunkView;
use crate::engine::error::QueryError;
use crate::engine::fragment::{try_fragment_id_of, Fragment};
use crate::engine::manager::{EngineRef, EntityManager};
use crate::engine::resource::{ResourceId, ResourceRegistry};
use crate::engine::types::{AccessSets, ArchetypeId, ChunkId, Entity, FragmentId, Signature};

/// Builder for queries.
///
/// Consumed by [`QueryBuilder::build`]; every declaration resolves its
/// fragment type immediately so configuration errors surface exactly once.
#[derive(Debug)]
pub struct QueryBuilder {
    required: Signature,
    excluded: Signature,
    access: AccessSets,
    resources: Vec<ResourceId>,
    needs_sync: bool,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            required: Signature::default(),
            excluded: Signature::default(),
            access: AccessSets::default(),
            resources: Vec::new(),
            needs_sync: false,
        }
    }

    fn resolve<T: Fragment>() -> Result<FragmentId, QueryError> {
        try_fragment_id_of::<T>().ok_or(QueryError::UnknownFragment { name: type_name::<T>() })
    }

    /// Requires fragment `T` with read-only access.
    pub fn read<T: Fragment>(mut self) -> Result<Self, QueryError> {
        let fragment_id = Self::resolve::<T>()?;
        self.required.set(fragment_id);
        self.access.read.set(fragment_id);
        Ok(self)
    }

    /// Requires fragment `T` with exclusive write access.
    pub fn write<T: Fragment>(mut self) -> Result<Self, QueryError> {
        let fragment_id = Self::resolve::<T>()?;
        self.required.set(fragment_id);
        self.access.write.set(fragment_id);
        Ok(self)
    }

    /// Reads fragment `T` where present; its absence never excludes an
    /// archetype.
    pub fn optional<T: Fragment>(mut self) -> Result<Self, QueryError> {
        let fragment_id = Self::resolve::<T>()?;
        self.access.read.set(fragment_id);
        Ok(self)
    }

    /// Excludes archetypes containing fragment `T`.
    pub fn without<T: Fragment>(mut self) -> Result<Self, QueryError> {
        let fragment_id = Self::resolve::<T>()?;
        self.excluded.set(fragment_id);
        Ok(self)
    }

    /// Requires tag `T`.
    pub fn with_tag<T: Fragment>(mut self) -> Result<Self, QueryError> {
        let fragment_id = Self::resolve::<T>()?;
        self.required.set(fragment_id);
        Ok(self)
    }

    /// Excludes archetypes marked with tag `T`.
    pub fn without_tag<T: Fragment>(mut self) -> Result<Self, QueryError> {
        let fragment_id = Self::resolve::<T>()?;
        self.excluded.set(fragment_id);
        Ok(self)
    }

    /// Requires the shared fragment type `T` to be assigned.
    pub fn shared<T: Fragment>(mut self) -> Result<Self, QueryError> {
        let fragment_id = Self::resolve::<T>()?;
        self.required.set(fragment_id);
        self.access.read.set(fragment_id);
        Ok(self)
    }

    /// Declares use of a named external resource, resolved once here.
    ///
    /// Resources are opaque to the engine; the resolved identity only
    /// participates in scheduling conflicts.
    pub fn resource(
        mut self,
        registry: &ResourceRegistry,
        name: &str,
    ) -> Result<Self, QueryError> {
        let id = registry
            .resolve(name)
            .ok_or_else(|| QueryError::UnknownResource { name: name.to_owned() })?;
        if !self.resources.contains(&id) {
            self.resources.push(id);
        }
        Ok(self)
    }

    /// Declares that the consumer must run on the designated synchronization
    /// context; such processors never run concurrently with each other.
    pub fn sync_context(mut self) -> Self {
        self.needs_sync = true;
        self
    }

    /// Finalizes the query.
    pub fn build(self) -> Result<Query, QueryError> {
        for fragment_id in self.access.read.iter() {
            if self.access.write.has(fragment_id) {
                return Err(QueryError::ReadAndWrite { fragment_id });
            }
        }
        Ok(Query {
            required: self.required,
            excluded: self.excluded,
            access: self.access,
            resources: self.resources,
            needs_sync: self.needs_sync,
            cache: Mutex::new(QueryCache { matches: Vec::new(), seen: 0, generation: 0 }),
        })
    }
}

#[derive(Debug)]
struct QueryCache {
    matches: Vec<ArchetypeId>,
    seen: usize,
    generation: u64,
}

/// A cached predicate over archetype signatures plus chunk iteration.
#[derive(Debug)]
pub struct Query {
    required: Signature,
    excluded: Signature,
    access: AccessSets,
    resources: Vec<ResourceId>,
    needs_sync: bool,
    cache: Mutex<QueryCache>,
}

impl Query {
    /// Starts building a query.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Returns the declared fragment access sets, for conflict analysis.
    pub fn access(&self) -> &AccessSets {
        &self.access
    }

    /// Returns the declared external resources, for conflict analysis.
    pub fn resources(&self) -> &[ResourceId] {
        &self.resources
    }

    /// Returns `true` if the consumer requires the synchronization context.
    pub fn needs_sync_context(&self) -> bool {
        self.needs_sync
    }

    /// Returns `true` if `signature` satisfies this query.
    pub fn matches_signature(&self, signature: &Signature) -> bool {
        signature.contains_all(&self.required) && signature.is_disjoint(&self.excluded)
    }

    /// Returns the matching archetype ids in creation order, refreshing the
    /// cache incrementally if archetypes were created since the last call.
    pub fn matching_archetypes(&self, table: &ArchetypeTable) -> Vec<ArchetypeId> {
        let mut cache = self.cache.lock().unwrap();
        if cache.generation != table.generation() {
            let seen = cache.seen;
            for archetype in &table.archetypes()[seen..] {
                if self.matches_signature(archetype.signature()) {
                    cache.matches.push(archetype.id());
                }
            }
            cache.seen = table.len();
            cache.generation = table.generation();
        }
        cache.matches.clone()
    }

    /// Visits every matching chunk, in archetype creation order and chunk
    /// creation order, yielding views sliced to the occupied rows.
    pub fn for_each_chunk<F>(&self, world: &mut EntityManager, mut f: F)
    where
        F: FnMut(ChunkView<'_>),
    {
        let ids = self.matching_archetypes(world.archetypes());
        for id in ids {
            let Some(archetype) = world.archetypes_mut().archetype_mut(id) else {
                continue;
            };
            for chunk_index in 0..archetype.chunk_count() {
                let chunk = archetype
                    .chunk_mut(chunk_index as ChunkId)
                    .expect("chunk index within chunk_count");
                if chunk.is_empty() {
                    continue;
                }
                f(ChunkView::new(chunk));
            }
        }
    }
}

impl<'a> EngineRef<'a> {
    /// Visits every chunk matching `query`; see [`Query::for_each_chunk`].
    pub fn for_each_chunk<F>(&self, query: &Query, f: F)
    where
        F: FnMut(ChunkView<'_>),
    {
        query.for_each_chunk(self.data_mut(), f);
    }

    /// Iterates one read-only fragment.
    pub fn for_each_read<A: Fragment, F>(&self, query: &Query, mut f: F)
    where
        F: FnMut(&A),
    {
        self.for_each_chunk(query, |view| {
            if let Some(a) = view.column::<A>() {
                for a in a {
                    f(a);
                }
            }
        });
    }

    /// Iterates one read-only fragment together with the owning entity id.
    pub fn for_each_read_entity<A: Fragment, F>(&self, query: &Query, mut f: F)
    where
        F: FnMut(Entity, &A),
    {
        self.for_each_chunk(query, |view| {
            if let Some(a) = view.column::<A>() {
                for (entity, a) in view.entities().iter().zip(a) {
                    f(*entity, a);
                }
            }
        });
    }

    /// Iterates two read-only fragments.
    pub fn for_each_read2<A: Fragment, B: Fragment, F>(&self, query: &Query, mut f: F)
    where
        F: FnMut(&A, &B),
    {
        self.for_each_chunk(query, |view| {
            if let (Some(a), Some(b)) = (view.column::<A>(), view.column::<B>()) {
                for (a, b) in a.iter().zip(b) {
                    f(a, b);
                }
            }
        });
    }

    /// Iterates one mutable fragment.
    pub fn for_each_write<A: Fragment, F>(&self, query: &Query, mut f: F)
    where
        F: FnMut(&mut A),
    {
        self.for_each_chunk(query, |view| {
            if let Some(a) = view.column_mut::<A>() {
                for a in a {
                    f(a);
                }
            }
        });
    }

    /// Iterates one read-only and one mutable fragment.
    pub fn for_each_read_write<A: Fragment, B: Fragment, F>(&self, query: &Query, mut f: F)
    where
        F: FnMut(&A, &mut B),
    {
        self.for_each_chunk(query, |view| {
            if let (Some(a), Some(b)) = (view.column::<A>(), view.column_mut::<B>()) {
                for (a, b) in a.iter().zip(b) {
                    f(a, b);
                }
            }
        });
    }

    /// Iterates two read-only fragments and one mutable fragment.
    pub fn for_each_read2_write<A: Fragment, B: Fragment, C: Fragment, F>(
        &self,
        query: &Query,
        mut f: F,
    ) where
        F: FnMut(&A, &B, &mut C),
    {
        self.for_each_chunk(query, |view| {
            let (Some(a), Some(b), Some(c)) =
                (view.column::<A>(), view.column::<B>(), view.column_mut::<C>())
            else {
                return;
            };
            for ((a, b), c) in a.iter().zip(b).zip(c) {
                f(a, b, c);
            }
        });
    }
}
