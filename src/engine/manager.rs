//! Entity manager: world ownership and the structural mutation surface.
//!
//! [`EntityManager`] exclusively owns all archetypes, chunks, the entity
//! index, the shared fragment store, the observer registry, and the signal
//! bus. Every structural mutation — creation, destruction, composition change
//! — passes through it, either directly from a single-threaded context or via
//! command-buffer replay at a phase barrier.
//!
//! ## Concurrency model
//!
//! The world is internally mutable: [`Engine`] wraps the manager in an
//! `UnsafeCell` so shared (`&`) and exclusive (`&mut`) access paths can
//! coexist during parallel processor execution. Safety is enforced by *API
//! discipline*, not the borrow checker:
//!
//! * structural mutations happen only through exclusive access,
//! * parallel iteration is limited to non-overlapping declared access sets,
//! * deferred commands are applied only at phase barriers.
//!
//! This is the engine's one deliberate unsafety boundary; the scheduler's
//! conflict analysis is what upholds it.
//!
//! ## Handle semantics
//!
//! Operations on stale or destroyed handles never fail loudly: they return
//! `false`, `None`, or do nothing. The only hard errors are configuration
//! mistakes and internal invariant violations.

use std::any::Any;
use std::cell::UnsafeCell;

use tracing::trace;

use crate::engine::archetype::{ArchetypeTable, ChunkPolicy};
use crate::engine::entity::EntityIndex;
use crate::engine::error::{EngineError, EngineResult, SpawnError};
use crate::engine::fragment::{
    fragment_desc, fragment_id_of, try_fragment_id_of, Bundle, Fragment, FragmentKind,
};
use crate::engine::observer::{FragmentOp, ObserverBatch, ObserverId, ObserverRegistry};
use crate::engine::shared::{SharedKey, SharedStore};
use crate::engine::signal::SignalBus;
use crate::engine::types::{ArchetypeId, Entity, EntityLocation, FragmentId};

/// Top-level owner of all entity storage state.
pub struct EntityManager {
    table: ArchetypeTable,
    index: EntityIndex,
    shared: SharedStore,
    observers: ObserverRegistry,
    signals: SignalBus,
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityManager {
    /// Creates an empty world with the default chunk sizing policy.
    pub fn new() -> Self {
        Self::with_policy(ChunkPolicy::default())
    }

    /// Creates an empty world with an explicit chunk sizing policy.
    pub fn with_policy(policy: ChunkPolicy) -> Self {
        Self {
            table: ArchetypeTable::new(policy),
            index: EntityIndex::new(),
            shared: SharedStore::new(),
            observers: ObserverRegistry::new(),
            signals: SignalBus::new(),
        }
    }

    /// Returns the archetype table.
    #[inline]
    pub fn archetypes(&self) -> &ArchetypeTable {
        &self.table
    }

    /// Returns the archetype table mutably.
    #[inline]
    pub(crate) fn archetypes_mut(&mut self) -> &mut ArchetypeTable {
        &mut self.table
    }

    /// Returns the signal bus.
    #[inline]
    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    /// Returns the shared fragment store.
    #[inline]
    pub fn shared(&self) -> &SharedStore {
        &self.shared
    }

    /// Returns the number of live entities.
    pub fn live_count(&self) -> usize {
        self.index.live_count()
    }

    /// Registers an observer for add/remove of fragment type `T`.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn observe<T: Fragment>(
        &mut self,
        op: FragmentOp,
        callback: impl Fn(&[Entity]) + Send + Sync + 'static,
    ) -> ObserverId {
        self.observers.subscribe(fragment_id_of::<T>(), op, callback)
    }

    /// Removes an observer subscription.
    pub fn unobserve(&mut self, id: ObserverId) {
        self.observers.unsubscribe(id);
    }

    /// Appends `(entity, name)` signal entries for every given entity.
    pub fn signal_entities(&self, name: &str, entities: &[Entity]) {
        self.signals.signal(name, entities);
    }

    /// Returns `true` if the handle refers to a live entity.
    pub fn is_entity_valid(&self, entity: Entity) -> bool {
        self.index.is_alive(entity)
    }

    /// Returns the storage location of a live entity.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.index.location(entity)
    }

    /// Creates one entity from a bundle of initial values.
    pub fn create_entity(&mut self, bundle: Bundle) -> EngineResult<Entity> {
        let signature = bundle.signature();
        let archetype_id = self.table.lookup_or_create(&signature)?;
        self.spawn_in(archetype_id, bundle)
    }

    /// Creates `count` entities sharing one signature, pre-reserving chunk
    /// capacity so allocation is amortized over the whole batch.
    ///
    /// `init` is called once per row; every bundle must produce the same
    /// signature as the first.
    pub fn create_entities(
        &mut self,
        count: usize,
        mut init: impl FnMut(usize) -> Bundle,
    ) -> EngineResult<Vec<Entity>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let first = init(0);
        let signature = first.signature();
        let archetype_id = self.table.lookup_or_create(&signature)?;

        self.index.ensure_capacity(count as u32)?;
        let archetype = self
            .table
            .archetype_mut(archetype_id)
            .ok_or_else(|| EngineError::Internal("archetype vanished after creation".into()))?;
        archetype.reserve_rows(count);

        let mut entities = Vec::with_capacity(count);
        let mut first = Some(first);
        for row in 0..count {
            let bundle = match first.take() {
                Some(bundle) => bundle,
                None => init(row),
            };
            if bundle.signature() != signature {
                return Err(SpawnError::SignatureMismatch { row }.into());
            }
            entities.push(self.spawn_in(archetype_id, bundle)?);
        }
        Ok(entities)
    }

    fn spawn_in(&mut self, archetype_id: ArchetypeId, mut bundle: Bundle) -> EngineResult<Entity> {
        let entity = self.index.spawn(EntityLocation::default())?;
        let archetype = self
            .table
            .archetype_mut(archetype_id)
            .ok_or_else(|| EngineError::Internal("archetype vanished after creation".into()))?;

        match archetype.push_row(entity, &mut |fragment_id| bundle.take(fragment_id)) {
            Ok((chunk, row)) => {
                self.index.set_location(
                    entity,
                    EntityLocation { archetype: archetype_id, chunk, row },
                );
                for &key in bundle.shared_keys() {
                    self.shared.assign(entity, key);
                }
                Ok(entity)
            }
            Err(e) => {
                self.index.despawn(entity);
                Err(SpawnError::Storage(e).into())
            }
        }
    }

    /// Destroys an entity, compacting its chunk by swap-remove.
    ///
    /// Stale or already-destroyed handles are a silent no-op returning
    /// `false`. Fragment values of every other live entity are untouched,
    /// though one entity's row may move within the same chunk.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        let Some(location) = self.index.location(entity) else {
            return false;
        };
        let Some(archetype) = self.table.archetype_mut(location.archetype) else {
            return false;
        };

        let moved = match archetype.swap_remove_row(location.chunk, location.row) {
            Ok(moved) => moved,
            Err(_) => return false,
        };

        let shared_ids: Vec<FragmentId> = archetype
            .signature()
            .iter()
            .filter(|&id| {
                fragment_desc(id).map(|d| d.kind == FragmentKind::Shared).unwrap_or(false)
            })
            .collect();

        if let Some(moved_entity) = moved {
            self.index.set_location(moved_entity, location);
        }
        for fragment_id in shared_ids {
            self.shared.release(fragment_id, entity);
        }
        self.index.despawn(entity)
    }

    /// Returns `true` if the live entity's signature contains `T`.
    pub fn has_fragment<T: Fragment>(&self, entity: Entity) -> bool {
        let Some(fragment_id) = try_fragment_id_of::<T>() else {
            return false;
        };
        self.index
            .location(entity)
            .and_then(|l| self.table.archetype(l.archetype))
            .map(|a| a.has(fragment_id))
            .unwrap_or(false)
    }

    /// Returns a read-only view of the entity's `T` fragment.
    ///
    /// `None` for stale handles, unregistered types, and entities lacking `T`.
    pub fn get_fragment<T: Fragment>(&self, entity: Entity) -> Option<&T> {
        try_fragment_id_of::<T>()?;
        let location = self.index.location(entity)?;
        let archetype = self.table.archetype(location.archetype)?;
        let chunk = archetype.chunk(location.chunk)?;
        chunk.column_slice::<T>()?.get(location.row as usize)
    }

    /// Returns a mutable view of the entity's `T` fragment.
    pub fn get_fragment_mut<T: Fragment>(&mut self, entity: Entity) -> Option<&mut T> {
        try_fragment_id_of::<T>()?;
        let location = self.index.location(entity)?;
        let archetype = self.table.archetype_mut(location.archetype)?;
        let chunk = archetype.chunk_mut(location.chunk)?;
        chunk.column_slice_mut::<T>()?.get_mut(location.row as usize)
    }

    /// Adds a default-constructed `T` fragment, migrating the entity to the
    /// archetype whose signature includes it.
    ///
    /// Observers subscribed to `(T, Added)` fire once the move completes.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn add_fragment<T: Fragment + Default>(&mut self, entity: Entity) -> EngineResult<bool> {
        self.add_fragment_with(entity, T::default())
    }

    /// Adds a `T` fragment holding `value`; see [`EntityManager::add_fragment`].
    pub fn add_fragment_with<T: Fragment>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> EngineResult<bool> {
        let fragment_id = fragment_id_of::<T>();
        let mut batch = ObserverBatch::new();
        let applied =
            self.add_fragment_erased(entity, fragment_id, Some(Box::new(value)), &mut batch)?;
        batch.dispatch(&self.observers);
        Ok(applied)
    }

    /// Removes the `T` fragment, migrating the entity to the archetype whose
    /// signature excludes it. The removed value is dropped.
    ///
    /// No-op returning `false` if the entity is stale or lacks `T`.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn remove_fragment<T: Fragment>(&mut self, entity: Entity) -> EngineResult<bool> {
        let fragment_id = fragment_id_of::<T>();
        let mut batch = ObserverBatch::new();
        let applied = self.remove_fragment_erased(entity, fragment_id, &mut batch)?;
        batch.dispatch(&self.observers);
        Ok(applied)
    }

    /// Marks the entity with tag `T`.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn add_tag<T: Fragment>(&mut self, entity: Entity) -> EngineResult<bool> {
        let fragment_id = fragment_id_of::<T>();
        let mut batch = ObserverBatch::new();
        let applied = self.add_fragment_erased(entity, fragment_id, None, &mut batch)?;
        batch.dispatch(&self.observers);
        Ok(applied)
    }

    /// Clears tag `T` from the entity.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn remove_tag<T: Fragment>(&mut self, entity: Entity) -> EngineResult<bool> {
        let fragment_id = fragment_id_of::<T>();
        let mut batch = ObserverBatch::new();
        let applied = self.remove_fragment_erased(entity, fragment_id, &mut batch)?;
        batch.dispatch(&self.observers);
        Ok(applied)
    }

    /// Assigns the entity to a fresh shared value group holding `value`,
    /// releasing any previous group for the same fragment type.
    ///
    /// The shared fragment type joins the entity's signature if absent.
    ///
    /// ## Panics
    /// Panics if `T` is not registered as a shared fragment.
    pub fn set_shared_fragment<T: Fragment>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> EngineResult<bool> {
        let fragment_id = fragment_id_of::<T>();
        let mut batch = ObserverBatch::new();
        let applied =
            self.set_shared_erased(entity, fragment_id, Box::new(value), &mut batch)?;
        batch.dispatch(&self.observers);
        Ok(applied)
    }

    /// Assigns the entity to an existing shared value group.
    pub fn assign_shared_key(&mut self, entity: Entity, key: SharedKey) -> EngineResult<bool> {
        let mut batch = ObserverBatch::new();
        let applied = self.assign_shared_key_inner(entity, key, &mut batch)?;
        batch.dispatch(&self.observers);
        Ok(applied)
    }

    /// Interns a new shared value group for fragment type `T`.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn insert_shared_value<T: Fragment>(&mut self, value: T) -> SharedKey {
        self.shared.insert_value(fragment_id_of::<T>(), value)
    }

    /// Returns the shared `T` value the entity is grouped under, if any.
    pub fn shared_value_of<T: Fragment>(&self, entity: Entity) -> Option<&T> {
        let fragment_id = try_fragment_id_of::<T>()?;
        let key = self.shared.key_of(fragment_id, entity)?;
        self.shared.value::<T>(key)
    }

    /// Commits a wholesale replacement of a shared group's value.
    pub fn replace_shared_value<T: Fragment>(&mut self, key: SharedKey, value: T) -> bool {
        self.shared.replace_value(key, value)
    }

    pub(crate) fn add_fragment_erased(
        &mut self,
        entity: Entity,
        fragment_id: FragmentId,
        value: Option<Box<dyn Any + Send + Sync>>,
        batch: &mut ObserverBatch,
    ) -> EngineResult<bool> {
        let Some(location) = self.index.location(entity) else {
            return Ok(false);
        };
        let source_id = location.archetype;
        let source_signature = *self
            .table
            .archetype(source_id)
            .ok_or_else(|| EngineError::Internal("entity location names unknown archetype".into()))?
            .signature();

        let has_column = fragment_desc(fragment_id).map(|d| d.has_column()).unwrap_or(false);

        if source_signature.has(fragment_id) {
            // already present: overwrite the stored value in place, no move
            if let (true, Some(value)) = (has_column, value) {
                let archetype = self
                    .table
                    .archetype_mut(source_id)
                    .ok_or_else(|| EngineError::Internal("archetype vanished".into()))?;
                let chunk = archetype
                    .chunk_mut(location.chunk)
                    .ok_or_else(|| EngineError::Internal("entity location names unknown chunk".into()))?;
                let column = chunk
                    .column_mut_by_id(fragment_id)
                    .ok_or_else(|| EngineError::Internal("signature and columns disagree".into()))?;
                column.set_erased(location.row as usize, value).map_err(EngineError::Storage)?;
            }
            return Ok(true);
        }

        let mut destination_signature = source_signature;
        destination_signature.set(fragment_id);
        let destination_id = self.table.lookup_or_create(&destination_signature)?;

        let added = match (has_column, value) {
            (true, Some(value)) => vec![(fragment_id, value)],
            _ => Vec::new(),
        };

        let (source, destination) = self.table.pair_mut(source_id, destination_id);
        let ((chunk, row), moved) =
            source.move_row_to(destination, entity, (location.chunk, location.row), added)?;

        if let Some(moved_entity) = moved {
            self.index.set_location(moved_entity, location);
        }
        self.index.set_location(
            entity,
            EntityLocation { archetype: destination_id, chunk, row },
        );
        batch.record(fragment_id, FragmentOp::Added, entity);
        Ok(true)
    }

    pub(crate) fn remove_fragment_erased(
        &mut self,
        entity: Entity,
        fragment_id: FragmentId,
        batch: &mut ObserverBatch,
    ) -> EngineResult<bool> {
        let Some(location) = self.index.location(entity) else {
            return Ok(false);
        };
        let source_id = location.archetype;
        let source_signature = *self
            .table
            .archetype(source_id)
            .ok_or_else(|| EngineError::Internal("entity location names unknown archetype".into()))?
            .signature();

        if !source_signature.has(fragment_id) {
            return Ok(false);
        }

        let mut destination_signature = source_signature;
        destination_signature.clear(fragment_id);
        let destination_id = self.table.lookup_or_create(&destination_signature)?;

        let (source, destination) = self.table.pair_mut(source_id, destination_id);
        let ((chunk, row), moved) =
            source.move_row_to(destination, entity, (location.chunk, location.row), Vec::new())?;

        if let Some(moved_entity) = moved {
            self.index.set_location(moved_entity, location);
        }
        self.index.set_location(
            entity,
            EntityLocation { archetype: destination_id, chunk, row },
        );

        let is_shared = fragment_desc(fragment_id)
            .map(|d| d.kind == FragmentKind::Shared)
            .unwrap_or(false);
        if is_shared {
            self.shared.release(fragment_id, entity);
        }

        batch.record(fragment_id, FragmentOp::Removed, entity);
        Ok(true)
    }

    pub(crate) fn set_shared_erased(
        &mut self,
        entity: Entity,
        fragment_id: FragmentId,
        value: Box<dyn Any + Send + Sync>,
        batch: &mut ObserverBatch,
    ) -> EngineResult<bool> {
        if !self.index.is_alive(entity) {
            return Ok(false);
        }
        let key = self.shared.insert_value_erased(fragment_id, value);
        self.assign_shared_key_inner(entity, key, batch)
    }

    fn assign_shared_key_inner(
        &mut self,
        entity: Entity,
        key: SharedKey,
        batch: &mut ObserverBatch,
    ) -> EngineResult<bool> {
        // ensure the shared fragment type is part of the signature first
        let applied = self.add_fragment_erased(entity, key.fragment, None, batch)?;
        if !applied {
            return Ok(false);
        }
        self.shared.assign(entity, key);
        trace!(entity = entity.0, fragment = key.fragment, "assigned shared group");
        Ok(true)
    }

    pub(crate) fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }
}

/// Thread-safe entry point to the world.
///
/// `Engine` owns the entire state and hands out lightweight [`EngineRef`]
/// handles. It is `Sync`: all mutation goes through the inner `UnsafeCell`,
/// and callers must respect the access discipline documented on
/// [`EntityManager`].
pub struct Engine {
    inner: UnsafeCell<EntityManager>,
}

// Safety: parallel access is restricted by scheduler discipline — processors
// with conflicting declared access never run concurrently, and structural
// mutation happens only at barriers.
unsafe impl Sync for Engine {}

impl Engine {
    /// Wraps a world for scheduled execution.
    pub fn new(manager: EntityManager) -> Self {
        Self { inner: UnsafeCell::new(manager) }
    }

    /// Returns a lightweight reference handle to the world.
    #[inline]
    pub fn world_ref(&self) -> EngineRef<'_> {
        EngineRef { inner: &self.inner }
    }

    /// Returns exclusive access to the world.
    #[inline]
    pub fn get_mut(&mut self) -> &mut EntityManager {
        self.inner.get_mut()
    }

    /// Unwraps the world.
    pub fn into_inner(self) -> EntityManager {
        self.inner.into_inner()
    }
}

/// A non-owning handle granting access to the world.
///
/// ## Safety
/// This type exposes raw access to [`EntityManager`] via `UnsafeCell` and
/// relies on scheduling to prevent conflicting mutable access; no aliasing
/// guarantees are enforced at compile time.
#[derive(Clone, Copy)]
pub struct EngineRef<'a> {
    inner: &'a UnsafeCell<EntityManager>,
}

impl<'a> EngineRef<'a> {
    /// Returns an immutable reference to the world.
    #[inline]
    pub fn data(&self) -> &'a EntityManager {
        unsafe { &*self.inner.get() }
    }

    /// Returns a mutable reference to the world.
    ///
    /// ## Safety
    /// Caller must ensure no conflicting references are active while this
    /// reference is used; the scheduler's declared-access discipline is the
    /// intended guarantee.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub fn data_mut(&self) -> &'a mut EntityManager {
        unsafe { &mut *self.inner.get() }
    }
}
