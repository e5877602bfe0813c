//! # Fragment registry
//!
//! This module provides a global registry that assigns stable [`FragmentId`]
//! values to Rust fragment types and exposes type-erased column factories for
//! chunk allocation.
//!
//! ## Purpose
//! The registry decouples fragment type information (`TypeId`, name, size,
//! alignment, kind) from runtime storage, enabling chunks to allocate
//! heterogeneous columns behind the erased [`Column`] trait.
//!
//! ## Design
//! - Fragments are registered once and assigned a compact `FragmentId` in
//!   `[0, FRAGMENT_CAP)`.
//! - A per-fragment factory function is stored for constructing column storage
//!   at a given chunk capacity.
//! - Zero-sized types register as **tags**: they contribute signature bits but
//!   receive no column storage.
//! - Types registered through [`register_shared_fragment`] are **shared**:
//!   their values live in the shared store, grouped by key, and chunks carry
//!   no column for them either.
//! - The registry can be frozen to prevent further registration after world
//!   setup.
//!
//! ## Invariants
//! - `FragmentId` values are unique and stable for the lifetime of the process.
//! - A registered data fragment always has a corresponding column factory.
//! - When frozen, registration is disallowed.
//!
//! ## Concurrency
//! The registry is protected by `RwLock` for concurrent reads and serialized
//! writes. Factories are installed during registration only.

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    mem::{align_of, size_of},
    sync::{OnceLock, RwLock},
};

use crate::engine::chunk::{Column, TypedColumn};
use crate::engine::shared::SharedKey;
use crate::engine::types::{FragmentId, Signature, FRAGMENT_CAP};

/// Marker bounds required of every fragment type.
pub trait Fragment: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Fragment for T {}

/// Factory constructing an empty column with the given row capacity.
pub type ColumnFactory = fn(usize) -> Box<dyn Column>;

/// Storage classification of a registered fragment type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentKind {
    /// Plain per-entity data stored in a chunk column.
    Data,
    /// Zero-sized marker used only for filtering; no column storage.
    Tag,
    /// Value shared by a group of entities, stored once in the shared store.
    Shared,
}

/// Describes a registered fragment type.
#[derive(Clone, Copy, Debug)]
pub struct FragmentDesc {
    /// Runtime identifier assigned by the registry.
    pub fragment_id: FragmentId,
    /// Rust type name, for diagnostics.
    pub name: &'static str,
    /// Runtime `TypeId` of the fragment.
    pub type_id: TypeId,
    /// Size of the fragment type in bytes.
    pub size: usize,
    /// Alignment of the fragment type in bytes.
    pub align: usize,
    /// Storage classification.
    pub kind: FragmentKind,
}

impl FragmentDesc {
    /// Returns `true` if this fragment owns a chunk column.
    #[inline]
    pub fn has_column(&self) -> bool {
        self.kind == FragmentKind::Data
    }
}

struct FragmentRegistry {
    next_id: FragmentId,
    by_type: HashMap<TypeId, FragmentId>,
    by_id: Vec<Option<FragmentDesc>>,
    factories: Vec<Option<ColumnFactory>>,
    frozen: bool,
}

static REGISTRY: OnceLock<RwLock<FragmentRegistry>> = OnceLock::new();

fn registry() -> &'static RwLock<FragmentRegistry> {
    REGISTRY.get_or_init(|| {
        RwLock::new(FragmentRegistry {
            next_id: 0,
            by_type: HashMap::new(),
            by_id: vec![None; FRAGMENT_CAP],
            factories: vec![None; FRAGMENT_CAP],
            frozen: false,
        })
    })
}

fn new_column_storage<T: Fragment>(capacity: usize) -> Box<dyn Column> {
    Box::new(TypedColumn::<T>::with_capacity(capacity))
}

impl FragmentRegistry {
    fn alloc_id(&mut self) -> FragmentId {
        let fragment_id = self.next_id;
        assert!(
            (fragment_id as usize) < FRAGMENT_CAP,
            "exceeded configured fragment capacity"
        );
        self.next_id = fragment_id.wrapping_add(1);
        fragment_id
    }

    fn register<T: Fragment>(&mut self, kind: FragmentKind) -> FragmentId {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            return existing;
        }

        assert!(!self.frozen, "fragment registry frozen");
        let id = self.alloc_id();
        self.by_type.insert(type_id, id);
        self.by_id[id as usize] = Some(FragmentDesc {
            fragment_id: id,
            name: type_name::<T>(),
            type_id,
            size: size_of::<T>(),
            align: align_of::<T>(),
            kind,
        });
        if kind == FragmentKind::Data {
            self.factories[id as usize] = Some(new_column_storage::<T>);
        }
        id
    }
}

/// Registers fragment type `T` and returns its assigned [`FragmentId`].
///
/// Zero-sized types are classified as tags and receive no column storage.
/// Registering an already-registered type returns the existing id.
///
/// ## Panics
/// Panics if the registry is frozen or `FRAGMENT_CAP` is exceeded.
pub fn register_fragment<T: Fragment>() -> FragmentId {
    let kind = if size_of::<T>() == 0 { FragmentKind::Tag } else { FragmentKind::Data };
    registry().write().unwrap().register::<T>(kind)
}

/// Registers `T` as a shared fragment type and returns its [`FragmentId`].
///
/// Shared fragment values are stored once per group in the shared store;
/// chunks carry no column for them. Presence still participates in the
/// signature so queries can require it.
///
/// ## Panics
/// Panics if the registry is frozen or `FRAGMENT_CAP` is exceeded.
pub fn register_shared_fragment<T: Fragment>() -> FragmentId {
    registry().write().unwrap().register::<T>(FragmentKind::Shared)
}

/// Freezes the global fragment registry, preventing further registration.
pub fn freeze_fragments() {
    registry().write().unwrap().frozen = true;
}

/// Returns the registered [`FragmentId`] for type `T`.
///
/// ## Panics
/// Panics if `T` is not registered.
pub fn fragment_id_of<T: Fragment>() -> FragmentId {
    try_fragment_id_of::<T>().expect("fragment type not registered")
}

/// Returns the registered [`FragmentId`] for type `T`, if any.
pub fn try_fragment_id_of<T: Fragment>() -> Option<FragmentId> {
    registry()
        .read()
        .unwrap()
        .by_type
        .get(&TypeId::of::<T>())
        .copied()
}

/// Returns a copy of the descriptor for `fragment_id`, if registered.
pub fn fragment_desc(fragment_id: FragmentId) -> Option<FragmentDesc> {
    registry()
        .read()
        .unwrap()
        .by_id
        .get(fragment_id as usize)
        .and_then(|d| *d)
}

/// Creates an empty column for `fragment_id` with the given row capacity.
///
/// ## Panics
/// Panics if no factory was registered for this fragment id (unregistered,
/// tag, or shared fragment).
pub fn make_empty_column(fragment_id: FragmentId, capacity: usize) -> Box<dyn Column> {
    let factory = registry().read().unwrap().factories[fragment_id as usize]
        .expect("no column factory registered for this fragment id");
    factory(capacity)
}

/// Type-erased container of fragment values used to initialize one entity.
///
/// A bundle collects the fragment values, tags, and shared-group assignments
/// a new entity starts with; its signature determines the target archetype.
#[derive(Default)]
pub struct Bundle {
    signature: Signature,
    values: Vec<(FragmentId, Box<dyn Any + Send + Sync>)>,
    shared: Vec<SharedKey>,
}

impl Bundle {
    /// Creates an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a data fragment value.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn insert<T: Fragment>(&mut self, value: T) {
        let fragment_id = fragment_id_of::<T>();
        self.signature.set(fragment_id);
        self.values.push((fragment_id, Box::new(value)));
    }

    /// Marks the entity with tag `T`.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn insert_tag<T: Fragment>(&mut self) {
        self.signature.set(fragment_id_of::<T>());
    }

    /// Assigns the entity to an existing shared value group.
    ///
    /// The key's fragment type is added to the signature.
    pub fn insert_shared(&mut self, key: SharedKey) {
        self.signature.set(key.fragment);
        self.shared.push(key);
    }

    /// Returns the signature the bundled entity will have.
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Removes and returns the value for `fragment_id`, if present.
    pub(crate) fn take(&mut self, fragment_id: FragmentId) -> Option<Box<dyn Any + Send + Sync>> {
        let index = self.values.iter().position(|(id, _)| *id == fragment_id)?;
        let (_, value) = self.values.swap_remove(index);
        Some(value)
    }

    /// Shared group assignments carried by this bundle.
    pub(crate) fn shared_keys(&self) -> &[SharedKey] {
        &self.shared
    }
}
