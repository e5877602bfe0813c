//! Fixed-capacity chunk storage and type-erased column access.
//!
//! A [`Chunk`] is the unit of storage inside an archetype: a fixed-capacity,
//! contiguous block holding one column per data fragment in the archetype's
//! signature, plus the owning entity ids. Rows are dense; removing a row swaps
//! the chunk's own last occupied row into the freed slot, so no gaps ever
//! exist below the occupied count and compaction never crosses chunk
//! boundaries.
//!
//! # Storage model
//!
//! ```text
//! Chunk (capacity 4, occupied 3)
//!   entities: [ e9, e2, e7, — ]
//!   column A: [ a,  a,  a,  — ]
//!   column B: [ b,  b,  b,  — ]
//! ```
//!
//! Every column always has exactly `occupied` elements; columns and the entity
//! id list move rows in lockstep.
//!
//! # Type erasure
//!
//! The [`Column`] trait provides a dynamically-typed interface over per-type
//! storage so chunks can hold heterogeneous columns behind trait objects:
//!
//! - the element [`TypeId`] and human-readable element type name,
//! - downcasting hooks via `as_any` / `as_any_mut`,
//! - mutation mirroring the typed operations (`push_erased`, `swap_remove`,
//!   `move_row_into` for cross-archetype migration).
//!
//! Typed slice access succeeds only when the requested type matches the
//! column's real element type; otherwise it returns `None`.
//!
//! # Invariants
//!
//! - All columns of a chunk hold exactly `occupied` initialized elements.
//! - `occupied <= capacity` at all times.
//! - Row removal uses swap-remove within the same chunk only.

use std::any::{type_name, Any, TypeId};
use std::marker::PhantomData;

use crate::engine::error::StorageError;
use crate::engine::fragment::{make_empty_column, FragmentDesc};
use crate::engine::types::{Entity, FragmentId, RowId};

/// A type-erased, densely packed storage column for a single fragment type.
///
/// Implementations must keep all mutation constant-time and preserve dense
/// packing; element order is not preserved across removals.
pub trait Column: Send + Sync {
    /// Returns the number of initialized elements stored.
    fn len(&self) -> usize;

    /// Returns `true` if the column holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an immutable type-erased reference for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns a mutable type-erased reference for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Returns the `TypeId` of the element type stored by this column.
    fn element_type_id(&self) -> TypeId;

    /// Returns the human-readable name of the element type stored.
    fn element_type_name(&self) -> &'static str;

    /// Appends a dynamically-typed value to the column.
    ///
    /// Fails with [`StorageError::TypeMismatch`] when the value's dynamic type
    /// does not match the column's element type.
    fn push_erased(&mut self, value: Box<dyn Any + Send + Sync>) -> Result<(), StorageError>;

    /// Overwrites the element at `row` with a dynamically-typed value.
    fn set_erased(
        &mut self,
        row: usize,
        value: Box<dyn Any + Send + Sync>,
    ) -> Result<(), StorageError>;

    /// Removes the element at `row` by swapping the last element into its
    /// place.
    fn swap_remove(&mut self, row: usize);

    /// Moves the element at `row` into `destination`, swap-removing it from
    /// this column.
    ///
    /// Fails with [`StorageError::TypeMismatch`] when the destination column
    /// stores a different element type.
    fn move_row_into(
        &mut self,
        destination: &mut dyn Column,
        row: usize,
    ) -> Result<(), StorageError>;
}

/// Concrete column storage for elements of type `T`.
///
/// Backed by a `Vec<T>` whose capacity is reserved once at chunk construction,
/// so pushes up to the chunk capacity never reallocate.
pub struct TypedColumn<T> {
    values: Vec<T>,
}

impl<T: Send + Sync + 'static> TypedColumn<T> {
    /// Creates an empty column with room for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { values: Vec::with_capacity(capacity) }
    }

    /// Returns the stored elements as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    /// Returns the stored elements as a mutable slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.values
    }
}

impl<T: Send + Sync + 'static> Column for TypedColumn<T> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn element_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn element_type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn push_erased(&mut self, value: Box<dyn Any + Send + Sync>) -> Result<(), StorageError> {
        match value.downcast::<T>() {
            Ok(value) => {
                self.values.push(*value);
                Ok(())
            }
            Err(value) => Err(StorageError::TypeMismatch {
                expected: TypeId::of::<T>(),
                expected_name: type_name::<T>(),
                actual: value.as_ref().type_id(),
            }),
        }
    }

    fn set_erased(
        &mut self,
        row: usize,
        value: Box<dyn Any + Send + Sync>,
    ) -> Result<(), StorageError> {
        if row >= self.values.len() {
            return Err(StorageError::PositionOutOfBounds {
                row: row as RowId,
                occupied: self.values.len(),
            });
        }
        match value.downcast::<T>() {
            Ok(value) => {
                self.values[row] = *value;
                Ok(())
            }
            Err(value) => Err(StorageError::TypeMismatch {
                expected: TypeId::of::<T>(),
                expected_name: type_name::<T>(),
                actual: value.as_ref().type_id(),
            }),
        }
    }

    fn swap_remove(&mut self, row: usize) {
        self.values.swap_remove(row);
    }

    fn move_row_into(
        &mut self,
        destination: &mut dyn Column,
        row: usize,
    ) -> Result<(), StorageError> {
        let actual = destination.element_type_id();
        let destination = destination
            .as_any_mut()
            .downcast_mut::<TypedColumn<T>>()
            .ok_or(StorageError::TypeMismatch {
                expected: TypeId::of::<T>(),
                expected_name: type_name::<T>(),
                actual,
            })?;
        let value = self.values.swap_remove(row);
        destination.values.push(value);
        Ok(())
    }
}

/// Fixed-capacity column storage for one archetype's rows.
///
/// Owns one erased column per data fragment in the signature plus the entity
/// id column. Capacity is fixed at construction and identical across all
/// columns.
pub struct Chunk {
    capacity: usize,
    entities: Vec<Entity>,
    columns: Vec<(FragmentId, Box<dyn Column>)>,
}

impl Chunk {
    /// Creates an empty chunk with storage for each data fragment in `layout`.
    ///
    /// `layout` must be sorted by fragment id and contain only descriptors
    /// with column storage.
    pub fn new(capacity: usize, layout: &[FragmentDesc]) -> Self {
        let columns = layout
            .iter()
            .map(|desc| (desc.fragment_id, make_empty_column(desc.fragment_id, capacity)))
            .collect();
        Self {
            capacity,
            entities: Vec::with_capacity(capacity),
            columns,
        }
    }

    /// Returns the fixed row capacity of this chunk.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of occupied rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no rows are occupied.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns `true` if every row is occupied.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.entities.len() == self.capacity
    }

    /// Returns the owning entity ids, one per occupied row.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Returns the erased column for `fragment_id`, if present.
    #[inline]
    pub fn column_by_id(&self, fragment_id: FragmentId) -> Option<&dyn Column> {
        self.columns
            .binary_search_by_key(&fragment_id, |(id, _)| *id)
            .ok()
            .map(|i| self.columns[i].1.as_ref())
    }

    /// Returns the erased column for `fragment_id` mutably, if present.
    #[inline]
    pub fn column_mut_by_id(&mut self, fragment_id: FragmentId) -> Option<&mut dyn Column> {
        match self.columns.binary_search_by_key(&fragment_id, |(id, _)| *id) {
            Ok(i) => Some(self.columns[i].1.as_mut()),
            Err(_) => None,
        }
    }

    /// Returns a typed read-only view of the column storing `T`, sliced to the
    /// occupied rows.
    pub fn column_slice<T: Send + Sync + 'static>(&self) -> Option<&[T]> {
        let wanted = TypeId::of::<T>();
        self.columns
            .iter()
            .find(|(_, column)| column.element_type_id() == wanted)
            .and_then(|(_, column)| column.as_any().downcast_ref::<TypedColumn<T>>())
            .map(TypedColumn::as_slice)
    }

    /// Returns a typed mutable view of the column storing `T`, sliced to the
    /// occupied rows.
    pub fn column_slice_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut [T]> {
        let wanted = TypeId::of::<T>();
        self.columns
            .iter_mut()
            .find(|(_, column)| column.element_type_id() == wanted)
            .and_then(|(_, column)| column.as_any_mut().downcast_mut::<TypedColumn<T>>())
            .map(TypedColumn::as_mut_slice)
    }

    /// Appends a full row, taking one value per column from `values`.
    ///
    /// On any failure the chunk is restored to its prior state before the
    /// error is returned, so columns never misalign.
    pub fn push_row(
        &mut self,
        entity: Entity,
        values: &mut impl FnMut(FragmentId) -> Option<Box<dyn Any + Send + Sync>>,
    ) -> Result<RowId, StorageError> {
        if self.is_full() {
            return Err(StorageError::ChunkFull { capacity: self.capacity });
        }

        let row = self.entities.len();
        let mut written = 0usize;
        for i in 0..self.columns.len() {
            let fragment_id = self.columns[i].0;
            let name = self.columns[i].1.element_type_name();
            let Some(value) = values(fragment_id) else {
                self.roll_back_row(row, written);
                return Err(StorageError::MissingValue { name });
            };
            if let Err(e) = self.columns[i].1.push_erased(value) {
                self.roll_back_row(row, written);
                return Err(e);
            }
            written += 1;
        }

        self.entities.push(entity);
        Ok(row as RowId)
    }

    fn roll_back_row(&mut self, row: usize, written: usize) {
        for (_, column) in self.columns.iter_mut().take(written) {
            column.swap_remove(row);
        }
    }

    /// Appends only the entity id row.
    ///
    /// Used by archetype migration, which fills the fragment columns
    /// individually before recording the entity; callers must have pushed
    /// exactly one value into every column first.
    pub(crate) fn push_entity(&mut self, entity: Entity) {
        debug_assert!(!self.is_full());
        self.entities.push(entity);
    }

    /// Swap-removes only the entity id row.
    ///
    /// Counterpart of [`Chunk::push_entity`] for migration, where the fragment
    /// columns have already been moved out or dropped individually. Returns
    /// the entity moved into the freed slot, if any.
    pub(crate) fn swap_remove_entity(&mut self, row: usize) -> Option<Entity> {
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }

    /// Removes the row at `row` by swap-remove within this chunk.
    ///
    /// Returns the entity that was moved into the freed slot, if the removed
    /// row was not the chunk's last occupied row.
    pub fn swap_remove_row(&mut self, row: RowId) -> Result<Option<Entity>, StorageError> {
        let row = row as usize;
        if row >= self.entities.len() {
            return Err(StorageError::PositionOutOfBounds {
                row: row as RowId,
                occupied: self.entities.len(),
            });
        }
        for (_, column) in self.columns.iter_mut() {
            column.swap_remove(row);
        }
        self.entities.swap_remove(row);
        Ok(self.entities.get(row).copied())
    }
}

/// A temporary, untracked view over one chunk's rows for query iteration.
///
/// The view yields the entity id column and typed fragment columns sliced to
/// the occupied rows. Column views are stable until the next structural
/// mutation; consumers must not retain them across a command-buffer replay.
///
/// ## Safety
///
/// `ChunkView` hands out column borrows through a raw pointer so that a single
/// view can yield several columns at once. The scheduler's declared-access
/// discipline is what makes this sound:
///
/// - at most one mutable view may exist per fragment column at a time,
/// - processors obtain views only for fragments in their declared access sets,
/// - structural mutation never happens while any view exists.
///
/// Violating these constraints is undefined behavior, exactly as for the
/// engine's other discipline-enforced access paths.
pub struct ChunkView<'a> {
    chunk: *mut Chunk,
    _marker: PhantomData<&'a mut Chunk>,
}

impl<'a> ChunkView<'a> {
    pub(crate) fn new(chunk: &'a mut Chunk) -> Self {
        Self { chunk, _marker: PhantomData }
    }

    /// Returns the number of occupied rows in the chunk.
    #[inline]
    pub fn len(&self) -> usize {
        unsafe { (*self.chunk).len() }
    }

    /// Returns `true` if the chunk holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the owning entity ids, one per occupied row.
    #[inline]
    pub fn entities(&self) -> &'a [Entity] {
        unsafe { (*self.chunk).entities() }
    }

    /// Returns a read-only column view for `T`, or `None` if the archetype
    /// lacks it (absent optional fragment, tag, or shared fragment).
    #[inline]
    pub fn column<T: Send + Sync + 'static>(&self) -> Option<&'a [T]> {
        unsafe { (*self.chunk).column_slice::<T>() }
    }

    /// Returns a mutable column view for `T`, or `None` if the archetype
    /// lacks it.
    ///
    /// At most one mutable view per column may exist at a time; see the type
    /// documentation.
    #[inline]
    pub fn column_mut<T: Send + Sync + 'static>(&self) -> Option<&'a mut [T]> {
        unsafe { (*self.chunk).column_slice_mut::<T>() }
    }
}
