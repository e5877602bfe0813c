//! Archetypes and the deduplicating archetype table.
//!
//! An [`Archetype`] stores every entity sharing one exact signature, as an
//! ordered collection of fixed-capacity [`Chunk`]s. The [`ArchetypeTable`] is
//! the single authority mapping signatures to archetypes: lookup-or-create is
//! memoizing, so a signature resolves to the same archetype for the lifetime
//! of the world and creation races are impossible by construction.
//!
//! ## Chunk policy
//!
//! Chunk capacity is fixed per archetype at construction. The row byte width
//! (entity id plus every data fragment) divides a cache-friendly byte budget,
//! clamped to a sane row range, so wide signatures get proportionally fewer
//! rows per chunk. Emptied chunks are pooled in place and reused before any
//! new chunk is allocated; pooling never affects addressing, because chunks
//! are never removed from the list.
//!
//! ## Migration
//!
//! [`Archetype::move_row_to`] transfers one entity's row to another archetype
//! when its composition changes: fragments present on both sides move value
//! by value, destination-only fragments consume supplied values, source-only
//! fragments are dropped with the source row's swap-remove. All columns must
//! agree on the destination row; disagreement is an internal invariant
//! violation, surfaced as [`MoveError::RowMisalignment`].

use std::any::Any;
use std::collections::VecDeque;

use fxhash::FxHashMap;
use tracing::debug;

use crate::engine::chunk::Chunk;
use crate::engine::error::{EngineError, EngineResult, MoveError, StorageError};
use crate::engine::fragment::{fragment_desc, FragmentDesc};
use crate::engine::types::{
    ArchetypeId, ChunkId, Entity, FragmentId, RowId, Signature, SIGNATURE_WORDS,
};

/// Sizing policy for chunk capacity.
#[derive(Clone, Copy, Debug)]
pub struct ChunkPolicy {
    /// Byte budget targeted by one chunk, entity-id column included.
    pub chunk_byte_budget: usize,
    /// Lower bound on rows per chunk.
    pub min_rows: usize,
    /// Upper bound on rows per chunk.
    pub max_rows: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            chunk_byte_budget: 32 * 1024,
            min_rows: 16,
            max_rows: 4096,
        }
    }
}

impl ChunkPolicy {
    /// Computes the chunk capacity for an archetype with the given row width.
    pub fn capacity_for(&self, row_bytes: usize) -> usize {
        (self.chunk_byte_budget / row_bytes.max(1)).clamp(self.min_rows, self.max_rows)
    }
}

/// Stores every entity sharing one exact fragment/tag signature.
pub struct Archetype {
    id: ArchetypeId,
    signature: Signature,
    /// Data fragments with column storage, sorted by id.
    layout: Vec<FragmentDesc>,
    capacity: usize,
    chunks: Vec<Chunk>,
    /// Emptied chunks available for reuse before new allocation, oldest first.
    pooled: VecDeque<ChunkId>,
    /// Current append target.
    cursor: Option<ChunkId>,
    len: usize,
}

impl Archetype {
    /// Creates an empty archetype for `signature`.
    ///
    /// Every fragment id in the signature must be registered; data fragments
    /// define the chunk layout, tags and shared fragments contribute only
    /// signature bits.
    pub fn new(id: ArchetypeId, signature: Signature, policy: &ChunkPolicy) -> EngineResult<Self> {
        let mut layout = Vec::new();
        let mut row_bytes = std::mem::size_of::<Entity>();
        for fragment_id in signature.iter() {
            let desc = fragment_desc(fragment_id).ok_or_else(|| {
                EngineError::Internal(format!("unregistered fragment id {fragment_id} in signature"))
            })?;
            if desc.has_column() {
                row_bytes += desc.size;
                layout.push(desc);
            }
        }

        Ok(Self {
            id,
            signature,
            layout,
            capacity: policy.capacity_for(row_bytes),
            chunks: Vec::new(),
            pooled: VecDeque::new(),
            cursor: None,
            len: 0,
        })
    }

    /// Returns this archetype's identifier.
    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Returns this archetype's signature.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Returns `true` if the signature contains `fragment_id`.
    #[inline]
    pub fn has(&self, fragment_id: FragmentId) -> bool {
        self.signature.has(fragment_id)
    }

    /// Returns the number of live rows across all chunks.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the archetype holds no entities.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the fixed per-chunk row capacity.
    #[inline]
    pub fn chunk_capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of allocated chunks, pooled ones included.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Returns the chunk at `chunk_id`, if allocated.
    #[inline]
    pub fn chunk(&self, chunk_id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(chunk_id as usize)
    }

    /// Returns the chunk at `chunk_id` mutably, if allocated.
    #[inline]
    pub fn chunk_mut(&mut self, chunk_id: ChunkId) -> Option<&mut Chunk> {
        self.chunks.get_mut(chunk_id as usize)
    }

    /// Returns all allocated chunks in creation order.
    #[inline]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Pre-allocates enough chunk capacity for `additional` more rows.
    ///
    /// Used by batch creation to amortize allocation: after this call, that
    /// many appends proceed without allocating.
    pub fn reserve_rows(&mut self, additional: usize) {
        let cursor_space = self
            .cursor
            .and_then(|c| self.chunks.get(c as usize))
            .map(|c| c.capacity() - c.len())
            .unwrap_or(0);
        let appendable = cursor_space + self.pooled.len() * self.capacity;
        if appendable >= additional {
            return;
        }
        let missing = additional - appendable;
        let new_chunks = (missing + self.capacity - 1) / self.capacity;
        for _ in 0..new_chunks {
            let id = self.chunks.len() as ChunkId;
            self.chunks.push(Chunk::new(self.capacity, &self.layout));
            self.pooled.push_back(id);
        }
    }

    /// Returns the chunk id new rows should append into, allocating or
    /// reusing a pooled chunk when the current target is full.
    fn chunk_for_append(&mut self) -> ChunkId {
        if let Some(cursor) = self.cursor {
            if !self.chunks[cursor as usize].is_full() {
                return cursor;
            }
        }
        let id = if let Some(id) = self.pooled.pop_front() {
            id
        } else {
            let id = self.chunks.len() as ChunkId;
            self.chunks.push(Chunk::new(self.capacity, &self.layout));
            id
        };
        self.cursor = Some(id);
        id
    }

    /// Appends a full row, drawing one value per data fragment from `values`.
    pub fn push_row(
        &mut self,
        entity: Entity,
        values: &mut impl FnMut(FragmentId) -> Option<Box<dyn Any + Send + Sync>>,
    ) -> Result<(ChunkId, RowId), StorageError> {
        let chunk_id = self.chunk_for_append();
        let row = self.chunks[chunk_id as usize].push_row(entity, values)?;
        self.len += 1;
        Ok((chunk_id, row))
    }

    /// Removes the row at `(chunk, row)` by swap-remove within that chunk.
    ///
    /// Compaction never crosses chunk boundaries: the freed slot is filled
    /// from the same chunk's tail. Returns the entity moved into the freed
    /// slot, if any. A chunk emptied by the removal is pooled for reuse.
    pub fn swap_remove_row(
        &mut self,
        chunk: ChunkId,
        row: RowId,
    ) -> Result<Option<Entity>, StorageError> {
        let moved = self.chunks[chunk as usize].swap_remove_row(row)?;
        self.len -= 1;
        if self.chunks[chunk as usize].is_empty() && self.cursor != Some(chunk) {
            self.pooled.push_back(chunk);
        }
        Ok(moved)
    }

    /// Moves one entity's row into `destination`, which must have a different
    /// signature.
    ///
    /// Fragments present in both archetypes move value by value; fragments
    /// present only in the destination consume entries from `added`; fragments
    /// present only in the source are dropped by the source row's swap-remove.
    ///
    /// Returns the destination `(chunk, row)` and the source entity moved into
    /// the freed slot, if any.
    pub fn move_row_to(
        &mut self,
        destination: &mut Archetype,
        entity: Entity,
        source: (ChunkId, RowId),
        mut added: Vec<(FragmentId, Box<dyn Any + Send + Sync>)>,
    ) -> Result<((ChunkId, RowId), Option<Entity>), MoveError> {
        let (source_chunk_id, source_row) = source;
        let destination_chunk_id = destination.chunk_for_append();

        let source_chunk = self
            .chunks
            .get_mut(source_chunk_id as usize)
            .ok_or(MoveError::MetadataFailure)?;
        let destination_chunk = destination
            .chunks
            .get_mut(destination_chunk_id as usize)
            .ok_or(MoveError::MetadataFailure)?;

        let destination_row = destination_chunk.len() as RowId;

        for desc in &destination.layout {
            let fragment_id = desc.fragment_id;
            let destination_column = destination_chunk
                .column_mut_by_id(fragment_id)
                .ok_or(MoveError::MissingColumn { fragment_id })?;

            if self.signature.has(fragment_id) {
                // hold a fresh borrow of the source column for this transfer
                let source_column = source_chunk
                    .column_mut_by_id(fragment_id)
                    .ok_or(MoveError::MissingColumn { fragment_id })?;
                source_column.move_row_into(destination_column, source_row as usize)?;
            } else {
                let position = added
                    .iter()
                    .position(|(id, _)| *id == fragment_id)
                    .ok_or(MoveError::MissingAddedValue { fragment_id })?;
                let (_, value) = added.swap_remove(position);
                destination_column.push_erased(value)?;
            }

            let written = destination_chunk
                .column_by_id(fragment_id)
                .map(|c| c.len())
                .unwrap_or(0);
            if written != destination_row as usize + 1 {
                return Err(MoveError::RowMisalignment {
                    expected: (destination_chunk_id, destination_row),
                    got: (destination_chunk_id, written.saturating_sub(1) as RowId),
                    fragment_id,
                });
            }
        }

        // source-only data fragments are dropped with the row removal below
        for desc in &self.layout {
            if !destination.signature.has(desc.fragment_id) {
                let source_column = source_chunk
                    .column_mut_by_id(desc.fragment_id)
                    .ok_or(MoveError::MissingColumn { fragment_id: desc.fragment_id })?;
                source_column.swap_remove(source_row as usize);
            }
        }

        destination_chunk.push_entity(entity);

        // the fragments shared with the destination already swap-removed their
        // rows in move_row_into; finish by removing the entity id row
        let moved = source_chunk.swap_remove_entity(source_row as usize);

        self.len -= 1;
        destination.len += 1;

        if self.chunks[source_chunk_id as usize].is_empty() && self.cursor != Some(source_chunk_id)
        {
            self.pooled.push_back(source_chunk_id);
        }

        Ok(((destination_chunk_id, destination_row), moved))
    }
}

/// Deduplicating registry mapping signatures to archetypes.
///
/// Created lazily: the first entity to reach a signature creates its
/// archetype; archetypes are never destroyed. The table's generation counter
/// increments on every creation so query caches can refresh incrementally.
pub struct ArchetypeTable {
    archetypes: Vec<Archetype>,
    by_signature: FxHashMap<[u64; SIGNATURE_WORDS], ArchetypeId>,
    generation: u64,
    policy: ChunkPolicy,
}

impl ArchetypeTable {
    /// Creates an empty table with the given chunk sizing policy.
    pub fn new(policy: ChunkPolicy) -> Self {
        Self {
            archetypes: Vec::new(),
            by_signature: FxHashMap::default(),
            generation: 0,
            policy,
        }
    }

    /// Returns the id of the archetype for `signature`, if it exists.
    pub fn lookup(&self, signature: &Signature) -> Option<ArchetypeId> {
        self.by_signature.get(&signature.words).copied()
    }

    /// Returns the archetype for `signature`, creating it on first use.
    pub fn lookup_or_create(&mut self, signature: &Signature) -> EngineResult<ArchetypeId> {
        if let Some(&id) = self.by_signature.get(&signature.words) {
            return Ok(id);
        }

        let id = self.archetypes.len() as ArchetypeId;
        let archetype = Archetype::new(id, *signature, &self.policy)?;
        debug!(
            archetype = id,
            capacity = archetype.chunk_capacity(),
            "created archetype"
        );
        self.by_signature.insert(signature.words, id);
        self.archetypes.push(archetype);
        self.generation += 1;
        Ok(id)
    }

    /// Returns the number of archetypes created so far.
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Returns `true` if no archetype has been created yet.
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// Monotonic counter incremented on every archetype creation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the archetype with the given id.
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id as usize)
    }

    /// Returns the archetype with the given id mutably.
    pub fn archetype_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id as usize)
    }

    /// Returns all archetypes in creation order.
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Returns mutable references to two distinct archetypes.
    ///
    /// ## Panics
    /// Panics if `a == b`.
    pub fn pair_mut(&mut self, a: ArchetypeId, b: ArchetypeId) -> (&mut Archetype, &mut Archetype) {
        assert!(a != b, "source and destination archetype must differ");
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.archetypes.split_at_mut(high as usize);
        let left = &mut head[low as usize];
        let right = &mut tail[0];
        if a < b { (left, right) } else { (right, left) }
    }
}
