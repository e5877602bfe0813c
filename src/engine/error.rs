//! Error types for storage, spawning, migration, queries, and scheduling.
//!
//! Each layer of the engine reports failures through a small dedicated enum
//! carrying enough context to make the failure actionable: offending ids,
//! expected-versus-actual positions, capacity pairs. Higher-level code uses
//! `?` to bubble them into the aggregate [`EngineError`].
//!
//! Stale or destroyed entity handles are deliberately **not** errors: every
//! public operation on a stale handle is a silent no-op. The types here cover
//! configuration mistakes (unknown fragment in a query, cyclic processor
//! ordering) and internal invariant violations (misaligned columns, broken
//! entity metadata), none of which are process-fatal.

use std::any::TypeId;

use thiserror::Error;

use crate::engine::types::{ChunkId, FragmentId, RowId};

/// Errors raised by column and chunk storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A value's dynamic type did not match the column's element type.
    #[error("type mismatch: column stores {expected_name}, value was {actual:?}")]
    TypeMismatch {
        /// Column's declared element type.
        expected: TypeId,
        /// Human-readable name of the column's element type.
        expected_name: &'static str,
        /// Provided value's dynamic type.
        actual: TypeId,
    },

    /// A row index addressed storage outside the occupied range.
    #[error("row {row} out of bounds (occupied {occupied})")]
    PositionOutOfBounds {
        /// Row index that was addressed.
        row: RowId,
        /// Number of occupied rows in the addressed chunk.
        occupied: usize,
    },

    /// A push was attempted against a chunk that is already at capacity.
    #[error("chunk is full (capacity {capacity})")]
    ChunkFull {
        /// Fixed capacity of the chunk.
        capacity: usize,
    },

    /// A row initializer supplied no value for a required column.
    #[error("missing value for fragment {name}")]
    MissingValue {
        /// Human-readable fragment type name.
        name: &'static str,
    },
}

/// Errors raised while creating entities.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The entity index cannot grow to hold the requested entities.
    #[error("entity limit reached ({needed} needed; capacity {capacity})")]
    Capacity {
        /// Total entities the operation attempted to allocate.
        needed: u64,
        /// Current capacity limiting the operation.
        capacity: u64,
    },

    /// A required fragment value was missing from the initializer.
    #[error("missing fragment value: {name}")]
    MissingFragment {
        /// Human-readable fragment type name.
        name: &'static str,
    },

    /// A batch initializer produced a bundle with a different signature than
    /// the first row of the batch.
    #[error("batch initializer changed signature at row {row}")]
    SignatureMismatch {
        /// Row index whose bundle disagreed.
        row: usize,
    },

    /// Underlying column storage rejected a value.
    #[error("storage push failed: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised while migrating an entity between archetypes.
///
/// These indicate internal inconsistencies rather than recoverable user-facing
/// failures; the manager surfaces them instead of corrupting storage.
#[derive(Debug, Error)]
pub enum MoveError {
    /// A column required by the migration was missing from an archetype.
    #[error("fragment {fragment_id} column missing during migration")]
    MissingColumn {
        /// Fragment whose column was absent.
        fragment_id: FragmentId,
    },

    /// A destination-only fragment had no value supplied.
    #[error("no value supplied for added fragment {fragment_id}")]
    MissingAddedValue {
        /// Fragment that required a value.
        fragment_id: FragmentId,
    },

    /// Columns disagreed on the destination row.
    #[error("fragment {fragment_id} misaligned: expected {expected:?}, got {got:?}")]
    RowMisalignment {
        /// Expected `(chunk, row)` position.
        expected: (ChunkId, RowId),
        /// Actual `(chunk, row)` encountered.
        got: (ChunkId, RowId),
        /// Fragment whose column was misaligned.
        fragment_id: FragmentId,
    },

    /// Entity metadata could not be updated consistently after the move.
    #[error("entity metadata out of sync after row move")]
    MetadataFailure,

    /// Underlying column storage failed during the move.
    #[error("storage failure during migration: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised while building a query.
///
/// Surfaced once at configuration time, never evaluated per entity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// A fragment type named by the query was never registered.
    #[error("unknown fragment type in query: {name}")]
    UnknownFragment {
        /// Rust type name of the unregistered fragment.
        name: &'static str,
    },

    /// A fragment appeared in both the read and write sets.
    #[error("fragment {fragment_id} declared both read and write")]
    ReadAndWrite {
        /// Offending fragment.
        fragment_id: FragmentId,
    },

    /// A declared external resource could not be resolved.
    #[error("unknown external resource: {name}")]
    UnknownResource {
        /// Name that failed to resolve.
        name: String,
    },
}

/// Errors raised while building a schedule layout.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// A before/after declaration referenced a processor not in the phase.
    #[error("ordering constraint references unknown processor {name:?}")]
    UnknownProcessor {
        /// Referenced processor name.
        name: String,
    },

    /// Explicit ordering declarations form a cycle.
    #[error("processor ordering cycle involving {name:?}")]
    OrderingCycle {
        /// A processor participating in the cycle.
        name: String,
    },

    /// Two processors in one phase registered under the same name.
    #[error("duplicate processor name {name:?} in phase")]
    DuplicateName {
        /// Duplicated name.
        name: String,
    },
}

/// Aggregate error for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Entity creation failed.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// Archetype migration failed.
    #[error(transparent)]
    Move(#[from] MoveError),

    /// Query configuration failed.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Schedule construction failed.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Column or chunk storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// An internal invariant was violated.
    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Convenience alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;
