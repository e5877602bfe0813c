//! # Fragment Engine
//!
//! Archetype-based entity storage and execution engine.
//!
//! Entities are grouped by the exact composition of their fragments into
//! archetypes with chunked, column-oriented storage. Processors iterate
//! matching subsets through cached queries, optionally in parallel, and defer
//! structural mutation through command buffers replayed at phase barriers.
//!
//! ## Design goals
//! - Archetype storage for cache efficiency
//! - Deterministic, conflict-aware scheduling
//! - Parallel execution with explicit, declared data access
//! - Structural safety via log-then-replay mutation

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::manager::{Engine, EngineRef, EntityManager};

pub use engine::types::{
    AccessSets, ArchetypeId, ChunkId, Entity, EntityLocation, FragmentId, RowId, Signature,
};

pub use engine::fragment::{
    fragment_id_of, freeze_fragments, register_fragment, register_shared_fragment,
    try_fragment_id_of, Bundle, Fragment,
};

pub use engine::archetype::ChunkPolicy;
pub use engine::chunk::ChunkView;

pub use engine::query::{Query, QueryBuilder};

pub use engine::commands::{CommandBuffer, PendingEntity, Target};

pub use engine::observer::{FragmentOp, ObserverId};
pub use engine::shared::SharedKey;
pub use engine::signal::{SignalBus, SignalToken};

pub use engine::processor::{FnProcessor, PassContext, Processor, ProcessorAccess};
pub use engine::resource::{ResourceId, ResourceRegistry};
pub use engine::schedule::{PhaseId, Schedule};

pub use engine::error::{
    EngineError, EngineResult, MoveError, QueryError, ScheduleError, SpawnError, StorageError,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used engine types.
///
/// Import with:
/// ```rust
/// use fragment_engine::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        fragment_id_of, freeze_fragments, register_fragment, register_shared_fragment, Bundle,
        CommandBuffer, Engine, EngineRef, EntityManager, Entity, FnProcessor, Fragment,
        FragmentOp, PassContext, Processor, ProcessorAccess, Query, QueryBuilder,
        ResourceRegistry, Schedule,
    };
}
