//! Deferred structural mutation log.
//!
//! Structural changes — creation, destruction, composition edits — invalidate
//! chunk views and row indices, so processors never apply them mid-iteration.
//! Instead they record commands into a [`CommandBuffer`], which the runner
//! replays at the phase barrier once every worker has finished.
//!
//! ## Targets
//!
//! An op targets either a live handle or a placeholder minted by a `create`
//! recorded earlier in the same buffer, so one pass can build an entity and
//! immediately configure it.
//!
//! ## Replay semantics
//!
//! Replay applies ops strictly in recorded order. Before each op the target's
//! liveness is validated; ops against entities destroyed earlier in the same
//! replay are dropped silently — destroy wins, double-destroy included, and
//! no error is raised. After the op loop, observers fire batched once per
//! unique `(fragment, operation)` pair covering every entity affected in the
//! pass.

use std::any::Any;

use fxhash::FxHashSet;
use tracing::trace;

use crate::engine::error::EngineResult;
use crate::engine::fragment::{fragment_id_of, Bundle, Fragment};
use crate::engine::manager::EntityManager;
use crate::engine::observer::{FragmentOp, ObserverBatch};
use crate::engine::types::{Entity, FragmentId};

/// Placeholder id for an entity created earlier in the same buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingEntity(u32);

/// Target of a deferred op: a resolved handle or an in-buffer placeholder.
#[derive(Clone, Copy, Debug)]
pub enum Target {
    /// An entity that already existed when the op was recorded.
    Live(Entity),
    /// An entity created by an earlier op in the same buffer.
    Pending(PendingEntity),
}

impl From<Entity> for Target {
    fn from(entity: Entity) -> Self {
        Target::Live(entity)
    }
}

impl From<PendingEntity> for Target {
    fn from(pending: PendingEntity) -> Self {
        Target::Pending(pending)
    }
}

enum CommandOp {
    Create { pending: PendingEntity, bundle: Bundle },
    Destroy { target: Target },
    AddFragment { target: Target, fragment_id: FragmentId, value: Box<dyn Any + Send + Sync> },
    RemoveFragment { target: Target, fragment_id: FragmentId },
    AddTag { target: Target, fragment_id: FragmentId },
    RemoveTag { target: Target, fragment_id: FragmentId },
    SetShared { target: Target, fragment_id: FragmentId, value: Box<dyn Any + Send + Sync> },
}

/// Ordered log of deferred structural mutations.
#[derive(Default)]
pub struct CommandBuffer {
    ops: Vec<CommandOp>,
    next_pending: u32,
}

impl CommandBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of recorded ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Records entity creation, returning a placeholder usable as the target
    /// of later ops in this buffer.
    pub fn create(&mut self, bundle: Bundle) -> PendingEntity {
        let pending = PendingEntity(self.next_pending);
        self.next_pending += 1;
        self.ops.push(CommandOp::Create { pending, bundle });
        pending
    }

    /// Records entity destruction.
    pub fn destroy(&mut self, target: impl Into<Target>) {
        self.ops.push(CommandOp::Destroy { target: target.into() });
    }

    /// Records addition of a `T` fragment holding `value`.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn add_fragment<T: Fragment>(&mut self, target: impl Into<Target>, value: T) {
        self.ops.push(CommandOp::AddFragment {
            target: target.into(),
            fragment_id: fragment_id_of::<T>(),
            value: Box::new(value),
        });
    }

    /// Records removal of the `T` fragment.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn remove_fragment<T: Fragment>(&mut self, target: impl Into<Target>) {
        self.ops.push(CommandOp::RemoveFragment {
            target: target.into(),
            fragment_id: fragment_id_of::<T>(),
        });
    }

    /// Records addition of tag `T`.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn add_tag<T: Fragment>(&mut self, target: impl Into<Target>) {
        self.ops.push(CommandOp::AddTag {
            target: target.into(),
            fragment_id: fragment_id_of::<T>(),
        });
    }

    /// Records removal of tag `T`.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn remove_tag<T: Fragment>(&mut self, target: impl Into<Target>) {
        self.ops.push(CommandOp::RemoveTag {
            target: target.into(),
            fragment_id: fragment_id_of::<T>(),
        });
    }

    /// Records assignment to a fresh shared value group holding `value`.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn set_shared_fragment<T: Fragment>(&mut self, target: impl Into<Target>, value: T) {
        self.ops.push(CommandOp::SetShared {
            target: target.into(),
            fragment_id: fragment_id_of::<T>(),
            value: Box::new(value),
        });
    }

    /// Appends every op of `other`, remapping its placeholders past ours.
    ///
    /// Used by the runner to merge per-processor buffers into one replay pass
    /// in scheduler-defined order; same-buffer op order is preserved.
    pub fn append(&mut self, mut other: CommandBuffer) {
        let offset = self.next_pending;
        for op in &mut other.ops {
            match op {
                CommandOp::Create { pending, .. } => pending.0 += offset,
                CommandOp::Destroy { target }
                | CommandOp::AddFragment { target, .. }
                | CommandOp::RemoveFragment { target, .. }
                | CommandOp::AddTag { target, .. }
                | CommandOp::RemoveTag { target, .. }
                | CommandOp::SetShared { target, .. } => {
                    if let Target::Pending(pending) = target {
                        pending.0 += offset;
                    }
                }
            }
        }
        self.next_pending += other.next_pending;
        self.ops.append(&mut other.ops);
    }

    /// Replays every recorded op against the world in recorded order, then
    /// fires observers batched per `(fragment, operation)` pair.
    ///
    /// Ops whose target was destroyed earlier in this replay — or was already
    /// stale — are dropped silently.
    pub fn flush(&mut self, world: &mut EntityManager) -> EngineResult<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let op_count = self.ops.len();

        let mut resolved: Vec<Option<Entity>> = vec![None; self.next_pending as usize];
        let mut destroyed: FxHashSet<Entity> = FxHashSet::default();
        let mut batch = ObserverBatch::new();

        for op in self.ops.drain(..) {
            match op {
                CommandOp::Create { pending, bundle } => {
                    let signature = bundle.signature();
                    let entity = world.create_entity(bundle)?;
                    resolved[pending.0 as usize] = Some(entity);
                    for fragment_id in signature.iter() {
                        batch.record(fragment_id, FragmentOp::Added, entity);
                    }
                }
                CommandOp::Destroy { target } => {
                    let Some(entity) = resolve(target, &resolved, &destroyed) else {
                        continue;
                    };
                    if world.destroy_entity(entity) {
                        destroyed.insert(entity);
                    }
                }
                CommandOp::AddFragment { target, fragment_id, value } => {
                    let Some(entity) = resolve(target, &resolved, &destroyed) else {
                        continue;
                    };
                    world.add_fragment_erased(entity, fragment_id, Some(value), &mut batch)?;
                }
                CommandOp::RemoveFragment { target, fragment_id }
                | CommandOp::RemoveTag { target, fragment_id } => {
                    let Some(entity) = resolve(target, &resolved, &destroyed) else {
                        continue;
                    };
                    world.remove_fragment_erased(entity, fragment_id, &mut batch)?;
                }
                CommandOp::AddTag { target, fragment_id } => {
                    let Some(entity) = resolve(target, &resolved, &destroyed) else {
                        continue;
                    };
                    world.add_fragment_erased(entity, fragment_id, None, &mut batch)?;
                }
                CommandOp::SetShared { target, fragment_id, value } => {
                    let Some(entity) = resolve(target, &resolved, &destroyed) else {
                        continue;
                    };
                    world.set_shared_erased(entity, fragment_id, value, &mut batch)?;
                }
            }
        }

        self.next_pending = 0;
        trace!(ops = op_count, destroyed = destroyed.len(), "replayed command buffer");

        batch.dispatch(world.observers());
        Ok(())
    }
}

fn resolve(
    target: Target,
    resolved: &[Option<Entity>],
    destroyed: &FxHashSet<Entity>,
) -> Option<Entity> {
    let entity = match target {
        Target::Live(entity) => entity,
        Target::Pending(pending) => resolved.get(pending.0 as usize).copied().flatten()?,
    };
    if destroyed.contains(&entity) {
        return None;
    }
    Some(entity)
}
