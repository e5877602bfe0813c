//! Processor abstraction: the unit of scheduled logic.
//!
//! A **processor** consumes a query's results once per scheduling phase. The
//! contract is capability-shaped, not inheritance-shaped: any type providing
//! `configure` and `run` plus its declared access and ordering as plain data
//! is a processor. The runner uses the declarations to compute, once per
//! phase layout, which processors may share a parallel layer.
//!
//! Processors never mutate structure directly during a run; they record into
//! the [`CommandBuffer`] handed to them through [`PassContext`], which the
//! runner replays at the phase barrier.

use crate::engine::commands::CommandBuffer;
use crate::engine::error::EngineResult;
use crate::engine::manager::EngineRef;
use crate::engine::query::Query;
use crate::engine::resource::{ResourceId, ResourceRegistry};
use crate::engine::types::AccessSets;

/// Declared access of one processor: fragment sets, external resources, and
/// the synchronization-context requirement.
#[derive(Clone, Debug, Default)]
pub struct ProcessorAccess {
    /// Fragment read/write sets.
    pub sets: AccessSets,
    /// External resources touched, by resolved identity.
    pub resources: Vec<ResourceId>,
    /// Whether the processor must run on the designated synchronization
    /// context.
    pub needs_sync_context: bool,
}

impl ProcessorAccess {
    /// Builds the declaration from a configured query.
    pub fn from_query(query: &Query) -> Self {
        Self {
            sets: query.access().clone(),
            resources: query.resources().to_vec(),
            needs_sync_context: query.needs_sync_context(),
        }
    }

    /// Returns `true` if two processors with these declarations must not run
    /// concurrently.
    pub fn conflicts_with(&self, other: &ProcessorAccess) -> bool {
        if self.needs_sync_context && other.needs_sync_context {
            return true;
        }
        if self.resources.iter().any(|r| other.resources.contains(r)) {
            return true;
        }
        self.sets.conflicts_with(&other.sets)
    }
}

/// Per-run context handed to a processor.
///
/// Owns the processor's command buffer for the pass; commands recorded here
/// are appended in the processor's own execution order and replayed at the
/// phase barrier in scheduler-defined cross-processor order.
#[derive(Default)]
pub struct PassContext {
    commands: CommandBuffer,
}

impl PassContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the processor's command buffer for this pass.
    pub fn commands(&mut self) -> &mut CommandBuffer {
        &mut self.commands
    }

    pub(crate) fn into_commands(self) -> CommandBuffer {
        self.commands
    }
}

/// A unit of scheduled logic operating on the world.
///
/// Implementations must be `Send + Sync` so layers of compatible processors
/// can execute on worker threads.
pub trait Processor: Send + Sync {
    /// Returns the processor's unique name within its phase.
    fn name(&self) -> &str;

    /// Configures queries and resolves resources; called once at schedule
    /// build time.
    fn configure(&mut self, resources: &ResourceRegistry) -> EngineResult<()> {
        let _ = resources;
        Ok(())
    }

    /// Returns the declared access used for conflict analysis.
    fn access(&self) -> ProcessorAccess;

    /// Names of processors this one must run before, within the same phase.
    fn before(&self) -> &[&str] {
        &[]
    }

    /// Names of processors this one must run after, within the same phase.
    fn after(&self) -> &[&str] {
        &[]
    }

    /// Executes the processor logic against the world.
    fn run(&self, world: EngineRef<'_>, ctx: &mut PassContext) -> EngineResult<()>;
}

/// A [`Processor`] backed by a function or closure.
///
/// The preferred form for logic that needs no configuration state: declare
/// the access up front and hand over a closure.
pub struct FnProcessor<F>
where
    F: Fn(EngineRef<'_>, &mut PassContext) -> EngineResult<()> + Send + Sync + 'static,
{
    name: &'static str,
    access: ProcessorAccess,
    before: Vec<&'static str>,
    after: Vec<&'static str>,
    f: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(EngineRef<'_>, &mut PassContext) -> EngineResult<()> + Send + Sync + 'static,
{
    /// Creates a function-backed processor.
    pub fn new(name: &'static str, access: ProcessorAccess, f: F) -> Self {
        Self { name, access, before: Vec::new(), after: Vec::new(), f }
    }

    /// Declares that this processor runs before `other`.
    pub fn run_before(mut self, other: &'static str) -> Self {
        self.before.push(other);
        self
    }

    /// Declares that this processor runs after `other`.
    pub fn run_after(mut self, other: &'static str) -> Self {
        self.after.push(other);
        self
    }
}

impl<F> Processor for FnProcessor<F>
where
    F: Fn(EngineRef<'_>, &mut PassContext) -> EngineResult<()> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn access(&self) -> ProcessorAccess {
        self.access.clone()
    }

    fn before(&self) -> &[&str] {
        &self.before
    }

    fn after(&self) -> &[&str] {
        &self.after
    }

    fn run(&self, world: EngineRef<'_>, ctx: &mut PassContext) -> EngineResult<()> {
        (self.f)(world, ctx)
    }
}
