//! Phase-based processor scheduling and execution.
//!
//! Work is partitioned into ordered phases. Within a phase, processors form a
//! partial order from their explicit before/after declarations plus implicit
//! conflicts: two processors that write the same fragment, share an external
//! resource, or both require the synchronization context are serialized.
//! Everything else may run concurrently on worker threads.
//!
//! ## Layout
//!
//! [`Schedule::build`] computes each phase's layout exactly once:
//!
//! 1. explicit edges are layered topologically (cycles are a build error),
//! 2. within each topological level, processors are grouped greedily into
//!    conflict-free layers, in registration order for determinism,
//! 3. processors needing the synchronization context are split out of the
//!    parallel group and run serially on the calling thread.
//!
//! ## Barriers
//!
//! The only synchronization point is the command-buffer replay at the phase
//! boundary: all workers finish, the per-processor buffers are merged in
//! scheduler-defined order and replayed once, observers fire batched, and
//! all previously taken chunk views are invalid. After the last phase of a
//! run, undrained signals are discarded.

use fxhash::FxHashMap;
use rayon::prelude::*;
use tracing::debug;

use crate::engine::commands::CommandBuffer;
use crate::engine::error::{EngineResult, ScheduleError};
use crate::engine::manager::Engine;
use crate::engine::processor::{PassContext, Processor};
use crate::engine::resource::ResourceRegistry;

/// Identifies one phase within a schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseId(usize);

/// A group of mutually compatible processors, executed together.
struct Layer {
    /// Indices of processors safe to run concurrently.
    parallel: Vec<usize>,
    /// Indices of sync-context processors, run serially after the parallel
    /// group.
    sync: Vec<usize>,
}

struct Phase {
    name: String,
    processors: Vec<Box<dyn Processor>>,
    layout: Vec<Layer>,
}

/// Ordered phases of processors plus their computed execution layout.
#[derive(Default)]
pub struct Schedule {
    phases: Vec<Phase>,
    built: bool,
}

impl Schedule {
    /// Creates an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a phase; phases execute in the order added.
    pub fn add_phase(&mut self, name: &str) -> PhaseId {
        self.phases.push(Phase {
            name: name.to_owned(),
            processors: Vec::new(),
            layout: Vec::new(),
        });
        self.built = false;
        PhaseId(self.phases.len() - 1)
    }

    /// Registers a processor in the given phase.
    pub fn add_processor(&mut self, phase: PhaseId, processor: impl Processor + 'static) {
        self.phases[phase.0].processors.push(Box::new(processor));
        self.built = false;
    }

    /// Returns the number of execution layers computed for `phase`.
    ///
    /// Meaningful after [`Schedule::build`]; conflicting processors land in
    /// separate layers, compatible ones share one.
    pub fn phase_layers(&self, phase: PhaseId) -> usize {
        self.phases[phase.0].layout.len()
    }

    /// Configures every processor and computes each phase's layout.
    ///
    /// Must be called before [`Schedule::run`]; calling `run` on an unbuilt
    /// schedule builds it with an empty resource registry.
    pub fn build(&mut self, resources: &ResourceRegistry) -> EngineResult<()> {
        for phase in &mut self.phases {
            for processor in &mut phase.processors {
                processor.configure(resources)?;
            }
            phase.layout = layout_phase(&phase.name, &phase.processors)?;
            debug!(
                phase = phase.name.as_str(),
                processors = phase.processors.len(),
                layers = phase.layout.len(),
                "built phase layout"
            );
        }
        self.built = true;
        Ok(())
    }

    /// Executes one full pass over every phase.
    ///
    /// Each layer's compatible processors run concurrently; at every phase
    /// boundary the recorded commands are replayed and observers fire. After
    /// the final phase, undrained signals are discarded.
    pub fn run(&mut self, engine: &Engine) -> EngineResult<()> {
        if !self.built {
            self.build(&ResourceRegistry::new())?;
        }

        for phase in &self.phases {
            let mut pass_commands = CommandBuffer::new();

            for layer in &phase.layout {
                let processors = &phase.processors;

                let parallel_buffers: Vec<EngineResult<CommandBuffer>> = layer
                    .parallel
                    .par_iter()
                    .map(|&index| {
                        let mut ctx = PassContext::new();
                        processors[index].run(engine.world_ref(), &mut ctx)?;
                        Ok(ctx.into_commands())
                    })
                    .collect();

                for buffer in parallel_buffers {
                    pass_commands.append(buffer?);
                }

                // sync-context processors run serially on this thread
                for &index in &layer.sync {
                    let mut ctx = PassContext::new();
                    processors[index].run(engine.world_ref(), &mut ctx)?;
                    pass_commands.append(ctx.into_commands());
                }
            }

            // phase barrier: replay structural changes, fire observers
            pass_commands.flush(engine.world_ref().data_mut())?;
        }

        engine.world_ref().data().signals().end_cycle();
        Ok(())
    }
}

/// Computes the layered layout of one phase.
fn layout_phase(
    phase_name: &str,
    processors: &[Box<dyn Processor>],
) -> Result<Vec<Layer>, ScheduleError> {
    let mut name_to_index: FxHashMap<&str, usize> = FxHashMap::default();
    for (index, processor) in processors.iter().enumerate() {
        if name_to_index.insert(processor.name(), index).is_some() {
            return Err(ScheduleError::DuplicateName { name: processor.name().to_owned() });
        }
    }

    // explicit before/after edges, as predecessor counts + successor lists
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); processors.len()];
    let mut predecessors: Vec<usize> = vec![0; processors.len()];
    for (index, processor) in processors.iter().enumerate() {
        for &other in processor.before() {
            let to = *name_to_index
                .get(other)
                .ok_or_else(|| ScheduleError::UnknownProcessor { name: other.to_owned() })?;
            successors[index].push(to);
            predecessors[to] += 1;
        }
        for &other in processor.after() {
            let from = *name_to_index
                .get(other)
                .ok_or_else(|| ScheduleError::UnknownProcessor { name: other.to_owned() })?;
            successors[from].push(index);
            predecessors[index] += 1;
        }
    }

    // Kahn layering: each level holds processors whose predecessors are done
    let mut remaining = processors.len();
    let mut ready: Vec<usize> = (0..processors.len()).filter(|&i| predecessors[i] == 0).collect();
    let mut layers = Vec::new();

    while !ready.is_empty() {
        ready.sort_unstable();
        remaining -= ready.len();
        let level_members = std::mem::take(&mut ready);

        // greedy conflict-free grouping within the level, registration order
        let mut level = level_members.clone();
        while !level.is_empty() {
            let mut layer = Layer { parallel: Vec::new(), sync: Vec::new() };
            let mut deferred = Vec::new();
            let mut accesses = Vec::new();

            for index in level.drain(..) {
                let access = processors[index].access();
                let conflict = accesses.iter().any(|a| access.conflicts_with(a));
                if conflict {
                    deferred.push(index);
                    continue;
                }
                if access.needs_sync_context {
                    layer.sync.push(index);
                } else {
                    layer.parallel.push(index);
                }
                accesses.push(access);
            }

            layers.push(layer);
            level = deferred;
        }

        // the level is complete: release its successors
        for &index in &level_members {
            for &next in &successors[index] {
                predecessors[next] -= 1;
                if predecessors[next] == 0 {
                    ready.push(next);
                }
            }
        }
    }

    if remaining > 0 {
        let name = processors
            .iter()
            .enumerate()
            .find(|(i, _)| predecessors[*i] > 0)
            .map(|(_, p)| p.name().to_owned())
            .unwrap_or_else(|| phase_name.to_owned());
        return Err(ScheduleError::OrderingCycle { name });
    }

    Ok(layers)
}
