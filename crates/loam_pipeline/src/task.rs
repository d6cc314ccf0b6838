//! # Pipeline Tasks
//!
//! A task is one unit of work bound to a position (or to a footprint homed at
//! one position). It runs on a worker thread, talks only to the provider and
//! the generator, and reports a [`TaskOutcome`]. Deciding what runs next is
//! the pipeline's job, never the task's.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use loam_procedural::{
    Block, Chunk, ChunkGenerator, ChunkPos, ChunkState, Footprint, GeneratorError, WorldAccess,
};
use parking_lot::MutexGuard;

use crate::error::PipelineError;
use crate::provider::{ChunkProvider, SharedChunk};

/// Pipeline stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// First-pass local generation.
    Generate,
    /// Cross-chunk finishing.
    PostProcess,
    /// Memory compaction.
    Deflate,
}

impl Stage {
    /// Queue priority; higher runs first.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Generate => 2,
            Self::PostProcess => 1,
            Self::Deflate => 0,
        }
    }

    /// State a chunk reaches when this stage succeeds.
    #[must_use]
    pub const fn produces(self) -> ChunkState {
        match self {
            Self::Generate => ChunkState::Generated,
            Self::PostProcess => ChunkState::Complete,
            Self::Deflate => ChunkState::Deflated,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Generate => "generate",
            Self::PostProcess => "post-process",
            Self::Deflate => "deflate",
        })
    }
}

/// What a task needs to run.
#[derive(Clone)]
pub struct TaskContext {
    /// Chunk storage.
    pub provider: Arc<dyn ChunkProvider>,
    /// Content generator.
    pub generator: Arc<dyn ChunkGenerator>,
}

/// Result of enacting a task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The chunk is now in this state.
    Completed(ChunkState),
    /// The provider had no chunk; nothing was done.
    Absent,
    /// The task was aborted.
    Failed(PipelineError),
}

impl TaskOutcome {
    fn from_error(err: PipelineError) -> Self {
        match err {
            PipelineError::ChunkAbsent(_) => Self::Absent,
            other => Self::Failed(other),
        }
    }
}

/// One unit of pipeline work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkTask {
    /// Generate a chunk's local content.
    Generate {
        /// Target position.
        pos: ChunkPos,
    },
    /// Post-process a chunk with its neighbors.
    PostProcess {
        /// Home chunk and the neighbors it may touch.
        footprint: Footprint,
    },
    /// Compact a finished chunk.
    Deflate {
        /// Target position.
        pos: ChunkPos,
    },
}

impl ChunkTask {
    /// Home position.
    #[must_use]
    pub fn pos(&self) -> ChunkPos {
        match self {
            Self::Generate { pos } | Self::Deflate { pos } => *pos,
            Self::PostProcess { footprint } => footprint.home(),
        }
    }

    /// Stage this task performs.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Generate { .. } => Stage::Generate,
            Self::PostProcess { .. } => Stage::PostProcess,
            Self::Deflate { .. } => Stage::Deflate,
        }
    }

    /// Every position this task reserves.
    #[must_use]
    pub fn positions(&self) -> Vec<ChunkPos> {
        match self {
            Self::Generate { pos } | Self::Deflate { pos } => vec![*pos],
            Self::PostProcess { footprint } => footprint.positions(),
        }
    }

    /// Runs the task.
    #[must_use]
    pub fn enact(&self, ctx: &TaskContext) -> TaskOutcome {
        tracing::debug!("enacting {} for {}", self.stage(), self.pos());
        match self {
            Self::Generate { pos } => generate(ctx, *pos),
            Self::PostProcess { footprint } => post_process(ctx, footprint),
            Self::Deflate { pos } => deflate(ctx, *pos),
        }
    }
}

fn precondition(pos: ChunkPos, stage: Stage, state: ChunkState) -> TaskOutcome {
    let err = PipelineError::PreconditionViolated { pos, stage, state };
    tracing::error!("{err}");
    TaskOutcome::Failed(err)
}

fn panicked(pos: ChunkPos) -> GeneratorError {
    GeneratorError::Failed {
        pos,
        reason: "generator panicked".to_string(),
    }
}

fn generate(ctx: &TaskContext, pos: ChunkPos) -> TaskOutcome {
    let Some(shared) = ctx.provider.get_chunk_for_processing(pos) else {
        return TaskOutcome::Absent;
    };
    let mut chunk = shared.lock();

    let state = chunk.state();
    if state == ChunkState::Evicted {
        return TaskOutcome::Absent;
    }
    if state.has_reached(ChunkState::Generated) {
        return TaskOutcome::Completed(state);
    }
    if state != ChunkState::Unloaded {
        return precondition(pos, Stage::Generate, state);
    }

    if let Err(e) = ctx.provider.request_transition(&mut chunk, ChunkState::Generating) {
        return TaskOutcome::from_error(e);
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| ctx.generator.generate_chunk(&mut chunk)))
        .unwrap_or_else(|_| Err(panicked(pos)));

    match result {
        Ok(()) => match ctx.provider.request_transition(&mut chunk, ChunkState::Generated) {
            Ok(()) => TaskOutcome::Completed(ChunkState::Generated),
            Err(e) => TaskOutcome::from_error(e),
        },
        Err(source) => {
            tracing::error!("generate failed at {pos}: {source}");
            if let Err(e) = ctx.provider.rollback(&mut chunk, ChunkState::Unloaded) {
                tracing::error!("rollback failed at {pos}: {e}");
            }
            TaskOutcome::Failed(PipelineError::Generator { pos, source })
        }
    }
}

/// A block as it was before a post-process write.
struct Undo {
    slot: usize,
    local: (usize, usize, usize),
    previous: Block,
}

/// World view over a locked footprint. Records every write so a failed pass
/// can be taken back.
struct FootprintWorld<'a, 'g> {
    /// Sorted by position.
    guards: &'a mut [(ChunkPos, MutexGuard<'g, Chunk>)],
    journal: Vec<Undo>,
}

impl<'a, 'g> FootprintWorld<'a, 'g> {
    fn new(guards: &'a mut [(ChunkPos, MutexGuard<'g, Chunk>)]) -> Self {
        Self {
            guards,
            journal: Vec::new(),
        }
    }

    fn slot(&self, pos: ChunkPos) -> Option<usize> {
        self.guards.binary_search_by_key(&pos, |(p, _)| *p).ok()
    }

    /// Restores every written block, newest first. Returns the write count.
    fn undo(self) -> usize {
        let Self { guards, journal } = self;
        let count = journal.len();
        for entry in journal.into_iter().rev() {
            let (x, y, z) = entry.local;
            let _ = guards[entry.slot].1.set_block(x, y, z, entry.previous);
        }
        count
    }
}

impl WorldAccess for FootprintWorld<'_, '_> {
    fn block(&self, wx: i32, wy: i32, wz: i32) -> Option<Block> {
        let idx = self.slot(ChunkPos::containing(wx, wy, wz))?;
        let (x, y, z) = ChunkPos::local_of(wx, wy, wz);
        self.guards[idx].1.block(x, y, z).ok()
    }

    fn set_block(&mut self, wx: i32, wy: i32, wz: i32, block: Block) -> bool {
        let Some(idx) = self.slot(ChunkPos::containing(wx, wy, wz)) else {
            return false;
        };
        let (x, y, z) = ChunkPos::local_of(wx, wy, wz);
        let chunk = &mut self.guards[idx].1;
        let Ok(previous) = chunk.block(x, y, z) else {
            return false;
        };
        if chunk.set_block(x, y, z, block).is_err() {
            return false;
        }
        self.journal.push(Undo {
            slot: idx,
            local: (x, y, z),
            previous,
        });
        true
    }

    fn chunk_state(&self, pos: ChunkPos) -> Option<ChunkState> {
        let idx = self.slot(pos)?;
        Some(self.guards[idx].1.state())
    }
}

fn post_process(ctx: &TaskContext, footprint: &Footprint) -> TaskOutcome {
    let home = footprint.home();

    // Handles first, then locks in sorted order.
    let mut handles: Vec<(ChunkPos, SharedChunk)> = Vec::with_capacity(footprint.len());
    for pos in footprint.positions() {
        match ctx.provider.get_chunk_for_processing(pos) {
            Some(shared) => handles.push((pos, shared)),
            None if pos == home => return TaskOutcome::Absent,
            None => {}
        }
    }

    let mut guards: Vec<(ChunkPos, MutexGuard<'_, Chunk>)> =
        handles.iter().map(|(pos, shared)| (*pos, shared.lock())).collect();
    // Neighbors evicted while we waited for their locks drop out of the view.
    guards.retain(|(pos, chunk)| *pos == home || chunk.state() != ChunkState::Evicted);

    let Ok(home_idx) = guards.binary_search_by_key(&home, |(p, _)| *p) else {
        return TaskOutcome::Absent;
    };

    let home_state = guards[home_idx].1.state();
    if home_state == ChunkState::Evicted {
        return TaskOutcome::Absent;
    }
    if home_state.has_reached(ChunkState::Complete) {
        return TaskOutcome::Completed(home_state);
    }
    if home_state != ChunkState::Generated {
        return precondition(home, Stage::PostProcess, home_state);
    }
    for (pos, chunk) in &guards {
        if !chunk.state().has_reached(ChunkState::Generated) {
            return precondition(*pos, Stage::PostProcess, chunk.state());
        }
    }

    if let Err(e) = ctx
        .provider
        .request_transition(&mut guards[home_idx].1, ChunkState::PostProcessing)
    {
        return TaskOutcome::from_error(e);
    }

    let mut world = FootprintWorld::new(&mut guards);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        ctx.generator.post_process_chunk(home, &mut world)
    }))
    .unwrap_or_else(|_| Err(panicked(home)));
    if result.is_err() {
        let undone = world.undo();
        tracing::debug!("reverted {undone} post-process write(s) around {home}");
    }

    let home_chunk = &mut guards[home_idx].1;
    match result {
        Ok(()) => match ctx.provider.request_transition(home_chunk, ChunkState::Complete) {
            Ok(()) => TaskOutcome::Completed(ChunkState::Complete),
            Err(e) => TaskOutcome::from_error(e),
        },
        Err(source) => {
            tracing::error!("post-process failed at {home}: {source}");
            if let Err(e) = ctx.provider.rollback(home_chunk, ChunkState::Generated) {
                tracing::error!("rollback failed at {home}: {e}");
            }
            TaskOutcome::Failed(PipelineError::Generator { pos: home, source })
        }
    }
}

fn deflate(ctx: &TaskContext, pos: ChunkPos) -> TaskOutcome {
    let Some(shared) = ctx.provider.get_chunk_for_processing(pos) else {
        return TaskOutcome::Absent;
    };
    let mut chunk = shared.lock();

    let state = chunk.state();
    match state {
        ChunkState::Evicted => TaskOutcome::Absent,
        ChunkState::Deflated => TaskOutcome::Completed(state),
        ChunkState::Complete => {
            match ctx.provider.request_transition(&mut chunk, ChunkState::Deflated) {
                Ok(()) => TaskOutcome::Completed(ChunkState::Deflated),
                Err(e) => TaskOutcome::from_error(e),
            }
        }
        _ => precondition(pos, Stage::Deflate, state),
    }
}
