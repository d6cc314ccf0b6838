//! # Generation Pipeline
//!
//! Brings chunk positions to a requested stage with a fixed pool of workers.
//!
//! ## Per-position state machine
//!
//! ```text
//! NOT_SCHEDULED -> QUEUED(stage) -> RUNNING(stage) -> next QUEUED | done
//! ```
//!
//! ## Guarantees
//!
//! - **Single-flight**: at most one task per position, queued or running. A
//!   post-process task reserves its whole footprint.
//! - **Stage ordering**: post-processing for P is queued only once P and all
//!   available footprint neighbors are `GENERATED`; deflation only once P is
//!   `COMPLETE`. Missing neighbors get generate goals of their own.
//! - **Isolation**: a failing chunk fails its own waiters (and the
//!   post-processing that needed it), never the workers.
//!
//! - **Stable compaction**: deflation of P also waits until no unfinished
//!   post-process goal has P in its footprint.
//!
//! All scheduling state sits behind one mutex. A completion releases its
//! reservations and re-evaluates only the positions it affected (its own
//! positions and the goals watching them) in the same critical section.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use loam_procedural::{ChunkGenerator, ChunkPos, ChunkState, Footprint};
use parking_lot::{Condvar, Mutex};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::provider::ChunkProvider;
use crate::request::{ChunkRequest, RequestOutcome, RequestSignal, TargetStage};
use crate::task::{ChunkTask, Stage, TaskContext, TaskOutcome};

/// Scheduling status of one position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStatus {
    /// No task queued or running for this position.
    NotScheduled,
    /// A task for this position is waiting for a worker.
    Queued(Stage),
    /// A task for this position is running.
    Running(Stage),
    /// The position is held by another chunk's post-process footprint.
    Reserved {
        /// Home of the reserving task.
        home: ChunkPos,
        /// Stage of the reserving task.
        stage: Stage,
    },
}

/// Pipeline notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A stage finished; the chunk is now in `state`.
    StageCompleted {
        /// Chunk position.
        pos: ChunkPos,
        /// Stage that ran.
        stage: Stage,
        /// Resulting state.
        state: ChunkState,
    },
    /// A task found its chunk absent and did nothing.
    TaskSkipped {
        /// Chunk position.
        pos: ChunkPos,
        /// Stage that was skipped.
        stage: Stage,
    },
    /// A task failed.
    TaskFailed {
        /// Chunk position.
        pos: ChunkPos,
        /// Stage that failed.
        stage: Stage,
        /// Failure.
        error: PipelineError,
    },
}

/// Pipeline counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Generate tasks executed.
    pub generated: u64,
    /// Post-process tasks executed.
    pub post_processed: u64,
    /// Deflate tasks executed.
    pub deflated: u64,
    /// Tasks that found their chunk absent.
    pub skipped: u64,
    /// Tasks that failed.
    pub failed: u64,
    /// Requests that joined an outstanding one.
    pub coalesced: u64,
    /// Requests cancelled.
    pub cancelled: u64,
    /// Events dropped because the channel was full.
    pub events_dropped: u64,
}

struct Reservation {
    home: ChunkPos,
    stage: Stage,
    running: bool,
}

/// Queue entry: higher stage priority first, then FIFO.
struct QueuedTask {
    priority: u8,
    seq: u64,
    task: ChunkTask,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Waiter {
    target: TargetStage,
    signal: Arc<RequestSignal>,
}

/// What some requestor (or a dependent post-process) needs for a position.
struct Goal {
    target: ChunkState,
    waiters: Vec<Waiter>,
    /// Footprint positions registered in `Scheduler::watchers`. Empty unless
    /// the target needs post-processing.
    watching: Vec<ChunkPos>,
}

impl Goal {
    fn new(target: ChunkState) -> Self {
        Self {
            target,
            waiters: Vec::new(),
            watching: Vec::new(),
        }
    }

    fn resolve_all(self, outcome: &RequestOutcome) {
        for waiter in self.waiters {
            waiter.signal.resolve(outcome.clone());
        }
    }
}

#[derive(Default)]
struct Scheduler {
    in_flight: HashMap<ChunkPos, Reservation>,
    queue: BinaryHeap<QueuedTask>,
    goals: HashMap<ChunkPos, Goal>,
    /// Position -> homes of post-process goals whose footprint contains it.
    watchers: HashMap<ChunkPos, HashSet<ChunkPos>>,
    /// Positions to re-evaluate on the next pump.
    dirty: Vec<ChunkPos>,
    next_seq: u64,
    closed: bool,
    stats: PipelineStats,
}

impl Scheduler {
    /// Registers `home`'s goal as depending on every footprint position.
    fn watch(&mut self, home: ChunkPos, footprint: &Footprint) {
        let Some(goal) = self.goals.get_mut(&home) else {
            return;
        };
        if !goal.watching.is_empty() {
            return;
        }
        goal.watching = footprint.positions();
        for pos in &goal.watching {
            self.watchers.entry(*pos).or_default().insert(home);
        }
    }

    /// Removes a goal and its watches. Positions it watched become dirty.
    fn remove_goal(&mut self, pos: ChunkPos) -> Option<Goal> {
        let goal = self.goals.remove(&pos)?;
        for watched in &goal.watching {
            if let Some(homes) = self.watchers.get_mut(watched) {
                homes.remove(&pos);
                if homes.is_empty() {
                    self.watchers.remove(watched);
                }
            }
            self.dirty.push(*watched);
        }
        self.dirty.push(pos);
        Some(goal)
    }

    /// Marks `positions` and every goal watching them dirty.
    fn touch(&mut self, positions: &[ChunkPos]) {
        for pos in positions {
            self.dirty.push(*pos);
            if let Some(homes) = self.watchers.get(pos) {
                self.dirty.extend(homes.iter().copied());
            }
        }
    }

    /// Whether a goal other than `pos`'s own still has to post-process a
    /// footprint containing `pos`.
    fn mutation_pending(&self, provider: &dyn ChunkProvider, pos: ChunkPos) -> bool {
        let Some(homes) = self.watchers.get(&pos) else {
            return false;
        };
        homes.iter().any(|&home| {
            home != pos
                && self
                    .goals
                    .get(&home)
                    .is_some_and(|g| g.target.has_reached(ChunkState::Complete))
                && !provider
                    .chunk_state(home)
                    .unwrap_or(ChunkState::Unloaded)
                    .has_reached(ChunkState::Complete)
        })
    }
}

struct Shared {
    scheduler: Mutex<Scheduler>,
    work_ready: Condvar,
    ctx: TaskContext,
    events: Sender<PipelineEvent>,
}

/// Multi-threaded staged chunk generation.
pub struct GenerationPipeline {
    shared: Arc<Shared>,
    events: Receiver<PipelineEvent>,
    workers: Vec<JoinHandle<()>>,
}

impl GenerationPipeline {
    /// Starts the pipeline and its worker threads.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the config fails validation or a worker thread
    /// cannot be spawned.
    pub fn new(
        config: &PipelineConfig,
        provider: Arc<dyn ChunkProvider>,
        generator: Arc<dyn ChunkGenerator>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let (tx, rx) = crossbeam_channel::bounded(config.event_capacity);

        let shared = Arc::new(Shared {
            scheduler: Mutex::new(Scheduler::default()),
            work_ready: Condvar::new(),
            ctx: TaskContext {
                provider,
                generator,
            },
            events: tx,
        });

        let count = config.resolved_workers();
        let mut pipeline = Self {
            shared,
            events: rx,
            workers: Vec::with_capacity(count),
        };
        for i in 0..count {
            let worker_shared = Arc::clone(&pipeline.shared);
            let handle = thread::Builder::new()
                .name(format!("loam-gen-{i}"))
                .spawn(move || worker_loop(&worker_shared))
                .map_err(|e| PipelineError::InvalidConfig(format!("failed to spawn worker: {e}")))?;
            pipeline.workers.push(handle);
        }

        tracing::info!("generation pipeline started with {count} workers");
        Ok(pipeline)
    }

    /// Asks for `pos` to be brought to `target`.
    ///
    /// Resolves immediately if the position is absent or already there. A
    /// request for the same position and target as an outstanding one shares
    /// its outcome.
    pub fn request_chunk(&self, pos: ChunkPos, target: TargetStage) -> ChunkRequest {
        if !self.shared.ctx.provider.is_available(pos) {
            return ChunkRequest::new(pos, target, false, RequestSignal::resolved(RequestOutcome::Absent));
        }

        let mut guard = self.shared.scheduler.lock();
        let sched = &mut *guard;
        if sched.closed {
            return ChunkRequest::new(
                pos,
                target,
                false,
                RequestSignal::resolved(RequestOutcome::Failed(PipelineError::ShutDown)),
            );
        }

        let goal = sched
            .goals
            .entry(pos)
            .or_insert_with(|| Goal::new(target.state()));
        goal.target = goal.target.max(target.state());
        let needs_watch = goal.target.has_reached(ChunkState::Complete) && goal.watching.is_empty();

        let existing = goal
            .waiters
            .iter()
            .find(|w| w.target == target)
            .map(|w| Arc::clone(&w.signal));
        let request = if let Some(signal) = existing {
            sched.stats.coalesced += 1;
            ChunkRequest::new(pos, target, true, signal)
        } else {
            let signal = Arc::new(RequestSignal::new());
            goal.waiters.push(Waiter {
                target,
                signal: Arc::clone(&signal),
            });
            ChunkRequest::new(pos, target, false, signal)
        };

        if needs_watch {
            let footprint = self.shared.ctx.generator.footprint(pos);
            sched.watch(pos, &footprint);
        }
        sched.dirty.push(pos);
        self.shared.pump(sched);
        request
    }

    /// Cancels every request for `pos` and drops its queued (not running)
    /// work. Neighbor generate goals raised only on behalf of `pos` are
    /// dropped with it. Returns true if anything was cancelled.
    pub fn cancel(&self, pos: ChunkPos) -> bool {
        let mut guard = self.shared.scheduler.lock();
        let sched = &mut *guard;
        let mut cancelled = false;
        let mut abandoned: HashSet<ChunkPos> = HashSet::from([pos]);

        if let Some(goal) = sched.remove_goal(pos) {
            sched.stats.cancelled += goal.waiters.len() as u64;
            // Prerequisites nobody else waits for or watches.
            for &neighbor in &goal.watching {
                let orphaned = neighbor != pos
                    && !sched.watchers.contains_key(&neighbor)
                    && sched.goals.get(&neighbor).is_some_and(|g| g.waiters.is_empty());
                if orphaned {
                    let _ = sched.remove_goal(neighbor);
                    abandoned.insert(neighbor);
                }
            }
            goal.resolve_all(&RequestOutcome::Cancelled);
            cancelled = true;
        }

        let before = sched.queue.len();
        let mut dropped = Vec::new();
        sched.queue.retain(|q| {
            let keep = !abandoned.contains(&q.task.pos());
            if !keep {
                dropped.push(q.task.clone());
            }
            keep
        });
        for task in &dropped {
            release(sched, task);
            sched.touch(&task.positions());
        }
        if sched.queue.len() != before {
            tracing::warn!("cancelled {} queued task(s) for {pos}", dropped.len());
            cancelled = true;
        }

        self.shared.pump(sched);
        cancelled
    }

    /// Scheduling status of `pos`.
    #[must_use]
    pub fn status(&self, pos: ChunkPos) -> PipelineStatus {
        let sched = self.shared.scheduler.lock();
        match sched.in_flight.get(&pos) {
            None => PipelineStatus::NotScheduled,
            Some(r) if r.home != pos => PipelineStatus::Reserved {
                home: r.home,
                stage: r.stage,
            },
            Some(r) if r.running => PipelineStatus::Running(r.stage),
            Some(r) => PipelineStatus::Queued(r.stage),
        }
    }

    /// Receiver for pipeline events.
    #[must_use]
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events.clone()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.shared.scheduler.lock().stats.clone()
    }

    /// Number of tasks waiting for a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.scheduler.lock().queue.len()
    }

    /// Number of positions with unfinished goals.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.scheduler.lock().goals.len()
    }

    /// The provider this pipeline drives.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn ChunkProvider> {
        &self.shared.ctx.provider
    }

    /// Stops accepting work, fails outstanding requests and joins workers.
    pub fn shutdown(&mut self) {
        {
            let mut sched = self.shared.scheduler.lock();
            if !sched.closed {
                sched.closed = true;
                sched.queue.clear();
                let failed = RequestOutcome::Failed(PipelineError::ShutDown);
                for (_, goal) in sched.goals.drain() {
                    goal.resolve_all(&failed);
                }
                sched.watchers.clear();
                sched.dirty.clear();
            }
            self.shared.work_ready.notify_all();
        }

        let joined = self.workers.len();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if joined > 0 {
            tracing::info!("generation pipeline stopped");
        }
    }
}

impl Drop for GenerationPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Removes the reservations a task holds.
fn release(sched: &mut Scheduler, task: &ChunkTask) {
    let home = task.pos();
    for pos in task.positions() {
        if sched.in_flight.get(&pos).is_some_and(|r| r.home == home) {
            sched.in_flight.remove(&pos);
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut sched = shared.scheduler.lock();
            loop {
                if sched.closed {
                    return;
                }
                if let Some(next) = sched.queue.pop() {
                    if let Some(r) = sched.in_flight.get_mut(&next.task.pos()) {
                        r.running = true;
                    }
                    break next.task;
                }
                shared.work_ready.wait(&mut sched);
            }
        };

        let outcome = task.enact(&shared.ctx);

        let mut sched = shared.scheduler.lock();
        shared.complete(&mut sched, &task, outcome);
    }
}

impl Shared {
    fn emit(&self, sched: &mut Scheduler, event: PipelineEvent) {
        if self.events.try_send(event).is_err() {
            sched.stats.events_dropped += 1;
        }
    }

    fn complete(&self, sched: &mut Scheduler, task: &ChunkTask, outcome: TaskOutcome) {
        release(sched, task);
        sched.touch(&task.positions());
        let pos = task.pos();
        let stage = task.stage();

        match outcome {
            TaskOutcome::Completed(state) => {
                match stage {
                    Stage::Generate => sched.stats.generated += 1,
                    Stage::PostProcess => sched.stats.post_processed += 1,
                    Stage::Deflate => sched.stats.deflated += 1,
                }
                self.emit(sched, PipelineEvent::StageCompleted { pos, stage, state });
            }
            TaskOutcome::Absent => {
                sched.stats.skipped += 1;
                tracing::warn!("{stage} skipped: chunk {pos} absent");
                self.emit(sched, PipelineEvent::TaskSkipped { pos, stage });
            }
            TaskOutcome::Failed(error) => {
                sched.stats.failed += 1;
                self.emit(
                    sched,
                    PipelineEvent::TaskFailed {
                        pos,
                        stage,
                        error: error.clone(),
                    },
                );
                if let Some(goal) = sched.remove_goal(pos) {
                    goal.resolve_all(&RequestOutcome::Failed(error));
                }
                if stage == Stage::Generate {
                    self.fail_dependents(sched, pos);
                }
            }
        }

        self.pump(sched);
    }

    /// Fails every unfinished post-process goal whose footprint needs
    /// `failed`.
    fn fail_dependents(&self, sched: &mut Scheduler, failed: ChunkPos) {
        let provider = &self.ctx.provider;
        let dependents: Vec<ChunkPos> = sched
            .watchers
            .get(&failed)
            .into_iter()
            .flatten()
            .copied()
            .filter(|pos| {
                let state = provider.chunk_state(*pos).unwrap_or(ChunkState::Unloaded);
                !state.has_reached(ChunkState::Complete)
            })
            .collect();

        for pos in dependents {
            if let Some(goal) = sched.remove_goal(pos) {
                tracing::error!("post-process for {pos} abandoned: neighbor {failed} failed");
                goal.resolve_all(&RequestOutcome::Failed(PipelineError::NeighborFailed {
                    pos,
                    neighbor: failed,
                }));
            }
        }
    }

    fn enqueue(&self, sched: &mut Scheduler, task: ChunkTask) {
        let home = task.pos();
        let stage = task.stage();
        for pos in task.positions() {
            sched.in_flight.insert(
                pos,
                Reservation {
                    home,
                    stage,
                    running: false,
                },
            );
        }
        let seq = sched.next_seq;
        sched.next_seq += 1;
        sched.queue.push(QueuedTask {
            priority: stage.priority(),
            seq,
            task,
        });
        self.work_ready.notify_one();
    }

    /// Makes every scheduling decision the dirty positions allow.
    fn pump(&self, sched: &mut Scheduler) {
        if sched.closed {
            sched.dirty.clear();
            return;
        }
        let mut work = std::mem::take(&mut sched.dirty);
        let mut seen: HashSet<ChunkPos> = HashSet::with_capacity(work.len());
        while let Some(pos) = work.pop() {
            if !seen.insert(pos) {
                continue;
            }
            let raised = self.advance(sched, pos);
            // New goals and positions dirtied by goal removals get another look.
            for again in raised.into_iter().chain(sched.dirty.drain(..)) {
                seen.remove(&again);
                work.push(again);
            }
        }
    }

    /// Advances one goal. Returns neighbor positions that got new goals.
    fn advance(&self, sched: &mut Scheduler, pos: ChunkPos) -> Vec<ChunkPos> {
        let provider = &self.ctx.provider;
        if !sched.goals.contains_key(&pos) {
            return Vec::new();
        }

        if !provider.is_available(pos) {
            if let Some(goal) = sched.remove_goal(pos) {
                goal.resolve_all(&RequestOutcome::Absent);
            }
            return Vec::new();
        }
        let state = provider.chunk_state(pos).unwrap_or(ChunkState::Unloaded);

        let Some(goal) = sched.goals.get_mut(&pos) else {
            return Vec::new();
        };
        goal.waiters.retain(|w| {
            if state.has_reached(w.target.state()) {
                w.signal.resolve(RequestOutcome::Reached(state));
                false
            } else {
                true
            }
        });
        let target = goal.target;
        if state.has_reached(target) {
            let _ = sched.remove_goal(pos);
            return Vec::new();
        }
        if sched.in_flight.contains_key(&pos) {
            return Vec::new();
        }

        if !state.has_reached(ChunkState::Generated) {
            self.enqueue(sched, ChunkTask::Generate { pos });
            return Vec::new();
        }
        if state.has_reached(ChunkState::Complete) {
            if !sched.mutation_pending(&**provider, pos) {
                self.enqueue(sched, ChunkTask::Deflate { pos });
            }
            return Vec::new();
        }

        let footprint = self.ctx.generator.footprint(pos);
        let mut raised = Vec::new();
        let mut ready = true;
        for &neighbor in footprint.neighbors() {
            if !provider.is_available(neighbor) {
                continue;
            }
            let ns = provider.chunk_state(neighbor).unwrap_or(ChunkState::Unloaded);
            if ns.has_reached(ChunkState::Generated) {
                continue;
            }
            ready = false;
            let entry = sched.goals.entry(neighbor).or_insert_with(|| {
                raised.push(neighbor);
                Goal::new(ChunkState::Generated)
            });
            if entry.target < ChunkState::Generated {
                entry.target = ChunkState::Generated;
            }
        }
        if !ready {
            return raised;
        }

        let blocked = footprint
            .positions()
            .iter()
            .any(|p| sched.in_flight.contains_key(p));
        if !blocked {
            self.enqueue(sched, ChunkTask::PostProcess { footprint });
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldBounds;
    use crate::provider::GeneratingChunkProvider;

    fn queued(priority: Stage, seq: u64) -> QueuedTask {
        QueuedTask {
            priority: priority.priority(),
            seq,
            task: ChunkTask::Generate {
                pos: ChunkPos::new(seq as i32, 0, 0),
            },
        }
    }

    #[test]
    fn test_queue_orders_by_stage_then_fifo() {
        let mut heap = BinaryHeap::new();
        heap.push(queued(Stage::Deflate, 0));
        heap.push(queued(Stage::PostProcess, 1));
        heap.push(queued(Stage::Generate, 2));
        heap.push(queued(Stage::Generate, 3));
        heap.push(queued(Stage::PostProcess, 4));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|q| q.seq)).collect();
        assert_eq!(order, vec![2, 3, 1, 4, 0]);
    }

    #[test]
    fn test_watch_index_follows_goals() {
        let mut sched = Scheduler::default();
        let home = ChunkPos::new(0, 0, 0);
        let east = home.offset(1, 0, 0);
        sched.goals.insert(home, Goal::new(ChunkState::Complete));
        sched.watch(home, &Footprint::neighborhood(home, 1));
        assert!(sched.watchers[&east].contains(&home));

        // A change at a neighbor re-evaluates the goal watching it.
        sched.touch(&[east]);
        assert_eq!(sched.dirty, vec![east, home]);
        sched.dirty.clear();

        let goal = sched.remove_goal(home).unwrap();
        assert_eq!(goal.watching.len(), 27);
        assert!(sched.watchers.is_empty());
        assert_eq!(sched.dirty.len(), 28);
    }

    #[test]
    fn test_deflate_held_while_neighbor_post_process_pending() {
        let provider = GeneratingChunkProvider::new(WorldBounds::unbounded());
        let home = ChunkPos::new(0, 0, 0);
        let east = home.offset(1, 0, 0);

        let mut sched = Scheduler::default();
        sched.goals.insert(east, Goal::new(ChunkState::Complete));
        sched.watch(east, &Footprint::neighborhood(east, 1));
        assert!(sched.mutation_pending(&provider, home));
        // A goal never holds its own chunk.
        assert!(!sched.mutation_pending(&provider, east));
        assert!(!sched.mutation_pending(&provider, home.offset(-1, 0, 0)));

        let shared = provider.get_chunk_for_processing(east).unwrap();
        {
            let mut chunk = shared.lock();
            for state in [
                ChunkState::Generating,
                ChunkState::Generated,
                ChunkState::PostProcessing,
                ChunkState::Complete,
            ] {
                provider.request_transition(&mut chunk, state).unwrap();
            }
        }
        assert!(!sched.mutation_pending(&provider, home));
    }
}
