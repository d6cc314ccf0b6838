//! # Chunk Requests
//!
//! A [`ChunkRequest`] is the requestor's side of a pipeline goal. Coalesced
//! requests for the same position and target share one signal, so every
//! waiter observes the same outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use loam_procedural::{ChunkPos, ChunkState};
use parking_lot::{Condvar, Mutex};

use crate::error::PipelineError;

/// Stage a requestor wants a chunk brought to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetStage {
    /// Local content generated.
    Generated,
    /// Post-processed and visible.
    Complete,
    /// Complete and compacted.
    Deflated,
}

impl TargetStage {
    /// Chunk state that satisfies this target.
    #[must_use]
    pub const fn state(self) -> ChunkState {
        match self {
            Self::Generated => ChunkState::Generated,
            Self::Complete => ChunkState::Complete,
            Self::Deflated => ChunkState::Deflated,
        }
    }
}

/// How a request ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The chunk reached (at least) the target; carries its state.
    Reached(ChunkState),
    /// The position is absent (out of bounds or evicted).
    Absent,
    /// The request failed.
    Failed(PipelineError),
    /// The request was cancelled.
    Cancelled,
}

/// Signal for request completion.
pub(crate) struct RequestSignal {
    outcome: Mutex<Option<RequestOutcome>>,
    ready: Condvar,
}

impl RequestSignal {
    pub(crate) fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn resolved(outcome: RequestOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(Some(outcome)),
            ready: Condvar::new(),
        })
    }

    /// First resolution wins.
    pub(crate) fn resolve(&self, outcome: RequestOutcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.ready.notify_all();
        }
    }
}

/// Handle to an outstanding chunk request.
#[derive(Clone)]
pub struct ChunkRequest {
    pos: ChunkPos,
    target: TargetStage,
    coalesced: bool,
    signal: Arc<RequestSignal>,
}

impl ChunkRequest {
    pub(crate) fn new(
        pos: ChunkPos,
        target: TargetStage,
        coalesced: bool,
        signal: Arc<RequestSignal>,
    ) -> Self {
        Self {
            pos,
            target,
            coalesced,
            signal,
        }
    }

    /// Requested position.
    #[must_use]
    pub const fn position(&self) -> ChunkPos {
        self.pos
    }

    /// Requested target.
    #[must_use]
    pub const fn target(&self) -> TargetStage {
        self.target
    }

    /// Whether this request joined one already outstanding.
    #[must_use]
    pub const fn is_coalesced(&self) -> bool {
        self.coalesced
    }

    /// Blocks until the request is resolved.
    #[must_use]
    pub fn wait(&self) -> RequestOutcome {
        let mut slot = self.signal.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.signal.ready.wait(&mut slot);
        }
    }

    /// Waits up to `timeout`. `None` if still unresolved.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<RequestOutcome> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.signal.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return Some(outcome.clone());
            }
            if self.signal.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.clone();
            }
        }
    }

    /// Outcome if already resolved.
    #[must_use]
    pub fn try_outcome(&self) -> Option<RequestOutcome> {
        self.signal.outcome.lock().clone()
    }

    /// Returns true if already resolved.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.signal.outcome.lock().is_some()
    }
}

impl std::fmt::Debug for ChunkRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkRequest")
            .field("pos", &self.pos)
            .field("target", &self.target)
            .field("coalesced", &self.coalesced)
            .field("done", &self.is_done())
            .finish()
    }
}
