//! # Chunk Provider
//!
//! The provider owns chunk storage. It hands chunks to tasks, applies their
//! state transitions, and is the only component that changes whether a chunk
//! exists at all.
//!
//! ## Locking
//!
//! Chunks live behind their own `parking_lot::Mutex`. The provider map has a
//! separate lock. Lock order is chunk, then map: the provider never waits for
//! a chunk lock while it holds the map.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use loam_procedural::{Block, Chunk, ChunkPos, ChunkState};
use parking_lot::Mutex;

use crate::config::WorldBounds;
use crate::error::{PipelineError, PipelineResult};

/// A chunk shared between the provider and the task working on it.
pub type SharedChunk = Arc<Mutex<Chunk>>;

/// Storage and lifecycle authority for chunks.
pub trait ChunkProvider: Send + Sync {
    /// Returns the chunk at `pos` for a task to work on.
    ///
    /// A resident chunk is returned in whatever state it is in (re-expanded
    /// first if it was deflated). A position that is not resident yet gets a
    /// reserved `Unloaded` placeholder. `None` means the position is
    /// permanently absent: evicted or outside the world.
    fn get_chunk_for_processing(&self, pos: ChunkPos) -> Option<SharedChunk>;

    /// Validates and applies a forward transition on a locked chunk.
    ///
    /// # Errors
    ///
    /// `ChunkAbsent` if the chunk was evicted meanwhile, `Chunk` if the
    /// lifecycle refuses the edge.
    fn request_transition(&self, chunk: &mut Chunk, to: ChunkState) -> PipelineResult<()>;

    /// Rolls a chunk back after a generator failure.
    ///
    /// # Errors
    ///
    /// `Chunk` if `to` is not a rollback edge from the current state.
    fn rollback(&self, chunk: &mut Chunk, to: ChunkState) -> PipelineResult<()>;

    /// Last applied state of a resident chunk.
    fn chunk_state(&self, pos: ChunkPos) -> Option<ChunkState>;

    /// Whether `pos` can hold a chunk at all.
    fn is_available(&self, pos: ChunkPos) -> bool;
}

/// Provider counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderStats {
    /// Chunks currently held (any state).
    pub resident: usize,
    /// Resident chunks in the deflated representation.
    pub deflated: usize,
    /// Resident chunks visible to gameplay.
    pub complete: usize,
    /// Evicted (tombstoned) positions.
    pub evicted: usize,
}

struct Slot {
    chunk: SharedChunk,
    /// Mirror of the chunk's state, readable without the chunk lock.
    state: ChunkState,
}

#[derive(Default)]
struct Slots {
    resident: HashMap<ChunkPos, Slot>,
    evicted: HashSet<ChunkPos>,
}

/// In-memory provider that creates chunks on demand for generation.
pub struct GeneratingChunkProvider {
    bounds: WorldBounds,
    slots: Mutex<Slots>,
}

impl GeneratingChunkProvider {
    /// Creates an empty provider for the given world bounds.
    #[must_use]
    pub fn new(bounds: WorldBounds) -> Self {
        Self {
            bounds,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// World bounds.
    #[must_use]
    pub const fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    fn handle(&self, pos: ChunkPos) -> Option<SharedChunk> {
        self.slots.lock().resident.get(&pos).map(|s| Arc::clone(&s.chunk))
    }

    fn mirror(&self, pos: ChunkPos, state: ChunkState) {
        if let Some(slot) = self.slots.lock().resident.get_mut(&pos) {
            slot.state = state;
        }
    }

    /// Re-expands `chunk` if it is deflated. Caller holds the chunk lock.
    fn ensure_expanded(&self, chunk: &mut Chunk) {
        if !chunk.is_deflated() || chunk.state() == ChunkState::Evicted {
            return;
        }
        match chunk.inflate() {
            Ok(()) => self.mirror(chunk.pos(), chunk.state()),
            Err(e) => tracing::error!("failed to re-expand chunk {}: {e}", chunk.pos()),
        }
    }

    /// Evicts a position: drops its chunk and refuses it from now on.
    ///
    /// A chunk currently locked by a running task is marked evicted at that
    /// task's next provider interaction. Returns false if nothing was
    /// resident.
    pub fn evict(&self, pos: ChunkPos) -> bool {
        let slot = {
            let mut slots = self.slots.lock();
            slots.evicted.insert(pos);
            slots.resident.remove(&pos)
        };

        let Some(slot) = slot else {
            return false;
        };
        if let Some(mut chunk) = slot.chunk.try_lock() {
            chunk.mark_evicted();
        }
        tracing::debug!("evicted chunk {pos}");
        true
    }

    /// Clears the tombstone of an evicted position.
    pub fn restore(&self, pos: ChunkPos) -> bool {
        self.slots.lock().evicted.remove(&pos)
    }

    /// Reads a block for gameplay.
    ///
    /// Returns `None` unless the containing chunk is `Complete` or later.
    /// Deflated chunks are re-expanded transparently.
    pub fn read_block(&self, wx: i32, wy: i32, wz: i32) -> Option<Block> {
        let pos = ChunkPos::containing(wx, wy, wz);
        let shared = self.handle(pos)?;
        let mut chunk = shared.lock();
        if !chunk.state().is_visible() {
            return None;
        }
        self.ensure_expanded(&mut chunk);
        let (x, y, z) = ChunkPos::local_of(wx, wy, wz);
        chunk.block(x, y, z).ok()
    }

    /// Number of resident chunks.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.slots.lock().resident.len()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> ProviderStats {
        let slots = self.slots.lock();
        let mut stats = ProviderStats {
            resident: slots.resident.len(),
            evicted: slots.evicted.len(),
            ..ProviderStats::default()
        };
        for slot in slots.resident.values() {
            if slot.state == ChunkState::Deflated {
                stats.deflated += 1;
            }
            if slot.state.is_visible() {
                stats.complete += 1;
            }
        }
        stats
    }

    /// Checks that `chunk` is still the resident chunk for its position.
    /// Marks it evicted if not.
    fn check_resident(&self, chunk: &mut Chunk) -> PipelineResult<()> {
        let pos = chunk.pos();
        let resident = {
            let slots = self.slots.lock();
            !slots.evicted.contains(&pos) && slots.resident.contains_key(&pos)
        };
        if resident && chunk.state() != ChunkState::Evicted {
            return Ok(());
        }
        chunk.mark_evicted();
        Err(PipelineError::ChunkAbsent(pos))
    }
}

impl ChunkProvider for GeneratingChunkProvider {
    fn get_chunk_for_processing(&self, pos: ChunkPos) -> Option<SharedChunk> {
        if !self.bounds.contains(pos) {
            return None;
        }

        let (shared, deflated) = {
            let mut slots = self.slots.lock();
            if slots.evicted.contains(&pos) {
                return None;
            }
            let slot = slots.resident.entry(pos).or_insert_with(|| Slot {
                chunk: Arc::new(Mutex::new(Chunk::new(pos))),
                state: ChunkState::Unloaded,
            });
            (Arc::clone(&slot.chunk), slot.state == ChunkState::Deflated)
        };

        if deflated {
            let mut chunk = shared.lock();
            self.ensure_expanded(&mut chunk);
        }
        Some(shared)
    }

    fn request_transition(&self, chunk: &mut Chunk, to: ChunkState) -> PipelineResult<()> {
        self.check_resident(chunk)?;
        let pos = chunk.pos();

        match to {
            ChunkState::Deflated => {
                chunk.deflate()?;
            }
            ChunkState::Evicted => {
                self.evict(pos);
                chunk.mark_evicted();
                return Ok(());
            }
            _ => chunk.advance_state(to)?,
        }
        self.mirror(pos, chunk.state());
        Ok(())
    }

    fn rollback(&self, chunk: &mut Chunk, to: ChunkState) -> PipelineResult<()> {
        if self.check_resident(chunk).is_err() {
            // Nothing left to roll back.
            return Ok(());
        }
        chunk.rollback_state(to)?;
        self.mirror(chunk.pos(), chunk.state());
        Ok(())
    }

    fn chunk_state(&self, pos: ChunkPos) -> Option<ChunkState> {
        let slots = self.slots.lock();
        if slots.evicted.contains(&pos) {
            return None;
        }
        slots.resident.get(&pos).map(|s| s.state)
    }

    fn is_available(&self, pos: ChunkPos) -> bool {
        self.bounds.contains(pos) && !self.slots.lock().evicted.contains(&pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GeneratingChunkProvider {
        GeneratingChunkProvider::new(WorldBounds {
            min_y: -1,
            max_y: 1,
            horizontal_radius: Some(4),
        })
    }

    fn advance(provider: &GeneratingChunkProvider, chunk: &mut Chunk, states: &[ChunkState]) {
        for state in states {
            provider.request_transition(chunk, *state).unwrap();
        }
    }

    const TO_COMPLETE: [ChunkState; 4] = [
        ChunkState::Generating,
        ChunkState::Generated,
        ChunkState::PostProcessing,
        ChunkState::Complete,
    ];

    #[test]
    fn test_placeholder_created_on_demand() {
        let provider = provider();
        let pos = ChunkPos::new(1, 0, 1);
        assert_eq!(provider.chunk_state(pos), None);
        let shared = provider.get_chunk_for_processing(pos).unwrap();
        assert_eq!(shared.lock().state(), ChunkState::Unloaded);
        assert_eq!(provider.chunk_state(pos), Some(ChunkState::Unloaded));
        assert_eq!(provider.resident_count(), 1);

        // Same handle on the second call.
        let again = provider.get_chunk_for_processing(pos).unwrap();
        assert!(Arc::ptr_eq(&shared, &again));
    }

    #[test]
    fn test_out_of_bounds_is_absent() {
        let provider = provider();
        assert!(provider.get_chunk_for_processing(ChunkPos::new(0, 2, 0)).is_none());
        assert!(provider.get_chunk_for_processing(ChunkPos::new(5, 0, 0)).is_none());
        assert!(!provider.is_available(ChunkPos::new(-5, 0, 0)));
        assert_eq!(provider.resident_count(), 0);
    }

    #[test]
    fn test_transitions_are_mirrored() {
        let provider = provider();
        let pos = ChunkPos::new(0, 0, 0);
        let shared = provider.get_chunk_for_processing(pos).unwrap();
        let mut chunk = shared.lock();
        advance(&provider, &mut chunk, &TO_COMPLETE);
        assert_eq!(provider.chunk_state(pos), Some(ChunkState::Complete));

        let err = provider.request_transition(&mut chunk, ChunkState::Generated);
        assert!(matches!(err, Err(PipelineError::Chunk(_))));
        assert_eq!(chunk.state(), ChunkState::Complete);
    }

    #[test]
    fn test_rollback_mirrors() {
        let provider = provider();
        let pos = ChunkPos::new(0, 1, 0);
        let shared = provider.get_chunk_for_processing(pos).unwrap();
        let mut chunk = shared.lock();
        advance(&provider, &mut chunk, &[ChunkState::Generating]);
        provider.rollback(&mut chunk, ChunkState::Unloaded).unwrap();
        assert_eq!(provider.chunk_state(pos), Some(ChunkState::Unloaded));
        assert!(provider.rollback(&mut chunk, ChunkState::Generated).is_err());
    }

    #[test]
    fn test_deflate_and_read_back() {
        let provider = provider();
        let pos = ChunkPos::new(-1, 0, 2);
        let shared = provider.get_chunk_for_processing(pos).unwrap();
        {
            let mut chunk = shared.lock();
            advance(&provider, &mut chunk, &TO_COMPLETE[..2]);
            chunk.set_block(1, 2, 3, Block::WOOD).unwrap();
            advance(&provider, &mut chunk, &TO_COMPLETE[2..]);
            provider.request_transition(&mut chunk, ChunkState::Deflated).unwrap();
            assert!(chunk.is_deflated());
        }
        assert_eq!(provider.stats().deflated, 1);

        let (ox, oy, oz) = pos.origin();
        assert_eq!(provider.read_block(ox + 1, oy + 2, oz + 3), Some(Block::WOOD));
        assert_eq!(provider.chunk_state(pos), Some(ChunkState::Complete));
        assert!(!shared.lock().is_deflated());
    }

    #[test]
    fn test_read_hidden_until_complete() {
        let provider = provider();
        let pos = ChunkPos::new(0, 0, 0);
        let shared = provider.get_chunk_for_processing(pos).unwrap();
        advance(&provider, &mut shared.lock(), &TO_COMPLETE[..2]);
        assert_eq!(provider.read_block(0, 0, 0), None);
        advance(&provider, &mut shared.lock(), &TO_COMPLETE[2..]);
        assert_eq!(provider.read_block(0, 0, 0), Some(Block::AIR));
    }

    #[test]
    fn test_deflated_chunk_reexpanded_for_processing() {
        let provider = provider();
        let pos = ChunkPos::new(2, 0, 2);
        let shared = provider.get_chunk_for_processing(pos).unwrap();
        {
            let mut chunk = shared.lock();
            advance(&provider, &mut chunk, &TO_COMPLETE);
            provider.request_transition(&mut chunk, ChunkState::Deflated).unwrap();
        }
        let again = provider.get_chunk_for_processing(pos).unwrap();
        let chunk = again.lock();
        assert!(!chunk.is_deflated());
        assert_eq!(chunk.state(), ChunkState::Complete);
    }

    #[test]
    fn test_evict_idle_chunk() {
        let provider = provider();
        let pos = ChunkPos::new(3, 0, 3);
        let shared = provider.get_chunk_for_processing(pos).unwrap();
        assert!(provider.evict(pos));
        assert_eq!(shared.lock().state(), ChunkState::Evicted);
        assert!(provider.get_chunk_for_processing(pos).is_none());
        assert!(!provider.is_available(pos));
        assert_eq!(provider.stats().evicted, 1);

        assert!(provider.restore(pos));
        assert!(provider.is_available(pos));
        let fresh = provider.get_chunk_for_processing(pos).unwrap();
        assert_eq!(fresh.lock().state(), ChunkState::Unloaded);
    }

    #[test]
    fn test_evict_locked_chunk_is_deferred() {
        let provider = provider();
        let pos = ChunkPos::new(0, 0, 1);
        let shared = provider.get_chunk_for_processing(pos).unwrap();
        let mut chunk = shared.lock();
        advance(&provider, &mut chunk, &[ChunkState::Generating]);

        assert!(provider.evict(pos));
        // Still held by the "task": not marked yet.
        assert_eq!(chunk.state(), ChunkState::Generating);

        let err = provider.request_transition(&mut chunk, ChunkState::Generated);
        assert_eq!(err, Err(PipelineError::ChunkAbsent(pos)));
        assert_eq!(chunk.state(), ChunkState::Evicted);
    }
}
