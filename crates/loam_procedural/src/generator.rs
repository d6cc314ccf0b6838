//! # Generator Contract
//!
//! A [`ChunkGenerator`] works in two passes:
//!
//! 1. `generate_chunk` fills one chunk from its position, the world seed and
//!    the biome sampler. It sees nothing else.
//! 2. `post_process_chunk` runs once the chunk and every position in its
//!    [`Footprint`] exist at least in generated form. All reads and writes go
//!    through a [`WorldAccess`] restricted to that footprint.

use std::sync::Arc;

use thiserror::Error;

use crate::biome::BiomeSampler;
use crate::chunk::{Block, Chunk, ChunkError, ChunkPos, ChunkState};
use crate::noise::WorldSeed;

/// Generator errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    /// A required input was never supplied.
    #[error("generator not configured: {0} missing")]
    NotConfigured(&'static str),

    /// Generation logic failed for a position.
    #[error("generation failed at {pos}: {reason}")]
    Failed {
        /// Chunk position
        pos: ChunkPos,
        /// Failure description
        reason: String,
    },

    /// Chunk-level error (deflated buffer, bad coordinate).
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// Result type for generator operations.
pub type GeneratorResult<T> = Result<T, GeneratorError>;

/// The set of positions a post-process pass may touch.
///
/// Neighbors are kept sorted and de-duplicated, and never contain the home.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Footprint {
    home: ChunkPos,
    neighbors: Vec<ChunkPos>,
}

impl Footprint {
    /// Builds a footprint from an arbitrary neighbor list.
    #[must_use]
    pub fn new(home: ChunkPos, neighbors: impl IntoIterator<Item = ChunkPos>) -> Self {
        let mut neighbors: Vec<ChunkPos> = neighbors.into_iter().filter(|p| *p != home).collect();
        neighbors.sort_unstable();
        neighbors.dedup();
        Self { home, neighbors }
    }

    /// A footprint touching only its home chunk.
    #[must_use]
    pub fn home_only(home: ChunkPos) -> Self {
        Self {
            home,
            neighbors: Vec::new(),
        }
    }

    /// Every position within Chebyshev `radius` of `home`.
    #[must_use]
    pub fn neighborhood(home: ChunkPos, radius: i32) -> Self {
        let r = radius.max(0);
        let mut neighbors = Vec::with_capacity(((2 * r + 1).pow(3) - 1) as usize);
        for dx in -r..=r {
            for dy in -r..=r {
                for dz in -r..=r {
                    if dx != 0 || dy != 0 || dz != 0 {
                        neighbors.push(home.offset(dx, dy, dz));
                    }
                }
            }
        }
        Self::new(home, neighbors)
    }

    /// Home position.
    #[inline]
    #[must_use]
    pub const fn home(&self) -> ChunkPos {
        self.home
    }

    /// Sorted neighbor positions (home excluded).
    #[inline]
    #[must_use]
    pub fn neighbors(&self) -> &[ChunkPos] {
        &self.neighbors
    }

    /// Home plus neighbors, in sorted order.
    #[must_use]
    pub fn positions(&self) -> Vec<ChunkPos> {
        let mut all = Vec::with_capacity(self.neighbors.len() + 1);
        all.push(self.home);
        all.extend_from_slice(&self.neighbors);
        all.sort_unstable();
        all
    }

    /// Whether `pos` is part of the footprint.
    #[must_use]
    pub fn contains(&self, pos: ChunkPos) -> bool {
        pos == self.home || self.neighbors.binary_search(&pos).is_ok()
    }

    /// Number of positions including home.
    #[must_use]
    pub fn len(&self) -> usize {
        self.neighbors.len() + 1
    }

    /// Always false: a footprint contains at least its home.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Block-level world view handed to post-processing.
///
/// Coordinates are absolute block positions.
pub trait WorldAccess {
    /// Reads a block, `None` if its chunk is outside the view or absent.
    fn block(&self, wx: i32, wy: i32, wz: i32) -> Option<Block>;

    /// Writes a block. Returns false if its chunk is outside the view or
    /// absent.
    fn set_block(&mut self, wx: i32, wy: i32, wz: i32, block: Block) -> bool;

    /// State of a chunk in the view, `None` if outside or absent.
    fn chunk_state(&self, pos: ChunkPos) -> Option<ChunkState>;
}

/// Content generator driven by the pipeline.
///
/// Configuration (`set_world_seed`, `set_biome_sampler`) happens before the
/// generator is shared; the pipeline only ever holds `Arc<dyn ChunkGenerator>`.
pub trait ChunkGenerator: Send + Sync {
    /// Sets the textual world seed.
    fn set_world_seed(&mut self, seed: &str);

    /// Sets the biome sampler.
    fn set_biome_sampler(&mut self, sampler: Arc<dyn BiomeSampler>);

    /// First pass: fills `chunk` from its position alone.
    ///
    /// Must not depend on any other chunk or on call order.
    ///
    /// # Errors
    ///
    /// `NotConfigured` if a required input is missing, otherwise any failure
    /// the implementation reports.
    fn generate_chunk(&self, chunk: &mut Chunk) -> GeneratorResult<()>;

    /// Second pass: cross-chunk finishing for `pos` through `world`.
    ///
    /// # Errors
    ///
    /// Any failure the implementation reports.
    fn post_process_chunk(&self, pos: ChunkPos, world: &mut dyn WorldAccess) -> GeneratorResult<()>;

    /// Positions `post_process_chunk(pos, ..)` may touch.
    fn footprint(&self, pos: ChunkPos) -> Footprint {
        Footprint::neighborhood(pos, 1)
    }
}

/// Opaque interior content hook run at the end of the generate pass.
///
/// Decorators see only the chunk being generated, so they inherit the same
/// purity requirement as `generate_chunk`.
pub trait Decorator: Send + Sync {
    /// Decorates `chunk` in place.
    ///
    /// # Errors
    ///
    /// Any failure the decorator reports.
    fn decorate(&self, chunk: &mut Chunk, seed: WorldSeed) -> GeneratorResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighborhood_shape() {
        let home = ChunkPos::new(4, -1, 2);
        let fp = Footprint::neighborhood(home, 1);
        assert_eq!(fp.neighbors().len(), 26);
        assert_eq!(fp.len(), 27);
        assert!(!fp.contains(ChunkPos::new(6, -1, 2)));
        assert!(fp.contains(ChunkPos::new(3, 0, 3)));
        assert!(fp.contains(home));
        assert!(fp.neighbors().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_footprint_dedups_and_drops_home() {
        let home = ChunkPos::new(0, 0, 0);
        let fp = Footprint::new(
            home,
            [ChunkPos::new(1, 0, 0), home, ChunkPos::new(-1, 0, 0), ChunkPos::new(1, 0, 0)],
        );
        assert_eq!(fp.neighbors(), &[ChunkPos::new(-1, 0, 0), ChunkPos::new(1, 0, 0)]);
        assert_eq!(
            fp.positions(),
            vec![ChunkPos::new(-1, 0, 0), home, ChunkPos::new(1, 0, 0)]
        );
    }

    #[test]
    fn test_home_only() {
        let fp = Footprint::home_only(ChunkPos::new(9, 9, 9));
        assert!(fp.neighbors().is_empty());
        assert_eq!(fp.positions(), vec![ChunkPos::new(9, 9, 9)]);
        assert_eq!(Footprint::neighborhood(ChunkPos::new(9, 9, 9), 0), fp);
    }
}
