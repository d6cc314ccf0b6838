//! # Chunk Model
//!
//! World data is organized into cubic chunks of `CHUNK_SIZE`³ blocks.
//!
//! ## Lifecycle
//!
//! ```text
//! Unloaded -> Generating -> Generated -> PostProcessing -> Complete -> Deflated
//!                                                      (any) -> Evicted
//! ```
//!
//! A chunk is only visible to gameplay systems at `Complete` or later.
//!
//! ## Storage
//!
//! Block data is expanded while generation or post-processing may still touch
//! it. Once a chunk is stable it can be deflated: uniform buffers collapse to
//! a single block, everything else is LZ4-compressed. Block access on a
//! deflated chunk is an error.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use thiserror::Error;

/// Chunk edge length in blocks.
pub const CHUNK_SIZE: usize = 16;

/// Total blocks per chunk.
pub const BLOCKS_PER_CHUNK: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE;

const SIZE_I32: i32 = CHUNK_SIZE as i32;

/// Chunk position in chunk-space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkPos {
    /// X coordinate (in chunks, not blocks).
    pub x: i32,
    /// Y coordinate (in chunks).
    pub y: i32,
    /// Z coordinate (in chunks).
    pub z: i32,
}

impl ChunkPos {
    /// Creates a new chunk position.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Chunk containing the given absolute block position.
    #[inline]
    #[must_use]
    pub const fn containing(wx: i32, wy: i32, wz: i32) -> Self {
        Self {
            x: wx.div_euclid(SIZE_I32),
            y: wy.div_euclid(SIZE_I32),
            z: wz.div_euclid(SIZE_I32),
        }
    }

    /// Absolute block coordinates of this chunk's minimum corner.
    #[inline]
    #[must_use]
    pub const fn origin(self) -> (i32, i32, i32) {
        (
            self.x.wrapping_mul(SIZE_I32),
            self.y.wrapping_mul(SIZE_I32),
            self.z.wrapping_mul(SIZE_I32),
        )
    }

    /// Returns the position shifted by the given chunk deltas.
    #[inline]
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x.wrapping_add(dx),
            y: self.y.wrapping_add(dy),
            z: self.z.wrapping_add(dz),
        }
    }

    /// Splits an absolute block position into local coordinates within its
    /// containing chunk.
    #[inline]
    #[must_use]
    pub const fn local_of(wx: i32, wy: i32, wz: i32) -> (usize, usize, usize) {
        (
            wx.rem_euclid(SIZE_I32) as usize,
            wy.rem_euclid(SIZE_I32) as usize,
            wz.rem_euclid(SIZE_I32) as usize,
        )
    }

    /// Chebyshev distance between two positions.
    #[must_use]
    pub fn distance(self, other: Self) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        let dz = self.z.abs_diff(other.z);
        dx.max(dy).max(dz)
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// A single block in the world.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct Block {
    /// Block type ID.
    pub id: u16,
    /// Block metadata (rotation, growth stage, etc.).
    pub meta: u16,
}

impl Block {
    /// Air block (empty).
    pub const AIR: Self = Self { id: 0, meta: 0 };
    /// Grass block.
    pub const GRASS: Self = Self { id: 1, meta: 0 };
    /// Stone block.
    pub const STONE: Self = Self { id: 2, meta: 0 };
    /// Dirt block.
    pub const DIRT: Self = Self { id: 3, meta: 0 };
    /// Wood/Log block.
    pub const WOOD: Self = Self { id: 4, meta: 0 };
    /// Leaves block.
    pub const LEAVES: Self = Self { id: 5, meta: 0 };
    /// Water block.
    pub const WATER: Self = Self { id: 10, meta: 0 };
    /// Sand block.
    pub const SAND: Self = Self { id: 11, meta: 0 };
    /// Snow block.
    pub const SNOW: Self = Self { id: 14, meta: 0 };

    /// Creates a new block with given ID.
    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self { id, meta: 0 }
    }

    /// Creates a block with ID and metadata.
    #[inline]
    #[must_use]
    pub const fn with_meta(id: u16, meta: u16) -> Self {
        Self { id, meta }
    }

    /// Returns true if this is an air block.
    #[inline]
    #[must_use]
    pub const fn is_air(self) -> bool {
        self.id == 0
    }
}

/// Chunk lifecycle state.
///
/// The derived ordering follows the forward pipeline. `Evicted` sorts last
/// but is not "further along": use [`ChunkState::has_reached`] for stage
/// comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ChunkState {
    /// Reserved, no content yet.
    Unloaded = 0,
    /// First-pass generation in progress.
    Generating = 1,
    /// Local content exists.
    Generated = 2,
    /// Cross-chunk finishing in progress.
    PostProcessing = 3,
    /// Fully built and visible.
    Complete = 4,
    /// Compacted in memory.
    Deflated = 5,
    /// Reclaimed by the provider.
    Evicted = 6,
}

impl ChunkState {
    /// The next forward state, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Unloaded => Some(Self::Generating),
            Self::Generating => Some(Self::Generated),
            Self::Generated => Some(Self::PostProcessing),
            Self::PostProcessing => Some(Self::Complete),
            Self::Complete => Some(Self::Deflated),
            Self::Deflated | Self::Evicted => None,
        }
    }

    /// Whether `self -> to` is a legal forward transition.
    ///
    /// Forward edges advance one step at a time. Eviction is reachable from
    /// every state except itself.
    #[must_use]
    pub fn can_advance_to(self, to: Self) -> bool {
        if to == Self::Evicted {
            return self != Self::Evicted;
        }
        self.next() == Some(to)
    }

    /// Whether `self -> to` is one of the failure rollback edges.
    #[must_use]
    pub const fn can_roll_back_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Generating, Self::Unloaded) | (Self::PostProcessing, Self::Generated)
        )
    }

    /// Whether the chunk is at or past `stage` (never true once evicted).
    #[must_use]
    pub fn has_reached(self, stage: Self) -> bool {
        self != Self::Evicted && self >= stage
    }

    /// Whether gameplay may read the chunk.
    #[must_use]
    pub fn is_visible(self) -> bool {
        self.has_reached(Self::Complete)
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unloaded => "UNLOADED",
            Self::Generating => "GENERATING",
            Self::Generated => "GENERATED",
            Self::PostProcessing => "POST_PROCESSING",
            Self::Complete => "COMPLETE",
            Self::Deflated => "DEFLATED",
            Self::Evicted => "EVICTED",
        };
        f.write_str(name)
    }
}

/// Chunk-level errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// Block access on a compacted chunk.
    #[error("chunk {0} is deflated")]
    Deflated(ChunkPos),

    /// Local coordinates outside the chunk.
    #[error("local coordinate ({x}, {y}, {z}) out of range")]
    OutOfRange {
        /// Local X
        x: usize,
        /// Local Y
        y: usize,
        /// Local Z
        z: usize,
    },

    /// Compressed data failed to expand.
    #[error("corrupt chunk data at {pos}: {reason}")]
    CorruptData {
        /// Chunk position
        pos: ChunkPos,
        /// What went wrong
        reason: String,
    },

    /// State change not permitted by the lifecycle.
    #[error("illegal transition {from} -> {to} for chunk {pos}")]
    IllegalTransition {
        /// Chunk position
        pos: ChunkPos,
        /// Current state
        from: ChunkState,
        /// Requested state
        to: ChunkState,
    },
}

/// Result type for chunk operations.
pub type ChunkResult<T> = Result<T, ChunkError>;

/// In-memory representation of a chunk's blocks.
#[derive(Clone, Debug)]
enum BlockData {
    /// Flat `[y][z][x]` buffer.
    Expanded(Box<[Block]>),
    /// Every block identical.
    Uniform(Block),
    /// LZ4 with prepended size.
    Compressed(Vec<u8>),
}

/// A chunk of world data plus lifecycle bookkeeping.
#[derive(Clone, Debug)]
pub struct Chunk {
    pos: ChunkPos,
    state: ChunkState,
    data: BlockData,
}

impl Chunk {
    /// Creates an empty (all air) chunk in the `Unloaded` state.
    #[must_use]
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            state: ChunkState::Unloaded,
            data: BlockData::Expanded(vec![Block::AIR; BLOCKS_PER_CHUNK].into_boxed_slice()),
        }
    }

    /// Chunk position.
    #[inline]
    #[must_use]
    pub const fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ChunkState {
        self.state
    }

    /// Whether the block buffer is compacted.
    #[inline]
    #[must_use]
    pub const fn is_deflated(&self) -> bool {
        !matches!(self.data, BlockData::Expanded(_))
    }

    /// Flat index of local coordinates (`[y][z][x]` order).
    #[inline]
    #[must_use]
    pub const fn index(x: usize, y: usize, z: usize) -> usize {
        (y * CHUNK_SIZE + z) * CHUNK_SIZE + x
    }

    fn checked_index(x: usize, y: usize, z: usize) -> ChunkResult<usize> {
        if x < CHUNK_SIZE && y < CHUNK_SIZE && z < CHUNK_SIZE {
            Ok(Self::index(x, y, z))
        } else {
            Err(ChunkError::OutOfRange { x, y, z })
        }
    }

    /// Gets a block at local coordinates.
    ///
    /// # Errors
    ///
    /// `Deflated` if the chunk is compacted, `OutOfRange` for bad coordinates.
    pub fn block(&self, x: usize, y: usize, z: usize) -> ChunkResult<Block> {
        let idx = Self::checked_index(x, y, z)?;
        Ok(self.blocks()?[idx])
    }

    /// Sets a block at local coordinates.
    ///
    /// # Errors
    ///
    /// `Deflated` if the chunk is compacted, `OutOfRange` for bad coordinates.
    pub fn set_block(&mut self, x: usize, y: usize, z: usize, block: Block) -> ChunkResult<()> {
        let idx = Self::checked_index(x, y, z)?;
        self.blocks_mut()?[idx] = block;
        Ok(())
    }

    /// The expanded block buffer.
    ///
    /// # Errors
    ///
    /// `Deflated` if the chunk is compacted.
    pub fn blocks(&self) -> ChunkResult<&[Block]> {
        match &self.data {
            BlockData::Expanded(blocks) => Ok(&blocks[..]),
            _ => Err(ChunkError::Deflated(self.pos)),
        }
    }

    /// The expanded block buffer, mutably.
    ///
    /// # Errors
    ///
    /// `Deflated` if the chunk is compacted.
    pub fn blocks_mut(&mut self) -> ChunkResult<&mut [Block]> {
        match &mut self.data {
            BlockData::Expanded(blocks) => Ok(&mut blocks[..]),
            _ => Err(ChunkError::Deflated(self.pos)),
        }
    }

    /// Replaces the buffer with fresh air so generation starts from nothing.
    pub fn reset_buffer(&mut self) {
        match &mut self.data {
            BlockData::Expanded(blocks) => blocks.fill(Block::AIR),
            data => {
                *data = BlockData::Expanded(vec![Block::AIR; BLOCKS_PER_CHUNK].into_boxed_slice());
            }
        }
    }

    /// Bytes currently used by the block representation.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        match &self.data {
            BlockData::Expanded(blocks) => blocks.len() * std::mem::size_of::<Block>(),
            BlockData::Uniform(_) => std::mem::size_of::<Block>(),
            BlockData::Compressed(bytes) => bytes.len(),
        }
    }

    /// Applies a forward lifecycle transition.
    ///
    /// # Errors
    ///
    /// `IllegalTransition` if the edge is not a single forward step or
    /// eviction.
    pub fn advance_state(&mut self, to: ChunkState) -> ChunkResult<()> {
        if !self.state.can_advance_to(to) {
            return Err(self.illegal(to));
        }
        self.state = to;
        Ok(())
    }

    /// Applies a failure rollback (`Generating -> Unloaded` or
    /// `PostProcessing -> Generated`).
    ///
    /// # Errors
    ///
    /// `IllegalTransition` for any other edge.
    pub fn rollback_state(&mut self, to: ChunkState) -> ChunkResult<()> {
        if !self.state.can_roll_back_to(to) {
            return Err(self.illegal(to));
        }
        if to == ChunkState::Unloaded {
            self.reset_buffer();
        }
        self.state = to;
        Ok(())
    }

    /// Marks the chunk reclaimed. Drops the block buffer.
    pub fn mark_evicted(&mut self) {
        self.state = ChunkState::Evicted;
        self.data = BlockData::Uniform(Block::AIR);
    }

    fn illegal(&self, to: ChunkState) -> ChunkError {
        ChunkError::IllegalTransition {
            pos: self.pos,
            from: self.state,
            to,
        }
    }

    /// Compacts the block buffer and moves `Complete -> Deflated`.
    ///
    /// Returns the compacted size in bytes.
    ///
    /// # Errors
    ///
    /// `IllegalTransition` unless the chunk is `Complete`.
    pub fn deflate(&mut self) -> ChunkResult<usize> {
        if self.state != ChunkState::Complete {
            return Err(self.illegal(ChunkState::Deflated));
        }

        let packed = match &self.data {
            BlockData::Expanded(blocks) => {
                let first = blocks[0];
                if blocks.iter().all(|b| *b == first) {
                    BlockData::Uniform(first)
                } else {
                    BlockData::Compressed(compress_prepend_size(bytemuck::cast_slice::<Block, u8>(
                        blocks,
                    )))
                }
            }
            other => other.clone(),
        };

        self.data = packed;
        self.state = ChunkState::Deflated;
        Ok(self.memory_bytes())
    }

    /// Re-expands a deflated chunk back to `Complete`. No-op on an expanded
    /// chunk.
    ///
    /// # Errors
    ///
    /// `CorruptData` if the compressed bytes do not expand to a full chunk.
    pub fn inflate(&mut self) -> ChunkResult<()> {
        let blocks = match &self.data {
            BlockData::Expanded(_) => return Ok(()),
            BlockData::Uniform(block) => vec![*block; BLOCKS_PER_CHUNK].into_boxed_slice(),
            BlockData::Compressed(bytes) => self.expand(bytes)?,
        };

        self.data = BlockData::Expanded(blocks);
        if self.state == ChunkState::Deflated {
            self.state = ChunkState::Complete;
        }
        Ok(())
    }

    fn expand(&self, bytes: &[u8]) -> ChunkResult<Box<[Block]>> {
        let raw = decompress_size_prepended(bytes).map_err(|e| ChunkError::CorruptData {
            pos: self.pos,
            reason: e.to_string(),
        })?;

        let expected = BLOCKS_PER_CHUNK * std::mem::size_of::<Block>();
        if raw.len() != expected {
            return Err(ChunkError::CorruptData {
                pos: self.pos,
                reason: format!("expected {expected} bytes, got {}", raw.len()),
            });
        }

        // Decompressed bytes carry no alignment guarantee.
        Ok(raw
            .chunks_exact(std::mem::size_of::<Block>())
            .map(bytemuck::pod_read_unaligned::<Block>)
            .collect())
    }
}
