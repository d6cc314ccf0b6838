//! # LOAM Procedural Generation
//!
//! Deterministic chunk content for infinite, reproducible voxel worlds.
//!
//! ## Design Principles
//!
//! 1. **Deterministic**: same seed and position always produce the same chunk
//! 2. **Local first pass**: `generate_chunk` reads nothing but its own inputs
//! 3. **Declared reach**: cross-chunk writes happen in post-processing, inside
//!    a `Footprint` the generator declares up front
//! 4. **Compact at rest**: finished chunks deflate to a fraction of their size
//!
//! ## Core Components
//!
//! - `WorldSeed` / `SimplexNoise`: seed derivation and 2D noise
//! - `BiomeSampler`: pure climate/biome lookup by column
//! - `Chunk`: block buffer plus lifecycle state
//! - `ChunkGenerator`: two-pass generator contract
//! - `TerrainGenerator`: reference heightmap and tree generator
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use loam_procedural::{
//!     ChunkGenerator, ChunkPos, Chunk, ClimateSampler, TerrainGenerator, WorldSeed,
//! };
//!
//! let mut generator = TerrainGenerator::new();
//! generator.set_world_seed("abc");
//! generator.set_biome_sampler(Arc::new(ClimateSampler::new(WorldSeed::from_text("abc"))));
//!
//! let mut chunk = Chunk::new(ChunkPos::new(0, 0, 0));
//! generator.generate_chunk(&mut chunk)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod biome;
pub mod chunk;
pub mod generator;
pub mod noise;
pub mod terrain;

pub use biome::{Biome, BiomeSample, BiomeSampler, CachedSampler, ClimateSampler};
pub use chunk::{
    Block, Chunk, ChunkError, ChunkPos, ChunkResult, ChunkState, BLOCKS_PER_CHUNK, CHUNK_SIZE,
};
pub use generator::{
    ChunkGenerator, Decorator, Footprint, GeneratorError, GeneratorResult, WorldAccess,
};
pub use noise::{SimplexNoise, WorldSeed};
pub use terrain::TerrainGenerator;
