//! # LOAM
//!
//! Voxel world assembly. Picks the sampler, generator and provider
//! implementations for a world and starts its generation pipeline.
//!
//! ```rust,ignore
//! use loam::{World, WorldConfig};
//!
//! let world = World::new(WorldConfig::from_toml_str("seed = \"abc\"")?)?;
//! let request = world.request(ChunkPos::new(0, 0, 0), TargetStage::Complete);
//! request.wait();
//! let block = world.read_block(8, 4, 8);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod world;

pub use config::{ConfigError, ConfigResult, WorldConfig};
pub use world::World;
