//! # LOAM Generation Pipeline
//!
//! Staged, multi-threaded chunk generation on top of `loam_procedural`.
//!
//! ## Stages
//!
//! 1. **Generate**: local content, no neighbors involved
//! 2. **Post-process**: cross-chunk finishing inside a declared footprint
//! 3. **Deflate**: compaction of finished chunks
//!
//! ## Core Components
//!
//! - `ChunkProvider` / `GeneratingChunkProvider`: chunk storage and lifecycle
//! - `ChunkTask`: one unit of work for one position
//! - `GenerationPipeline`: workers, single-flight, stage ordering
//! - `PipelineConfig`: worker count, event buffer, world bounds
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use loam_pipeline::{GeneratingChunkProvider, GenerationPipeline, PipelineConfig, TargetStage};
//!
//! let config = PipelineConfig::default();
//! let provider = Arc::new(GeneratingChunkProvider::new(config.bounds));
//! let pipeline = GenerationPipeline::new(&config, provider, generator)?;
//!
//! let request = pipeline.request_chunk(ChunkPos::new(0, 0, 0), TargetStage::Complete);
//! assert!(matches!(request.wait(), RequestOutcome::Reached(_)));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod pipeline;
pub mod provider;
pub mod request;
pub mod task;

pub use config::{PipelineConfig, WorldBounds};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{GenerationPipeline, PipelineEvent, PipelineStats, PipelineStatus};
pub use provider::{ChunkProvider, GeneratingChunkProvider, ProviderStats, SharedChunk};
pub use request::{ChunkRequest, RequestOutcome, TargetStage};
pub use task::{ChunkTask, Stage, TaskContext, TaskOutcome};
