//! # Pipeline Error Types
//!
//! All errors that can occur while bringing chunks through the pipeline.

use loam_procedural::{ChunkError, ChunkPos, ChunkState, GeneratorError};
use thiserror::Error;

use crate::task::Stage;

/// Errors that can occur in the generation pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A task found its chunk in a state its stage does not accept.
    #[error("{stage} precondition violated at {pos}: chunk is {state}")]
    PreconditionViolated {
        /// Position of the chunk.
        pos: ChunkPos,
        /// Stage that was attempted.
        stage: Stage,
        /// State the chunk was actually in.
        state: ChunkState,
    },

    /// The generator reported a failure; the chunk was rolled back.
    #[error("generator failed at {pos}: {source}")]
    Generator {
        /// Position of the chunk.
        pos: ChunkPos,
        /// Underlying generator error.
        source: GeneratorError,
    },

    /// A footprint neighbor failed to generate.
    #[error("neighbor {neighbor} of {pos} failed")]
    NeighborFailed {
        /// Position whose post-process was abandoned.
        pos: ChunkPos,
        /// Neighbor that failed.
        neighbor: ChunkPos,
    },

    /// Chunk-level failure (refused transition, corrupt data).
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// The provider has no chunk for this position.
    #[error("chunk {0} is absent")]
    ChunkAbsent(ChunkPos),

    /// The pipeline was shut down before the request finished.
    #[error("pipeline shut down")]
    ShutDown,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
