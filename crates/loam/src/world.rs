//! # World
//!
//! Assembles one generation stack from a [`WorldConfig`]:
//!
//! ```text
//! ClimateSampler -> (CachedSampler) -> TerrainGenerator
//!                                           |
//!            GeneratingChunkProvider <- GenerationPipeline
//! ```
//!
//! Every component is built here and handed to the next by `Arc`.

use std::sync::Arc;

use loam_pipeline::{
    ChunkProvider, ChunkRequest, GeneratingChunkProvider, GenerationPipeline, TargetStage,
};
use loam_procedural::{
    BiomeSampler, Block, CachedSampler, ChunkGenerator, ChunkPos, ClimateSampler,
    TerrainGenerator, WorldSeed,
};

use crate::config::{ConfigError, ConfigResult, WorldConfig};

/// A running world: sampler, generator, provider and pipeline.
pub struct World {
    config: WorldConfig,
    seed: WorldSeed,
    sampler: Arc<dyn BiomeSampler>,
    provider: Arc<GeneratingChunkProvider>,
    pipeline: GenerationPipeline,
}

impl World {
    /// Builds the stack and starts the pipeline workers.
    ///
    /// # Errors
    ///
    /// An invalid config, or the pipeline failing to start.
    pub fn new(config: WorldConfig) -> ConfigResult<Self> {
        config.validate()?;
        let seed = WorldSeed::from_text(&config.seed);

        let climate = ClimateSampler::new(seed);
        let sampler: Arc<dyn BiomeSampler> = if config.cache_columns > 0 {
            Arc::new(CachedSampler::new(climate, config.cache_columns))
        } else {
            Arc::new(climate)
        };

        let mut generator = TerrainGenerator::new().with_sea_level(config.sea_level);
        generator.set_world_seed(&config.seed);
        generator.set_biome_sampler(Arc::clone(&sampler));

        let provider = Arc::new(GeneratingChunkProvider::new(config.pipeline.bounds));
        let pipeline = GenerationPipeline::new(
            &config.pipeline,
            Arc::clone(&provider) as Arc<dyn ChunkProvider>,
            Arc::new(generator),
        )
        .map_err(ConfigError::Pipeline)?;

        tracing::info!(
            "world '{}' ready (seed {:#018x}, sea level {})",
            config.seed,
            seed.value(),
            config.sea_level
        );
        Ok(Self {
            config,
            seed,
            sampler,
            provider,
            pipeline,
        })
    }

    /// Asks for one chunk.
    pub fn request(&self, pos: ChunkPos, target: TargetStage) -> ChunkRequest {
        self.pipeline.request_chunk(pos, target)
    }

    /// Asks for every in-bounds chunk within `radius` (Chebyshev, horizontal)
    /// of `center`, across the world's full height.
    pub fn request_area(&self, center: ChunkPos, radius: i32, target: TargetStage) -> Vec<ChunkRequest> {
        let bounds = self.config.pipeline.bounds;
        let radius = radius.max(0);
        let mut requests = Vec::new();
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                for y in bounds.min_y..=bounds.max_y {
                    let pos = ChunkPos::new(center.x.wrapping_add(dx), y, center.z.wrapping_add(dz));
                    if bounds.contains(pos) {
                        requests.push(self.pipeline.request_chunk(pos, target));
                    }
                }
            }
        }
        requests
    }

    /// Block at world coordinates, if its chunk is complete.
    #[must_use]
    pub fn read_block(&self, wx: i32, wy: i32, wz: i32) -> Option<Block> {
        self.provider.read_block(wx, wy, wz)
    }

    /// World config.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Numeric world seed.
    #[must_use]
    pub const fn seed(&self) -> WorldSeed {
        self.seed
    }

    /// Biome sampler shared with the generator.
    #[must_use]
    pub fn sampler(&self) -> &Arc<dyn BiomeSampler> {
        &self.sampler
    }

    /// Chunk storage.
    #[must_use]
    pub fn provider(&self) -> &Arc<GeneratingChunkProvider> {
        &self.provider
    }

    /// Generation pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &GenerationPipeline {
        &self.pipeline
    }

    /// Stops the pipeline. Outstanding requests fail with `ShutDown`.
    pub fn shutdown(&mut self) {
        self.pipeline.shutdown();
    }
}
