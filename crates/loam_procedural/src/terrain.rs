//! # Terrain Generator
//!
//! Reference [`ChunkGenerator`]: noise heightmap terrain in the generate pass,
//! trees in the post-process pass.
//!
//! Trees are the reason post-processing exists. A trunk is rooted in the home
//! chunk but its canopy spills into neighbors, so leaves are written through
//! the [`WorldAccess`] view and only ever replace air.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::biome::{Biome, BiomeSampler};
use crate::chunk::{Block, Chunk, ChunkPos, CHUNK_SIZE};
use crate::generator::{ChunkGenerator, Decorator, GeneratorError, GeneratorResult, WorldAccess};
use crate::noise::{SimplexNoise, WorldSeed};

/// Seeded state, present once `set_world_seed` has been called.
struct Seeded {
    seed: WorldSeed,
    elevation: SimplexNoise,
}

/// Noise heightmap generator with tree post-processing.
pub struct TerrainGenerator {
    seeded: Option<Seeded>,
    sampler: Option<Arc<dyn BiomeSampler>>,
    decorator: Option<Arc<dyn Decorator>>,
    /// Sea level (absolute Y).
    sea_level: i32,
}

impl TerrainGenerator {
    /// Default sea level.
    pub const DEFAULT_SEA_LEVEL: i32 = 8;

    /// Minimum trunk height.
    const TREE_MIN_HEIGHT: i32 = 4;

    /// Maximum trunk height.
    const TREE_MAX_HEIGHT: i32 = 6;

    /// Canopy radius.
    const LEAF_RADIUS: i32 = 2;

    /// Base terrain amplitude in blocks.
    const AMPLITUDE: f64 = 12.0;

    /// Horizontal elevation frequency.
    const ELEVATION_SCALE: f64 = 1.0 / 96.0;

    const ELEVATION_SALT: u64 = 0x0E1E_7A71;
    const TREE_SALT: u64 = 0x7EE5;

    /// Creates an unconfigured generator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            seeded: None,
            sampler: None,
            decorator: None,
            sea_level: Self::DEFAULT_SEA_LEVEL,
        }
    }

    /// Sets the sea level.
    #[must_use]
    pub fn with_sea_level(mut self, level: i32) -> Self {
        self.sea_level = level;
        self
    }

    /// Installs an interior decorator, run at the end of the generate pass.
    #[must_use]
    pub fn with_decorator(mut self, decorator: Arc<dyn Decorator>) -> Self {
        self.decorator = Some(decorator);
        self
    }

    /// Sea level (absolute Y).
    #[must_use]
    pub const fn sea_level(&self) -> i32 {
        self.sea_level
    }

    /// Active world seed, if configured.
    #[must_use]
    pub fn seed(&self) -> Option<WorldSeed> {
        self.seeded.as_ref().map(|s| s.seed)
    }

    fn inputs(&self) -> GeneratorResult<(&Seeded, &dyn BiomeSampler)> {
        let seeded = self
            .seeded
            .as_ref()
            .ok_or(GeneratorError::NotConfigured("world seed"))?;
        let sampler = self
            .sampler
            .as_deref()
            .ok_or(GeneratorError::NotConfigured("biome sampler"))?;
        Ok((seeded, sampler))
    }

    fn height_at(&self, seeded: &Seeded, biome: Biome, wx: i32, wz: i32) -> i32 {
        let e = seeded.elevation.octaved(
            f64::from(wx) * Self::ELEVATION_SCALE,
            f64::from(wz) * Self::ELEVATION_SCALE,
            4,
            0.5,
            2.0,
        );
        self.sea_level + (e * Self::AMPLITUDE * biome.relief()).round() as i32
    }

    /// Surface height (absolute Y of the top solid block) of a column.
    ///
    /// # Errors
    ///
    /// `NotConfigured` if seed or sampler are missing.
    pub fn surface_height(&self, wx: i32, wz: i32) -> GeneratorResult<i32> {
        let (seeded, sampler) = self.inputs()?;
        Ok(self.height_at(seeded, sampler.biome(wx, wz), wx, wz))
    }

    fn column_block(&self, wy: i32, height: i32, surface: Block) -> Block {
        if wy < height - 3 {
            Block::STONE
        } else if wy < height {
            Block::DIRT
        } else if wy == height {
            surface
        } else if wy <= self.sea_level {
            Block::WATER
        } else {
            Block::AIR
        }
    }

    fn place_tree(world: &mut dyn WorldAccess, wx: i32, base: i32, wz: i32, trunk: i32) {
        for wy in base..base + trunk {
            let free = world.block(wx, wy, wz).is_some_and(|b| b.is_air() || b == Block::LEAVES);
            if free {
                world.set_block(wx, wy, wz, Block::WOOD);
            }
        }

        let r = Self::LEAF_RADIUS;
        let top = base + trunk;
        for wy in top - 2..=top + 1 {
            // Narrow crown above the trunk.
            let layer_r = if wy > top { r - 1 } else { r };
            for dz in -layer_r..=layer_r {
                for dx in -layer_r..=layer_r {
                    if dx * dx + dz * dz > layer_r * layer_r + 1 {
                        continue;
                    }
                    let (lx, lz) = (wx.wrapping_add(dx), wz.wrapping_add(dz));
                    if world.block(lx, wy, lz).is_some_and(Block::is_air) {
                        world.set_block(lx, wy, lz, Block::LEAVES);
                    }
                }
            }
        }
    }
}

impl Default for TerrainGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkGenerator for TerrainGenerator {
    fn set_world_seed(&mut self, seed: &str) {
        let seed = WorldSeed::from_text(seed);
        self.seeded = Some(Seeded {
            seed,
            elevation: SimplexNoise::new(seed.derive(Self::ELEVATION_SALT)),
        });
    }

    fn set_biome_sampler(&mut self, sampler: Arc<dyn BiomeSampler>) {
        self.sampler = Some(sampler);
    }

    fn generate_chunk(&self, chunk: &mut Chunk) -> GeneratorResult<()> {
        let (seeded, sampler) = self.inputs()?;
        let pos = chunk.pos();
        let (ox, oy, oz) = pos.origin();

        chunk.reset_buffer();
        {
            let blocks = chunk.blocks_mut()?;
            for lz in 0..CHUNK_SIZE {
                for lx in 0..CHUNK_SIZE {
                    let wx = ox + lx as i32;
                    let wz = oz + lz as i32;
                    let biome = sampler.biome(wx, wz);
                    let height = self.height_at(seeded, biome, wx, wz);
                    let surface = biome.surface_block();

                    for ly in 0..CHUNK_SIZE {
                        let block = self.column_block(oy + ly as i32, height, surface);
                        blocks[Chunk::index(lx, ly, lz)] = block;
                    }
                }
            }
        }

        if let Some(decorator) = &self.decorator {
            decorator.decorate(chunk, seeded.seed.derive_position(pos.x, pos.y, pos.z))?;
        }
        Ok(())
    }

    fn post_process_chunk(&self, pos: ChunkPos, world: &mut dyn WorldAccess) -> GeneratorResult<()> {
        let (seeded, sampler) = self.inputs()?;
        let (ox, oy, oz) = pos.origin();
        let mut rng = ChaCha8Rng::seed_from_u64(
            seeded
                .seed
                .derive(Self::TREE_SALT)
                .derive_position(pos.x, pos.y, pos.z)
                .value(),
        );

        for lz in 0..CHUNK_SIZE as i32 {
            for lx in 0..CHUNK_SIZE as i32 {
                // Fixed draw count per column keeps the stream position-stable.
                let roll: f64 = rng.gen();
                let trunk = rng.gen_range(Self::TREE_MIN_HEIGHT..=Self::TREE_MAX_HEIGHT);

                let (wx, wz) = (ox + lx, oz + lz);
                let biome = sampler.biome(wx, wz);
                if roll >= biome.tree_density() {
                    continue;
                }

                let height = self.height_at(seeded, biome, wx, wz);
                let base = height + 1;
                if base < oy || base >= oy + CHUNK_SIZE as i32 {
                    continue;
                }
                if world.block(wx, height, wz) != Some(Block::GRASS) {
                    continue;
                }

                Self::place_tree(world, wx, base, wz, trunk);
            }
        }
        Ok(())
    }
}
