//! # Biome Sampling
//!
//! A biome sampler is a pure function of horizontal block position. It holds
//! no mutable state that can change its answers, so any worker thread may ask
//! any column at any time and get the same result.
//!
//! The [`ClimateSampler`] here is one concrete classifier; generators only
//! depend on the [`BiomeSampler`] trait.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::chunk::Block;
use crate::noise::{SimplexNoise, WorldSeed};

/// Biome types in the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Biome {
    /// High, ridged terrain
    Mountains = 0,
    /// Frozen ground
    Snow = 1,
    /// Hot and dry
    Desert = 2,
    /// Warm and wet, dense trees
    Forest = 3,
    /// Temperate grassland
    Plains = 4,
}

impl Biome {
    /// Returns the block placed on the surface of this biome.
    #[must_use]
    pub const fn surface_block(self) -> Block {
        match self {
            Self::Mountains => Block::STONE,
            Self::Snow => Block::SNOW,
            Self::Desert => Block::SAND,
            Self::Forest | Self::Plains => Block::GRASS,
        }
    }

    /// Per-column tree chance (0.0 - 1.0).
    #[must_use]
    pub const fn tree_density(self) -> f64 {
        match self {
            Self::Forest => 0.06,
            Self::Plains => 0.008,
            Self::Snow => 0.004,
            Self::Mountains | Self::Desert => 0.0,
        }
    }

    /// Height multiplier applied to the elevation channel.
    #[must_use]
    pub const fn relief(self) -> f64 {
        match self {
            Self::Mountains => 3.0,
            Self::Snow => 1.4,
            Self::Forest => 1.1,
            Self::Plains | Self::Desert => 0.8,
        }
    }
}

/// Climate and classification for one horizontal position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiomeSample {
    /// Humidity in `[-1, 1]`.
    pub humidity: f64,
    /// Temperature in `[-1, 1]`.
    pub temperature: f64,
    /// Resulting biome.
    pub biome: Biome,
}

/// Maps horizontal block coordinates to climate and biome.
///
/// Implementations must be deterministic for a given world seed and total
/// over every `i32` pair.
pub trait BiomeSampler: Send + Sync {
    /// Humidity at a column, in `[-1, 1]`.
    fn humidity(&self, x: i32, z: i32) -> f64;

    /// Temperature at a column, in `[-1, 1]`.
    fn temperature(&self, x: i32, z: i32) -> f64;

    /// Biome at a column.
    fn biome(&self, x: i32, z: i32) -> Biome;

    /// All three values at once.
    fn sample(&self, x: i32, z: i32) -> BiomeSample {
        BiomeSample {
            humidity: self.humidity(x, z),
            temperature: self.temperature(x, z),
            biome: self.biome(x, z),
        }
    }
}

/// Noise-driven climate classifier.
pub struct ClimateSampler {
    temperature: SimplexNoise,
    humidity: SimplexNoise,
    ridge: SimplexNoise,
    /// Horizontal frequency of the climate channels.
    climate_scale: f64,
    /// Horizontal frequency of the ridge channel.
    ridge_scale: f64,
}

impl ClimateSampler {
    const TEMPERATURE_SALT: u64 = 0x7E_4D_9E_12;
    const HUMIDITY_SALT: u64 = 0x40_11_D1_7A;
    const RIDGE_SALT: u64 = 0x21_D6_E5_00;

    /// Ridge value above which a column is mountainous.
    const MOUNTAIN_RIDGE: f64 = 0.82;

    /// Creates a sampler with default scales.
    #[must_use]
    pub fn new(seed: WorldSeed) -> Self {
        Self {
            temperature: SimplexNoise::new(seed.derive(Self::TEMPERATURE_SALT)),
            humidity: SimplexNoise::new(seed.derive(Self::HUMIDITY_SALT)),
            ridge: SimplexNoise::new(seed.derive(Self::RIDGE_SALT)),
            climate_scale: 1.0 / 512.0,
            ridge_scale: 1.0 / 256.0,
        }
    }

    /// Creates a sampler with custom horizontal scales (in blocks per cycle).
    #[must_use]
    pub fn with_scales(seed: WorldSeed, climate_period: f64, ridge_period: f64) -> Self {
        let mut sampler = Self::new(seed);
        sampler.climate_scale = 1.0 / climate_period.max(1.0);
        sampler.ridge_scale = 1.0 / ridge_period.max(1.0);
        sampler
    }

    fn ridge(&self, x: i32, z: i32) -> f64 {
        self.ridge
            .ridged(f64::from(x) * self.ridge_scale, f64::from(z) * self.ridge_scale, 3)
    }

    /// Fixed classification table.
    #[must_use]
    pub fn classify(temperature: f64, humidity: f64, ridge: f64) -> Biome {
        if ridge > Self::MOUNTAIN_RIDGE {
            return Biome::Mountains;
        }
        if temperature < -0.35 {
            Biome::Snow
        } else if temperature > 0.35 && humidity < -0.1 {
            Biome::Desert
        } else if humidity > 0.15 {
            Biome::Forest
        } else {
            Biome::Plains
        }
    }
}

impl BiomeSampler for ClimateSampler {
    fn humidity(&self, x: i32, z: i32) -> f64 {
        self.humidity.octaved(
            f64::from(x) * self.climate_scale,
            f64::from(z) * self.climate_scale,
            3,
            0.5,
            2.0,
        )
    }

    fn temperature(&self, x: i32, z: i32) -> f64 {
        self.temperature.octaved(
            f64::from(x) * self.climate_scale,
            f64::from(z) * self.climate_scale,
            3,
            0.5,
            2.0,
        )
    }

    fn biome(&self, x: i32, z: i32) -> Biome {
        Self::classify(self.temperature(x, z), self.humidity(x, z), self.ridge(x, z))
    }
}

/// Memoizing wrapper around another sampler.
///
/// Caching is transparent: every answer equals the wrapped sampler's. When the
/// cache reaches `capacity` columns it is cleared wholesale.
pub struct CachedSampler<S> {
    inner: S,
    cache: RwLock<HashMap<(i32, i32), BiomeSample>>,
    capacity: usize,
}

impl<S: BiomeSampler> CachedSampler<S> {
    /// Wraps `inner`, keeping at most `capacity` columns.
    #[must_use]
    pub fn new(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::with_capacity(capacity.min(1 << 16))),
            capacity: capacity.max(1),
        }
    }

    /// Returns the wrapped sampler.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of cached columns.
    #[must_use]
    pub fn cached_columns(&self) -> usize {
        self.cache.read().len()
    }

    fn lookup(&self, x: i32, z: i32) -> BiomeSample {
        if let Some(sample) = self.cache.read().get(&(x, z)) {
            return *sample;
        }

        let sample = self.inner.sample(x, z);
        let mut cache = self.cache.write();
        if cache.len() >= self.capacity {
            cache.clear();
        }
        cache.insert((x, z), sample);
        sample
    }
}

impl<S: BiomeSampler> BiomeSampler for CachedSampler<S> {
    fn humidity(&self, x: i32, z: i32) -> f64 {
        self.lookup(x, z).humidity
    }

    fn temperature(&self, x: i32, z: i32) -> f64 {
        self.lookup(x, z).temperature
    }

    fn biome(&self, x: i32, z: i32) -> Biome {
        self.lookup(x, z).biome
    }

    fn sample(&self, x: i32, z: i32) -> BiomeSample {
        self.lookup(x, z)
    }
}
