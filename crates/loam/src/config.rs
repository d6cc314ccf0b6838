//! # World Configuration
//!
//! Everything needed to assemble a [`World`](crate::World), loaded once at
//! startup from TOML.
//!
//! ```toml
//! seed = "abc"
//! sea_level = 8
//! cache_columns = 65536
//!
//! [pipeline]
//! worker_threads = 4
//!
//! [pipeline.bounds]
//! min_y = -1
//! max_y = 2
//! horizontal_radius = 32
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use loam_pipeline::{PipelineConfig, PipelineError};
use loam_procedural::TerrainGenerator;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading a world config.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The document is not valid TOML for a world config.
    #[error("malformed world config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The pipeline section failed validation.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A world-level field is out of range.
    #[error("invalid world config: {0}")]
    Invalid(String),
}

/// Result type for config loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// World configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldConfig {
    /// World seed text. Same text, same world.
    pub seed: String,
    /// Sea level (absolute block Y).
    pub sea_level: i32,
    /// Climate columns memoized by the biome sampler; 0 disables caching.
    pub cache_columns: usize,
    /// Pipeline settings.
    pub pipeline: PipelineConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: "loam".to_string(),
            sea_level: TerrainGenerator::DEFAULT_SEA_LEVEL,
            cache_columns: 1 << 16,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl WorldConfig {
    /// Production preset with the given seed.
    #[must_use]
    pub fn production(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            cache_columns: 1 << 20,
            pipeline: PipelineConfig::production(),
            ..Self::default()
        }
    }

    /// Reads and validates a config file.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, otherwise as [`Self::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!("loaded world config from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// `Parse` on malformed TOML, `Pipeline` or `Invalid` on bad values.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// The first failing field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.seed.is_empty() {
            return Err(ConfigError::Invalid("seed must not be empty".to_string()));
        }
        self.pipeline.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_pipeline::WorldBounds;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = WorldConfig::from_toml_str("seed = \"abc\"").unwrap();
        assert_eq!(config.seed, "abc");
        assert_eq!(config.sea_level, TerrainGenerator::DEFAULT_SEA_LEVEL);
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_nested_sections() {
        let config = WorldConfig::from_toml_str(
            r#"
            seed = "flat"
            sea_level = 4
            cache_columns = 0

            [pipeline]
            worker_threads = 2

            [pipeline.bounds]
            min_y = 0
            max_y = 3
            horizontal_radius = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_columns, 0);
        assert_eq!(config.pipeline.worker_threads, 2);
        assert_eq!(
            config.pipeline.bounds,
            WorldBounds {
                min_y: 0,
                max_y: 3,
                horizontal_radius: Some(10),
            }
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            WorldConfig::from_toml_str("seed = \"\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            WorldConfig::from_toml_str("[pipeline.bounds]\nmin_y = 5\nmax_y = 1"),
            Err(ConfigError::Pipeline(_))
        ));
        assert!(matches!(
            WorldConfig::from_toml_str("seeed = \"typo\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = WorldConfig::load("/nonexistent/loam/world.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_production_preset() {
        let config = WorldConfig::production("abc");
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.worker_threads, 8);
    }
}
