//! # Pipeline Configuration
//!
//! Loaded once at startup, usually as the `[pipeline]` table of a world file.
//!
//! ```toml
//! worker_threads = 4
//! event_capacity = 1024
//!
//! [bounds]
//! min_y = -4
//! max_y = 8
//! horizontal_radius = 512
//! ```

use loam_procedural::ChunkPos;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Vertical and horizontal limits of the world, in chunk coordinates.
///
/// Positions outside the bounds are permanently absent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldBounds {
    /// Lowest chunk Y (inclusive).
    pub min_y: i32,
    /// Highest chunk Y (inclusive).
    pub max_y: i32,
    /// Maximum |x| and |z|; `None` for an unbounded world.
    pub horizontal_radius: Option<i32>,
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            min_y: -4,
            max_y: 8,
            horizontal_radius: None,
        }
    }
}

impl WorldBounds {
    /// Bounds that admit every position.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            min_y: i32::MIN,
            max_y: i32::MAX,
            horizontal_radius: None,
        }
    }

    /// Whether `pos` lies inside the world.
    #[must_use]
    pub fn contains(&self, pos: ChunkPos) -> bool {
        if pos.y < self.min_y || pos.y > self.max_y {
            return false;
        }
        match self.horizontal_radius {
            Some(r) => pos.x.unsigned_abs() <= r.unsigned_abs() && pos.z.unsigned_abs() <= r.unsigned_abs(),
            None => true,
        }
    }
}

/// Configuration for the generation pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Worker threads; 0 means one per available core.
    pub worker_threads: usize,
    /// Capacity of the event channel. Events are dropped when it is full.
    pub event_capacity: usize,
    /// World limits.
    pub bounds: WorldBounds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            event_capacity: 1024,
            bounds: WorldBounds::default(),
        }
    }
}

impl PipelineConfig {
    /// Production config: fixed pool, deep event buffer for slow consumers.
    #[must_use]
    pub const fn production() -> Self {
        Self {
            worker_threads: 8,
            event_capacity: 16_384,
            bounds: WorldBounds {
                min_y: -4,
                max_y: 8,
                horizontal_radius: None,
            },
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on malformed TOML or failed validation.
    pub fn from_toml_str(text: &str) -> PipelineResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` describing the first bad field.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.event_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.bounds.min_y > self.bounds.max_y {
            return Err(PipelineError::InvalidConfig(format!(
                "bounds.min_y ({}) is above bounds.max_y ({})",
                self.bounds.min_y, self.bounds.max_y
            )));
        }
        if let Some(r) = self.bounds.horizontal_radius {
            if r < 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "bounds.horizontal_radius must be non-negative, got {r}"
                )));
            }
        }
        Ok(())
    }

    /// Worker count after resolving 0 to the machine's parallelism.
    #[must_use]
    pub fn resolved_workers(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(config.resolved_workers() >= 1);
    }

    #[test]
    fn test_parse_full_document() {
        let text = r#"
            worker_threads = 3
            event_capacity = 16

            [bounds]
            min_y = -1
            max_y = 1
            horizontal_radius = 10
        "#;
        let config = PipelineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.resolved_workers(), 3);
        assert_eq!(config.event_capacity, 16);
        assert!(config.bounds.contains(ChunkPos::new(-10, 1, 10)));
        assert!(!config.bounds.contains(ChunkPos::new(11, 0, 0)));
        assert!(!config.bounds.contains(ChunkPos::new(0, 2, 0)));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            PipelineConfig::from_toml_str("event_capacity = 0"),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("[bounds]\nmin_y = 3\nmax_y = 1"),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("[bounds]\nhorizontal_radius = -2"),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("workers = 2"),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unbounded_contains_everything() {
        let bounds = WorldBounds::unbounded();
        assert!(bounds.contains(ChunkPos::new(i32::MIN, i32::MAX, i32::MIN)));
    }

    #[test]
    fn test_production_is_valid() {
        PipelineConfig::production().validate().unwrap();
    }
}
