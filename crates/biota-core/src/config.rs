//! Simulation configuration surface.
//!
//! One [`SimulationConfig`] object carries every recognized option. The
//! config is validated once at engine construction; invalid values fail fast
//! rather than surfacing mid-run.

use thiserror::Error;

/// Errors raised by [`SimulationConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Label-matching tolerance must be 1, 2, or 3.
    #[error("label tolerance {0} outside 1..=3")]
    ToleranceOutOfRange(u8),
    /// Every encoder interval must be at least 1.
    #[error("encoder interval `{name}` must be >= 1")]
    ZeroInterval {
        /// Name of the offending interval option.
        name: &'static str,
    },
    /// The grid shape failed geometric validation.
    #[error("invalid shape: {0}")]
    InvalidShape(#[from] crate::geometry::GeometryError),
}

/// Fuzzy label-matching knobs (defaults in parentheses).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatchingConfig {
    /// Maximum Hamming distance considered a match (2).
    pub tolerance: u8,
    /// Score penalty for labels owned by another organism or mid-transfer (100).
    pub foreign_penalty: u64,
    /// Score weight per bit of Hamming distance (50).
    pub hamming_weight: u64,
    /// Half-weight distance for stochastic selection among own exact matches;
    /// 0 selects deterministically (0).
    pub selection_spread: u64,
}

impl Default for LabelMatchingConfig {
    fn default() -> Self {
        Self {
            tolerance: 2,
            foreign_penalty: 100,
            hamming_weight: 50,
            selection_spread: 0,
        }
    }
}

/// Delta-encoder cadence. All intervals are in samples and must be >= 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Samples between two accumulated deltas.
    pub accumulated_delta_interval: u64,
    /// Accumulated deltas between two snapshots.
    pub snapshot_interval: u64,
    /// Snapshots per chunk.
    pub chunk_interval: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            accumulated_delta_interval: 5,
            snapshot_interval: 4,
            chunk_interval: 2,
        }
    }
}

impl EncoderConfig {
    /// Samples covered by one snapshot period.
    #[must_use]
    pub fn samples_per_snapshot(&self) -> u64 {
        self.accumulated_delta_interval * self.snapshot_interval
    }

    /// Samples covered by one chunk.
    #[must_use]
    pub fn samples_per_chunk(&self) -> u64 {
        self.samples_per_snapshot() * self.chunk_interval
    }
}

/// Engine scalars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Root RNG seed.
    pub seed: u64,
    /// Energy charged when an instruction fails.
    pub failure_energy_cost: i64,
    /// Energy charged when an instruction commits.
    pub instruction_energy_cost: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            failure_energy_cost: 1,
            instruction_energy_cost: 1,
        }
    }
}

/// Complete configuration for one simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Grid extents, one entry per axis.
    pub shape: Vec<u32>,
    /// Fuzzy label-matching knobs.
    pub label_matching: LabelMatchingConfig,
    /// Delta-encoder cadence.
    pub encoder: EncoderConfig,
    /// Engine scalars.
    pub engine: EngineConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            shape: vec![64, 64],
            label_matching: LabelMatchingConfig::default(),
            encoder: EncoderConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Checks every option against its domain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::geometry::Shape::new(&self.shape)?;
        if !(1..=3).contains(&self.label_matching.tolerance) {
            return Err(ConfigError::ToleranceOutOfRange(
                self.label_matching.tolerance,
            ));
        }
        if self.encoder.accumulated_delta_interval == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "accumulated_delta_interval",
            });
        }
        if self.encoder.snapshot_interval == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "snapshot_interval",
            });
        }
        if self.encoder.chunk_interval == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "chunk_interval",
            });
        }
        Ok(())
    }
}
