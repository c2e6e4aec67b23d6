use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Multistage, NoCheckpoints, StoreAll, Strategy};

/// Checkpointing configuration, selected by strategy name.
///
/// Deserializes from JSON such as
/// `{"strategy": "multistage", "steps": 40, "ram": 3, "disk": 2}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum CheckpointConfig {
    /// Snapshot every registration in memory.
    #[default]
    All,

    /// Persist nothing and recompute from the start of the tape.
    None,

    /// Evenly spaced snapshots under a fixed budget.
    Multistage {
        steps: usize,
        ram: usize,
        disk: usize,
        #[serde(default)]
        verbose: bool,
    },
}

/// Errors that can occur when validating a checkpoint configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("steps must be positive")]
    ZeroSteps,

    #[error("at least one ram or disk snapshot is required")]
    NoSnapshots,

    #[error("{snapshots} snapshots do not fit in {steps} steps")]
    TooManySnapshots { snapshots: usize, steps: usize },
}

impl CheckpointConfig {
    /// Creates a validated multistage configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the budget cannot be scheduled over `steps`.
    pub fn multistage(
        steps: usize,
        ram: usize,
        disk: usize,
        verbose: bool,
    ) -> Result<Self, ConfigError> {
        validate_multistage(steps, ram, disk)?;
        Ok(Self::Multistage {
            steps,
            ram,
            disk,
            verbose,
        })
    }

    /// Returns the strategy name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::None => "none",
            Self::Multistage { .. } => "multistage",
        }
    }

    /// Returns `true` if checkpoint decisions should be logged at info level.
    #[must_use]
    pub fn verbose(&self) -> bool {
        matches!(self, Self::Multistage { verbose: true, .. })
    }

    /// Checks the configuration without building a strategy.
    ///
    /// # Errors
    ///
    /// Returns an error if a multistage budget is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Self::All | Self::None => Ok(()),
            Self::Multistage {
                steps, ram, disk, ..
            } => validate_multistage(steps, ram, disk),
        }
    }

    /// Builds the configured strategy.
    ///
    /// # Errors
    ///
    /// Returns an error if a multistage budget is invalid.
    pub fn build(&self) -> Result<Box<dyn Strategy>, ConfigError> {
        Ok(match *self {
            Self::All => Box::new(StoreAll),
            Self::None => Box::new(NoCheckpoints),
            Self::Multistage {
                steps, ram, disk, ..
            } => Box::new(Multistage::new(steps, ram, disk)?),
        })
    }
}

pub(super) fn validate_multistage(steps: usize, ram: usize, disk: usize) -> Result<(), ConfigError> {
    if steps == 0 {
        return Err(ConfigError::ZeroSteps);
    }
    let snapshots = ram + disk;
    if snapshots == 0 {
        return Err(ConfigError::NoSnapshots);
    }
    if snapshots >= steps {
        return Err(ConfigError::TooManySnapshots { snapshots, steps });
    }
    Ok(())
}
