use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointConfig, ConfigError};

/// Configuration for a [`Tape`](crate::Tape).
///
/// Loads from JSON, for example
/// `{"checkpoint": {"strategy": "multistage", "steps": 40, "ram": 3, "disk": 2}, "disk_dir": "/scratch/run-7"}`.
/// Both fields are optional.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TapeConfig {
    #[serde(default)]
    checkpoint: CheckpointConfig,

    #[serde(default)]
    disk_dir: Option<PathBuf>,
}

impl TapeConfig {
    /// Creates a config with a validated checkpoint configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint budget is invalid.
    pub fn new(checkpoint: CheckpointConfig) -> Result<Self, ConfigError> {
        checkpoint.validate()?;
        Ok(Self {
            checkpoint,
            disk_dir: None,
        })
    }

    /// Parses and validates a JSON config.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the checkpoint budget is
    /// invalid.
    pub fn from_json(json: &str) -> Result<Self, spool_core::Error> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| spool_core::Error::invalid_inputs(format!("tape config: {e}")))?;
        config
            .checkpoint
            .validate()
            .map_err(|e| spool_core::Error::invalid_inputs(format!("tape config: {e}")))?;
        Ok(config)
    }

    /// Writes disk checkpoints to `dir` instead of a temporary directory.
    #[must_use]
    pub fn with_disk_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.disk_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn checkpoint(&self) -> &CheckpointConfig {
        &self.checkpoint
    }

    #[must_use]
    pub fn disk_dir(&self) -> Option<&Path> {
        self.disk_dir.as_deref()
    }

    pub(crate) fn set_checkpoint(&mut self, checkpoint: CheckpointConfig) {
        self.checkpoint = checkpoint;
    }
}
