//! Checkpoint strategies.
//!
//! At every registration the tape asks its [`Strategy`] whether the values
//! known at that point should be persisted, and in which tier. A value needed
//! later that was not persisted is recomputed by replaying forward from the
//! nearest checkpoint at or before the equation that produced it.

mod config;

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

pub use config::{CheckpointConfig, ConfigError};

/// Where a checkpoint snapshot is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persistence {
    None,
    Memory,
    Disk,
}

/// Decides which registrations take a checkpoint snapshot.
pub trait Strategy: fmt::Debug {
    /// The name the strategy is selected by.
    fn name(&self) -> &str;

    /// The number of equations the strategy was configured for, if it has a
    /// fixed schedule.
    fn total_steps(&self) -> Option<usize>;

    /// Returns how the snapshot at registration `index` is persisted.
    fn persistence(&self, index: usize) -> Persistence;
}

/// Keeps a memory snapshot at every registration.
///
/// Nothing ever needs recomputing, at the cost of holding every value.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreAll;

impl Strategy for StoreAll {
    fn name(&self) -> &str {
        "all"
    }

    fn total_steps(&self) -> Option<usize> {
        None
    }

    fn persistence(&self, _index: usize) -> Persistence {
        Persistence::Memory
    }
}

/// Never persists anything.
///
/// Every value needed during reverse replay is recomputed from the start of
/// the tape.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoints;

impl Strategy for NoCheckpoints {
    fn name(&self) -> &str {
        "none"
    }

    fn total_steps(&self) -> Option<usize> {
        None
    }

    fn persistence(&self, _index: usize) -> Persistence {
        Persistence::None
    }
}

/// A fixed schedule of evenly spaced checkpoints split across two tiers.
///
/// With `steps` equations and `ram + disk` snapshots, snapshot `k` sits at
/// `round((k + 1) * steps / (ram + disk + 1))`, clamped to `[1, steps - 1]`.
/// Index zero is never scheduled because nothing is known before the first
/// equation. The earliest `disk` positions go to disk and the next `ram` to
/// memory; positions that collapse onto each other are taken once, so the
/// snapshot count never exceeds the budget.
#[derive(Debug, Clone)]
pub struct Multistage {
    steps: usize,
    schedule: BTreeMap<usize, Persistence>,
}

impl Multistage {
    /// Builds the schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if `steps` is zero, no snapshots are allowed, or there
    /// are at least as many snapshots as steps.
    pub fn new(steps: usize, ram: usize, disk: usize) -> Result<Self, ConfigError> {
        config::validate_multistage(steps, ram, disk)?;

        let snapshots = ram + disk;
        let mut positions: Vec<usize> = (0..snapshots)
            .map(|k| {
                let numerator = (k + 1) * steps;
                let denominator = snapshots + 1;
                let rounded = (2 * numerator + denominator) / (2 * denominator);
                rounded.clamp(1, steps.saturating_sub(1).max(1))
            })
            .filter(|&position| position < steps)
            .collect();
        positions.dedup();

        let schedule = positions
            .into_iter()
            .enumerate()
            .map(|(k, position)| {
                let tier = if k < disk {
                    Persistence::Disk
                } else {
                    Persistence::Memory
                };
                (position, tier)
            })
            .collect();

        Ok(Self { steps, schedule })
    }

    /// Returns the scheduled positions and their tiers in ascending order.
    pub fn schedule(&self) -> impl Iterator<Item = (usize, Persistence)> + '_ {
        self.schedule.iter().map(|(&index, &tier)| (index, tier))
    }
}

impl Strategy for Multistage {
    fn name(&self) -> &str {
        "multistage"
    }

    fn total_steps(&self) -> Option<usize> {
        Some(self.steps)
    }

    fn persistence(&self, index: usize) -> Persistence {
        self.schedule
            .get(&index)
            .copied()
            .unwrap_or(Persistence::None)
    }
}
