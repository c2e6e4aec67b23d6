//! Forward, adjoint, and tangent-linear replay of a recorded tape.

mod adjoint;
mod forward;
mod recompute;
mod tlm;

use serde::Serialize;

pub(crate) use adjoint::AdjointPass;
pub use forward::{ReplayAction, ReplayEvent, ReplayReport};
pub(crate) use recompute::ValueCache;
pub use tlm::TangentLinear;

/// Counts of the work done by replays since the tape was created or reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    /// Equations re-executed to rebuild values that were not stored.
    pub recomputed: usize,
    pub adjoint_solves: usize,
    pub tangent_solves: usize,
    /// Reverse or tangent steps skipped because their source was zero.
    pub skipped: usize,
}
