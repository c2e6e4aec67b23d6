//! The Spool tape: records forward solves and replays them for derivatives.
//!
//! Host code solves through a [`Tape`], which logs one [`Equation`] per solve.
//! The log can then be replayed:
//!
//! - forward, to rebuild values or check them against recordings
//! - in reverse, to compute adjoint solutions for a [`Functional`]
//! - linearized forward, to propagate a [`Parameter`] direction
//!
//! What is stored along the way is decided by a checkpoint [`Strategy`];
//! anything not stored is recomputed from the nearest checkpoint.
//!
//! [`Functional`]: spool_core::Functional
//! [`Parameter`]: spool_core::Parameter

pub mod checkpoint;
pub mod equation;
pub mod export;
pub mod functional;
pub mod gradient;
pub mod storage;
pub mod verify;

mod tape;

pub use checkpoint::{CheckpointConfig, ConfigError, Strategy};
pub use equation::{Equation, InitialGuess, NonlinearRhs, RightHandSide};
pub use functional::{FinalFunctional, InitialConditionParameter, SourceParameter};
pub use gradient::{compute_gradient, compute_tlm, functional_value, initial_condition_gradient};
pub use storage::{Storage, Tier};
pub use tape::{
    AssembledOperator, AssembledVector, Clock, Problem, ReplayAction, ReplayEvent, ReplayReport,
    ReplayStats, SolveOptions, TangentLinear, Tape, TapeConfig,
};
pub use verify::{TaylorConfig, TaylorResult, taylor_test, taylor_test_second_order};
