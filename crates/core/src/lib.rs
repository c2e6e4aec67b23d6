//! Core types and traits for the Spool tape.
//!
//! This crate defines the vocabulary shared by the tape engine and host code:
//!
//! - [`Variable`] and [`VariableStore`]: graph node identities and the
//!   per-name timestep counter that issues them
//! - [`Vector`], [`DenseMatrix`], [`Term`], [`Operator`]: the values that
//!   cross the callback boundary
//! - [`Block`], [`Rhs`], [`NonlinearProblem`]: how host numerics plug in
//! - [`Functional`], [`Parameter`]: objectives and derivative directions
//! - [`Observer`]: receives replay events and optionally stops the replay
//! - [`Error`]: the shared failure taxonomy

mod error;
mod functional;
mod linalg;
mod observer;
mod operator;
mod protocol;
mod store;
mod term;
mod variable;

pub use error::Error;
pub use functional::{Functional, Parameter};
pub use linalg::{DenseMatrix, LinalgError, Vector};
pub use observer::Observer;
pub use operator::{LinearOperator, Operator};
pub use protocol::{Block, NonlinearProblem, Rhs, Values};
pub use store::VariableStore;
pub use term::{Assemble, Form, Term};
pub use variable::{Kind, Variable};
