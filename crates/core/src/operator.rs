use std::{fmt, rc::Rc};

use crate::{DenseMatrix, Error, Term, Vector};

/// A host-owned linear operator the tape can apply and invert.
///
/// Implement this when the host keeps its own (sparse, distributed, matrix
/// free) operators. The tape only ever calls these two operations.
pub trait LinearOperator: fmt::Debug {
    fn dim(&self) -> usize;

    /// Returns `A x`.
    ///
    /// # Errors
    ///
    /// Returns an error if the application fails.
    fn apply(&self, x: &Vector) -> Result<Vector, Error>;

    /// Returns `x` such that `A x = b`.
    ///
    /// # Errors
    ///
    /// Returns an error if the solve fails.
    fn solve(&self, b: &Vector) -> Result<Vector, Error>;
}

/// The diagonal operator of an equation.
#[derive(Debug, Clone)]
pub enum Operator {
    /// The identity of the given dimension; never materialized.
    Identity(usize),
    Dense(DenseMatrix),
    Host(Rc<dyn LinearOperator>),
}

impl Operator {
    pub fn host(op: impl LinearOperator + 'static) -> Self {
        Self::Host(Rc::new(op))
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        match self {
            Self::Identity(dim) => *dim,
            Self::Dense(m) => m.dim(),
            Self::Host(op) => op.dim(),
        }
    }

    /// Returns `alpha * self`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotImplemented`] when scaling a host operator by
    /// anything other than one.
    pub fn scaled(self, alpha: f64) -> Result<Self, Error> {
        #[allow(clippy::float_cmp)]
        if alpha == 1.0 {
            return Ok(self);
        }
        match self {
            Self::Identity(dim) => Ok(Self::Dense(DenseMatrix::identity(dim).scaled(alpha))),
            Self::Dense(m) => Ok(Self::Dense(m.scaled(alpha))),
            Self::Host(_) => Err(Error::not_implemented("scaling a host operator")),
        }
    }

    /// Returns `self + alpha * other`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimensions differ, or
    /// [`Error::NotImplemented`] if either side is a host operator.
    pub fn add_scaled(self, alpha: f64, other: Operator) -> Result<Self, Error> {
        let (a, b) = match (self, other) {
            (Self::Identity(n), Self::Identity(m)) => {
                (DenseMatrix::identity(n), DenseMatrix::identity(m))
            }
            (Self::Dense(a), Self::Identity(m)) => (a, DenseMatrix::identity(m)),
            (Self::Identity(n), Self::Dense(b)) => (DenseMatrix::identity(n), b),
            (Self::Dense(a), Self::Dense(b)) => (a, b),
            (Self::Host(_), _) | (_, Self::Host(_)) => {
                return Err(Error::not_implemented("summing host operators"));
            }
        };
        Ok(Self::Dense(a.add_scaled(alpha, &b)?))
    }

    /// Applies the operator to a term.
    ///
    /// The identity passes the term through untouched, so forms stay lazy.
    ///
    /// # Errors
    ///
    /// Returns an error if a form fails to assemble or the application fails.
    pub fn apply(&self, x: Term) -> Result<Term, Error> {
        match self {
            Self::Identity(_) => Ok(x),
            Self::Dense(m) => Ok(Term::Vector(m.matvec(&x.materialize()?)?)),
            Self::Host(op) => Ok(Term::Vector(op.apply(&x.materialize()?)?)),
        }
    }

    /// Solves `self * x = b`.
    ///
    /// # Errors
    ///
    /// Returns an error if a form fails to assemble, the dimensions differ,
    /// or the solve fails.
    pub fn solve(&self, b: Term) -> Result<Vector, Error> {
        let b = b.materialize()?;
        let x = match self {
            Self::Identity(_) => b,
            Self::Dense(m) => m.solve(&b)?,
            Self::Host(op) => op.solve(&b)?,
        };
        if x.len() != self.dim() {
            return Err(Error::invalid_inputs(format!(
                "operator of dimension {} produced a vector of length {}",
                self.dim(),
                x.len()
            )));
        }
        Ok(x)
    }
}
