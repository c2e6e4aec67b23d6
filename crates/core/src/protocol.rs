//! Callback protocol between the tape and host numerics.
//!
//! The tape never looks inside host values. Everything it knows about an
//! equation comes through these traits: a [`Block`] supplies the diagonal
//! operator, an [`Rhs`] supplies the right-hand side, and a
//! [`NonlinearProblem`] wraps a convergence solve so it can be recorded as a
//! single linear equation.
//!
//! All three receive a [`Values`] map holding the current value of each
//! declared dependency.

use std::fmt;

use crate::{Error, Operator, Term, Variable, Vector};

/// Dependency values handed to host callbacks.
#[derive(Debug, Clone, Default)]
pub struct Values {
    entries: Vec<(Variable, Vector)>,
}

impl Values {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any existing value for the same variable.
    pub fn insert(&mut self, variable: Variable, value: Vector) {
        match self.entries.iter_mut().find(|(v, _)| *v == variable) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((variable, value)),
        }
    }

    /// Returns the value for `name`.
    ///
    /// When several time levels of the same quantity are present, the most
    /// recent one is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInputs`] if no value for `name` is present,
    /// which usually means the callback forgot to declare the coefficient.
    pub fn get(&self, name: &str) -> Result<&Vector, Error> {
        self.entries
            .iter()
            .filter(|(v, _)| v.name() == name)
            .max_by_key(|(v, _)| (v.timestep(), v.iteration()))
            .map(|(_, value)| value)
            .ok_or_else(|| Error::invalid_inputs(format!("no value for coefficient `{name}`")))
    }

    /// Returns the value of an exact variable, if present.
    #[must_use]
    pub fn variable(&self, variable: &Variable) -> Option<&Vector> {
        self.entries
            .iter()
            .find(|(v, _)| v == variable)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn contains(&self, variable: &Variable) -> bool {
        self.variable(variable).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.entries.iter().map(|(v, _)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Vector)> {
        self.entries.iter().map(|(v, value)| (v, value))
    }
}

impl FromIterator<(Variable, Vector)> for Values {
    fn from_iter<I: IntoIterator<Item = (Variable, Vector)>>(iter: I) -> Self {
        let mut values = Self::new();
        for (variable, value) in iter {
            values.insert(variable, value);
        }
        values
    }
}

/// A diagonal operator block of an equation.
///
/// An equation solves `sum(blocks) * target = rhs`. Each block assembles its
/// operator from the values of the coefficients it declares.
pub trait Block: fmt::Debug {
    /// A short label used in logs and exports.
    fn name(&self) -> &str;

    /// Names of the quantities this block's operator depends on.
    fn coefficients(&self) -> Vec<String> {
        Vec::new()
    }

    /// Assembles `coefficient * A` (or its adjoint when `hermitian`).
    ///
    /// The returned term is added to the right-hand side of the solve; it is
    /// where lifted boundary data goes and is zero for homogeneous blocks.
    /// With `hermitian` set, boundary conditions must be homogenized.
    ///
    /// # Errors
    ///
    /// Returns an error if assembly fails.
    fn assemble(
        &self,
        values: &Values,
        hermitian: bool,
        coefficient: f64,
    ) -> Result<(Operator, Term), Error>;

    /// Applies `coefficient * A` (or its adjoint) to `input` without keeping
    /// the assembled operator.
    ///
    /// # Errors
    ///
    /// Returns an error if assembly or application fails.
    fn action(
        &self,
        values: &Values,
        hermitian: bool,
        coefficient: f64,
        input: &Vector,
    ) -> Result<Vector, Error> {
        let (operator, _) = self.assemble(values, hermitian, coefficient)?;
        operator.apply(Term::from(input.clone()))?.materialize()
    }

    /// Returns `coefficient * (dA/d variable . contraction)` applied to
    /// `input`, transposed when `hermitian` is set.
    ///
    /// Required whenever the operator depends on an earlier variable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotImplemented`] unless the block provides it.
    fn derivative_action(
        &self,
        values: &Values,
        variable: &Variable,
        contraction: &Vector,
        hermitian: bool,
        input: &Vector,
        coefficient: f64,
    ) -> Result<Vector, Error> {
        let _ = (values, contraction, hermitian, input, coefficient);
        Err(Error::not_implemented(format!(
            "derivative of block `{}` with respect to {variable}",
            self.name()
        )))
    }
}

/// The right-hand side of an equation.
pub trait Rhs: fmt::Debug {
    /// Names of the quantities the right-hand side depends on.
    fn coefficients(&self) -> Vec<String>;

    /// Evaluates the right-hand side.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails.
    fn evaluate(&self, values: &Values) -> Result<Term, Error>;

    /// Returns `(db/d variable) contraction`, or its transpose applied to
    /// `contraction` when `hermitian` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotImplemented`] when the right-hand side has no
    /// meaningful derivative, such as a literal constant source.
    fn derivative_action(
        &self,
        values: &Values,
        variable: &Variable,
        contraction: &Vector,
        hermitian: bool,
    ) -> Result<Term, Error> {
        let _ = (values, contraction, hermitian);
        Err(Error::not_implemented(format!(
            "right-hand side derivative with respect to {variable}"
        )))
    }
}

/// A nonlinear solve `F(u; coefficients) = 0`.
///
/// The tape records it as `M u = M u*`, where `u*` is the converged solution
/// and `M` the mass operator, so the diagonal block stays linear and all of
/// the nonlinearity lives in the right-hand side.
pub trait NonlinearProblem: fmt::Debug {
    /// Names of the quantities `F` depends on, excluding the unknown.
    fn coefficients(&self) -> Vec<String>;

    /// The identity-like mass operator.
    fn mass(&self) -> Operator;

    /// Runs the convergence solve.
    ///
    /// `initial_guess` is the previous value of the unknown when one exists;
    /// `None` asks the host to start from its own default.
    ///
    /// # Errors
    ///
    /// Returns an error if the solve fails to converge.
    fn solve(&self, values: &Values, initial_guess: Option<&Vector>) -> Result<Vector, Error>;

    /// Returns `d(M u*)/d variable . contraction`, or its transpose applied to
    /// `contraction` when `hermitian` is set.
    ///
    /// `solution` is the converged `u*` for the recorded step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotImplemented`] unless the problem provides it.
    fn derivative_action(
        &self,
        values: &Values,
        solution: &Vector,
        variable: &Variable,
        contraction: &Vector,
        hermitian: bool,
    ) -> Result<Term, Error> {
        let _ = (values, solution, contraction, hermitian);
        Err(Error::not_implemented(format!(
            "nonlinear solve derivative with respect to {variable}"
        )))
    }
}
