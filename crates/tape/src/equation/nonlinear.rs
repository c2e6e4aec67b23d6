use std::rc::Rc;

use serde::{Deserialize, Serialize};
use spool_core::{Error, NonlinearProblem, Term, Values, Variable, Vector};

/// How a nonlinear solve treats the value it starts iterating from.
///
/// The converged solution of a well-posed nonlinear problem does not depend
/// on the initial guess, but recording the guess as a dependency keeps
/// replays bit-for-bit reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialGuess {
    /// Record the previous value as a dependency; its derivative is exactly
    /// zero.
    #[default]
    ZeroSensitivity,

    /// Record the previous value as a dependency; asking for its derivative
    /// is an error.
    Reject,

    /// Do not record the previous value. The solve starts from the host's
    /// default guess, both when annotated and on replay.
    Untracked,
}

/// A right-hand side that runs a convergence solve.
///
/// Evaluates to `M u*`, where `u*` solves the wrapped problem and `M` is its
/// mass operator.
#[derive(Debug, Clone)]
pub struct NonlinearRhs {
    problem: Rc<dyn NonlinearProblem>,
    coefficients: Vec<Variable>,
    initial_guess: Option<Variable>,
    policy: InitialGuess,
}

impl NonlinearRhs {
    /// Wraps a problem with its resolved coefficient dependencies.
    ///
    /// Under [`InitialGuess::Untracked`] the `initial_guess` is discarded.
    #[must_use]
    pub fn new(
        problem: Rc<dyn NonlinearProblem>,
        coefficients: Vec<Variable>,
        initial_guess: Option<Variable>,
        policy: InitialGuess,
    ) -> Self {
        let initial_guess = match policy {
            InitialGuess::Untracked => None,
            InitialGuess::ZeroSensitivity | InitialGuess::Reject => initial_guess,
        };
        Self {
            problem,
            coefficients,
            initial_guess,
            policy,
        }
    }

    #[must_use]
    pub fn problem(&self) -> &Rc<dyn NonlinearProblem> {
        &self.problem
    }

    #[must_use]
    pub fn initial_guess(&self) -> Option<&Variable> {
        self.initial_guess.as_ref()
    }

    #[must_use]
    pub fn policy(&self) -> InitialGuess {
        self.policy
    }

    /// Returns the coefficients followed by the initial guess edge, if any.
    #[must_use]
    pub fn dependencies(&self) -> Vec<Variable> {
        self.coefficients
            .iter()
            .chain(self.initial_guess.iter())
            .cloned()
            .collect()
    }

    pub(crate) fn evaluate(&self, values: &Values) -> Result<Term, Error> {
        let guess = self
            .initial_guess
            .as_ref()
            .and_then(|variable| values.variable(variable));
        let solution = self.problem.solve(values, guess)?;
        self.problem.mass().apply(Term::from(solution))
    }

    pub(crate) fn derivative_action(
        &self,
        values: &Values,
        solution: &Vector,
        variable: &Variable,
        contraction: &Vector,
        hermitian: bool,
    ) -> Result<Term, Error> {
        let is_guess_edge = self.initial_guess.as_ref() == Some(variable)
            && !self.coefficients.contains(variable);

        if !is_guess_edge {
            return self
                .problem
                .derivative_action(values, solution, variable, contraction, hermitian);
        }

        match self.policy {
            InitialGuess::Reject => Err(Error::not_implemented(format!(
                "sensitivity to the initial guess {variable}"
            ))),
            InitialGuess::ZeroSensitivity | InitialGuess::Untracked => {
                Ok(Term::zero(contraction.len()))
            }
        }
    }
}
