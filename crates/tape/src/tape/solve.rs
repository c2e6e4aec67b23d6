use std::rc::Rc;

use spool_core::{Block, Error, NonlinearProblem, Rhs, Term, Variable, Vector};
use tracing::debug;

use super::{AssembledOperator, AssembledVector, Tape, replay::ValueCache};
use crate::{
    equation::{
        AssignRhs, ConstantRhs, Equation, IdentityBlock, InitialGuess, NonlinearRhs,
        RightHandSide,
    },
    storage::Tier,
};

/// What the host asks the tape to solve.
#[derive(Debug, Clone)]
pub enum Problem {
    /// `sum(blocks) * unknown = rhs`.
    Linear {
        blocks: Vec<Rc<dyn Block>>,
        rhs: Rc<dyn Rhs>,
    },
    /// A host-solved nonlinear system `F(unknown) = 0`.
    Nonlinear(Rc<dyn NonlinearProblem>),
    /// A linear system from the tape's tracked assembly path.
    Assembled {
        operator: AssembledOperator,
        rhs: AssembledVector,
    },
}

impl Problem {
    /// A linear problem with a single block.
    pub fn linear(block: impl Block + 'static, rhs: impl Rhs + 'static) -> Self {
        Self::Linear {
            blocks: vec![Rc::new(block)],
            rhs: Rc::new(rhs),
        }
    }

    pub fn nonlinear(problem: impl NonlinearProblem + 'static) -> Self {
        Self::Nonlinear(Rc::new(problem))
    }

    fn linear_parts(&self, tape: &Tape) -> Result<Option<(Vec<Rc<dyn Block>>, Rc<dyn Rhs>)>, Error> {
        match self {
            Self::Linear { blocks, rhs } => Ok(Some((blocks.clone(), Rc::clone(rhs)))),
            Self::Assembled { operator, rhs } => Ok(Some((
                vec![tape.assembled_block(operator)?],
                tape.assembled_rhs(rhs)?,
            ))),
            Self::Nonlinear(_) => Ok(None),
        }
    }
}

/// Options for [`Tape::solve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolveOptions {
    /// Record the solve on the tape.
    pub annotate: bool,
    /// Also store the solution explicitly, for later comparison by
    /// [`Tape::check_replay`].
    pub record: bool,
    /// How a nonlinear solve's initial guess enters the derivative.
    pub initial_guess: InitialGuess,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            annotate: true,
            record: false,
            initial_guess: InitialGuess::default(),
        }
    }
}

impl SolveOptions {
    /// A pass-through solve that leaves the tape untouched.
    #[must_use]
    pub fn untracked() -> Self {
        Self {
            annotate: false,
            ..Self::default()
        }
    }

    /// An annotated solve whose solution is also stored explicitly.
    #[must_use]
    pub fn recorded() -> Self {
        Self {
            record: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_initial_guess(mut self, policy: InitialGuess) -> Self {
        self.initial_guess = policy;
        self
    }
}

impl Tape {
    /// Solves `problem` for `unknown` and publishes the solution as the host
    /// value of `unknown`.
    ///
    /// An annotated solve resolves every coefficient the problem names to its
    /// current variable, recording host values as constants where needed, and
    /// registers one equation for the new time level of `unknown`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInputs`] if an assembled operator did not come
    /// from this tape or a host value is missing from an unannotated solve,
    /// [`Error::ConsistencyViolation`] if a coefficient has neither a recorded
    /// nor a host value, or the host's own error if a callback fails.
    pub fn solve(&mut self, problem: &Problem, unknown: &str, options: SolveOptions) -> Result<Vector, Error> {
        if !options.annotate {
            return self.solve_untracked(problem, unknown);
        }

        let equation = match problem.linear_parts(self)? {
            Some((blocks, rhs)) => {
                let rhs_dependencies = self.resolve_all(&rhs.coefficients(), options.record)?;
                let mut entries = Vec::with_capacity(blocks.len());
                for block in blocks {
                    let dependencies = self.resolve_all(&block.coefficients(), options.record)?;
                    entries.push((block, dependencies));
                }
                let target = self.store.upcoming(unknown);
                let rhs = RightHandSide::Plain {
                    rhs,
                    dependencies: rhs_dependencies,
                };
                entries
                    .into_iter()
                    .fold(Equation::new(target, 0, rhs), |equation, (block, dependencies)| {
                        equation.with_block(block, dependencies)
                    })
            }
            None => {
                let Problem::Nonlinear(nonlinear) = problem else {
                    return Err(Error::invalid_inputs("unclassified solve"));
                };
                self.nonlinear_equation(nonlinear, unknown, options)?
            }
        };

        self.record_solution(equation, options.record)
    }

    fn nonlinear_equation(
        &mut self,
        problem: &Rc<dyn NonlinearProblem>,
        unknown: &str,
        options: SolveOptions,
    ) -> Result<Equation, Error> {
        let names: Vec<String> = problem
            .coefficients()
            .into_iter()
            .filter(|name| name != unknown)
            .collect();
        let coefficients = self.resolve_all(&names, options.record)?;

        let guess = if options.initial_guess != InitialGuess::Untracked && self.store.contains(unknown) {
            Some(self.resolve(unknown, options.record)?)
        } else {
            None
        };

        let target = self.store.upcoming(unknown);
        let rhs = NonlinearRhs::new(Rc::clone(problem), coefficients, guess, options.initial_guess);
        Ok(Equation::nonlinear(target, 0, rhs))
    }

    fn solve_untracked(&mut self, problem: &Problem, unknown: &str) -> Result<Vector, Error> {
        let value = match problem {
            Problem::Linear { blocks, rhs } => {
                let mut names = rhs.coefficients();
                names.extend(blocks.iter().flat_map(|block| block.coefficients()));
                let values = self.field_values(&names)?;
                let equation = blocks.iter().fold(
                    Equation::new(
                        Variable::forward(unknown, 0, 0),
                        0,
                        RightHandSide::Plain {
                            rhs: Rc::clone(rhs),
                            dependencies: Vec::new(),
                        },
                    ),
                    |equation, block| equation.with_block(Rc::clone(block), Vec::new()),
                );
                equation.forward(&values)?
            }
            Problem::Nonlinear(nonlinear) => {
                let names: Vec<String> = nonlinear
                    .coefficients()
                    .into_iter()
                    .filter(|name| name != unknown)
                    .collect();
                let values = self.field_values(&names)?;
                nonlinear.solve(&values, self.fields.get(unknown))?
            }
            Problem::Assembled { operator, rhs } => operator
                .operator()
                .solve(Term::Vector(rhs.value().clone()))?,
        };
        debug!(unknown, "solved without annotation");
        self.write_field(unknown, value.clone());
        Ok(value)
    }

    /// Copies `source` into `target`.
    ///
    /// The copy is recorded as an identity equation when `annotate` is set
    /// and the tape tracks the current value of `source`. Otherwise it is a
    /// host write that the next annotated read of `target` records as a
    /// constant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInputs`] if `source` has no value at all.
    pub fn assign(&mut self, target: &str, source: &str, annotate: bool) -> Result<Vector, Error> {
        let tracked = annotate && self.store.contains(source) && !self.host_writes.contains(source);
        if !tracked {
            let value = self
                .fields
                .get(source)
                .cloned()
                .ok_or_else(|| Error::invalid_inputs(format!("`{source}` has no value to assign")))?;
            debug!(name = target, source, "untracked assignment");
            self.write_field(target, value.clone());
            return Ok(value);
        }

        let source_variable = self.store.lookup(source)?;
        let dim = self
            .value_of(&source_variable, &mut ValueCache::new())?
            .len();
        let equation = Equation::new(
            self.store.upcoming(target),
            dim,
            RightHandSide::plain(AssignRhs::new(source), vec![source_variable]),
        )
        .with_block(Rc::new(IdentityBlock::new(dim)), Vec::new());
        self.record_solution(equation, false)
    }

    fn resolve_all(&mut self, names: &[String], record: bool) -> Result<Vec<Variable>, Error> {
        names.iter().map(|name| self.resolve(name, record)).collect()
    }

    /// Returns the variable holding the current value of `name`, recording
    /// a pending host value first.
    fn resolve(&mut self, name: &str, record: bool) -> Result<Variable, Error> {
        if self.store.contains(name) && !self.host_writes.contains(name) {
            return self.store.lookup(name);
        }

        let value = self.fields.get(name).cloned().ok_or_else(|| {
            Error::consistency(format!("`{name}` has neither a recorded nor a host value"))
        })?;
        let dim = value.len();
        let target = self.store.upcoming(name);
        debug!(variable = %target, "recording host value");
        let equation = Equation::new(
            target.clone(),
            dim,
            RightHandSide::plain(ConstantRhs::new(value), Vec::new()),
        )
        .with_block(Rc::new(IdentityBlock::new(dim)), Vec::new());
        self.record_solution(equation, record)?;
        Ok(target)
    }

    /// Solves `equation`, registers it, and publishes its solution.
    fn record_solution(&mut self, mut equation: Equation, record: bool) -> Result<Vector, Error> {
        let values = self.values_for(&equation.dependencies(), &mut ValueCache::new())?;
        let value = equation.forward(&values)?;
        equation.set_dim(value.len());

        let target = equation.target().clone();
        self.register_equation(equation)?;
        self.store.next(target.name());
        self.publish(&target, value.clone());
        if record {
            self.storage.record(&target, &value, Tier::Memory)?;
        }
        Ok(value)
    }
}
