use std::collections::{BTreeMap, HashMap};

use spool_core::{Error, Functional, Kind, Term, Variable, Vector};
use tracing::{debug, info};

use super::ValueCache;
use crate::{equation::RightHandSide, tape::Tape};

/// State of an in-progress reverse sweep.
///
/// Equations are processed from the end of the log towards the start. The
/// pass keeps every adjoint solution computed so far, plus the source terms
/// already propagated to variables whose equation has not been reached.
#[derive(Debug)]
pub(crate) struct AdjointPass {
    functional: String,
    dependencies: Vec<Variable>,
    /// Equations at or after this index have been processed.
    remaining: usize,
    solutions: BTreeMap<usize, Option<Vector>>,
    pending: HashMap<Variable, Term>,
}

impl AdjointPass {
    pub(crate) fn forget(&mut self, index: usize) {
        self.solutions.remove(&index);
    }

    fn resumable(&self, functional: &str, index: usize) -> bool {
        self.functional == functional && (index < self.remaining || self.solutions.contains_key(&index))
    }
}

impl Tape {
    /// Returns the adjoint solution of equation `index` for `functional`.
    ///
    /// The first call starts a reverse sweep from the end of the log; later
    /// calls with the same functional resume it, so requesting indices in
    /// descending order costs one sweep in total. Requesting an index the
    /// sweep has already passed and forgotten starts a fresh sweep.
    ///
    /// Equations whose adjoint source is zero are skipped and report a zero
    /// solution.
    ///
    /// Forward values rebuilt for one equation are dropped before the next,
    /// so a sweep holds at most one checkpoint segment of them at a time.
    /// Without checkpoints every step replays the log from the start.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInputs`] for an index past the end of the log,
    /// [`Error::ConsistencyViolation`] if the functional depends on a variable
    /// the tape never recorded, [`Error::StorageMissing`] if a forward value
    /// cannot be rebuilt, or a callback's own error.
    pub fn get_adjoint_solution(
        &mut self,
        index: usize,
        functional: &mut dyn Functional,
    ) -> Result<(Variable, Vector), Error> {
        let target = self.target_of(index)?.clone();
        let dim = self.log[index].dim();

        let mut pass = match self.adjoint.take() {
            Some(pass) if pass.resumable(functional.name(), index) => pass,
            _ => self.begin_adjoint(functional)?,
        };

        while pass.remaining > index {
            let step = pass.remaining - 1;
            self.adjoint_step(&mut pass, step, &*functional)?;
            pass.remaining = step;
        }

        let solution = match pass.solutions.get(&index) {
            Some(Some(lambda)) => lambda.clone(),
            Some(None) => Vector::zeros(dim),
            None => {
                return Err(Error::consistency(format!(
                    "adjoint pass holds no solution for equation {index}"
                )));
            }
        };
        self.adjoint = Some(pass);
        Ok((target.with_kind(Kind::Adjoint), solution))
    }

    /// Queries `functional` for its dependencies, latest timestep first.
    ///
    /// The functional is reset before the first query.
    pub(crate) fn functional_dependencies(&self, functional: &mut dyn Functional) -> Result<Vec<Variable>, Error> {
        functional.reset();
        let mut dependencies: Vec<Variable> = Vec::new();
        for timestep in (0..=self.clock.timestep()).rev() {
            for variable in functional.dependencies(&self.store, timestep)? {
                if !dependencies.contains(&variable) {
                    dependencies.push(variable);
                }
            }
        }
        if let Some(unknown) = dependencies.iter().find(|v| !self.variable_known(v)) {
            return Err(Error::consistency(format!(
                "functional `{}` depends on {unknown}, which the tape never recorded",
                functional.name()
            )));
        }
        Ok(dependencies)
    }

    fn begin_adjoint(&self, functional: &mut dyn Functional) -> Result<AdjointPass, Error> {
        let dependencies = self.functional_dependencies(functional)?;
        info!(
            functional = functional.name(),
            dependencies = dependencies.len(),
            equations = self.log.len(),
            "starting adjoint pass"
        );
        Ok(AdjointPass {
            functional: functional.name().to_owned(),
            dependencies,
            remaining: self.log.len(),
            solutions: BTreeMap::new(),
            pending: HashMap::new(),
        })
    }

    fn adjoint_step(
        &self,
        pass: &mut AdjointPass,
        index: usize,
        functional: &dyn Functional,
    ) -> Result<(), Error> {
        let equation = &self.log[index];
        let target = equation.target();
        // Rebuilt forward values live for one step only.
        let mut cache = ValueCache::new();

        let mut source = pass.pending.remove(target);
        if pass.dependencies.contains(target) {
            let values = self.values_for(&pass.dependencies, &mut cache)?;
            let dj = Term::Vector(functional.derivative(target, &pass.dependencies, &values)?);
            source = Some(match source {
                Some(term) => term.axpy(1.0, dj)?,
                None => dj,
            });
        }

        let Some(source) = source.filter(|term| !term.is_zero()) else {
            debug!(index, variable = %target, "adjoint source is zero, skipping");
            pass.solutions.insert(index, None);
            self.bump(|stats| stats.skipped += 1);
            return Ok(());
        };

        let dependencies = equation.dependencies();
        let values = self.values_for(&dependencies, &mut cache)?;
        let lambda = equation.solve_linearized(&values, true, source)?;
        self.bump(|stats| stats.adjoint_solves += 1);
        debug!(index, variable = %target, norm = lambda.norm(), "solved adjoint equation");

        if !dependencies.is_empty() {
            let needs_solution = matches!(equation.rhs(), RightHandSide::Nonlinear(_))
                || equation.blocks().iter().any(|entry| !entry.dependencies().is_empty());
            let solution = if needs_solution {
                self.value_of(target, &mut cache)?
            } else {
                Vector::zeros(0)
            };

            for dependency in &dependencies {
                let rhs = equation.rhs_derivative(&values, &solution, dependency, &lambda, true)?;
                let block = equation.block_derivative(&values, &solution, dependency, &lambda, true)?;
                let contribution = match (rhs, block) {
                    (Some(a), Some(b)) => a.axpy(1.0, b)?,
                    (Some(term), None) | (None, Some(term)) => term,
                    (None, None) => continue,
                };
                if contribution.is_zero() {
                    continue;
                }
                let updated = match pass.pending.remove(dependency) {
                    Some(existing) => existing.axpy(1.0, contribution)?,
                    None => contribution,
                };
                pass.pending.insert(dependency.clone(), updated);
            }
        }

        pass.solutions.insert(index, Some(lambda));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use approx::assert_relative_eq;
    use spool_core::{Values, VariableStore};

    use crate::equation::{AssignRhs, ConstantRhs, Equation, IdentityBlock};

    use super::*;

    /// `J = sum(x)` over the final value of one quantity.
    #[derive(Debug)]
    struct Sum {
        name: &'static str,
        reported: bool,
    }

    impl Functional for Sum {
        fn name(&self) -> &str {
            "sum"
        }

        fn dependencies(&mut self, store: &VariableStore, _timestep: usize) -> Result<Vec<Variable>, Error> {
            if self.reported {
                return Ok(Vec::new());
            }
            self.reported = true;
            Ok(vec![store.lookup(self.name)?])
        }

        fn value(&self, dependencies: &[Variable], values: &Values) -> Result<f64, Error> {
            let x = values
                .variable(&dependencies[0])
                .ok_or_else(|| Error::consistency("missing value"))?;
            Ok(x.iter().sum())
        }

        fn derivative(&self, variable: &Variable, _dependencies: &[Variable], values: &Values) -> Result<Vector, Error> {
            let len = values.variable(variable).map_or(0, Vector::len);
            Ok(Vector::from(vec![1.0; len]))
        }

        fn reset(&mut self) {
            self.reported = false;
        }
    }

    fn register(tape: &mut Tape, name: &str, rhs: RightHandSide) -> Variable {
        let target = tape.next_variable(name);
        tape.register_equation(
            Equation::new(target.clone(), 1, rhs).with_block(Rc::new(IdentityBlock::new(1)), vec![]),
        )
        .unwrap();
        target
    }

    #[test]
    fn unrelated_equations_are_skipped() {
        let mut tape = Tape::new();
        let u0 = register(&mut tape, "u", RightHandSide::plain(ConstantRhs::new(Vector::from(vec![1.0])), vec![]));
        register(&mut tape, "other", RightHandSide::plain(ConstantRhs::new(Vector::from(vec![5.0])), vec![]));
        register(&mut tape, "u", RightHandSide::plain(AssignRhs::new("u"), vec![u0]));

        let mut functional = Sum {
            name: "u",
            reported: false,
        };
        let (variable, lambda) = tape.get_adjoint_solution(1, &mut functional).unwrap();
        assert_eq!(variable.kind(), Kind::Adjoint);
        assert!(lambda.is_zero());

        let (_, lambda) = tape.get_adjoint_solution(0, &mut functional).unwrap();
        assert_relative_eq!(lambda[0], 1.0);

        let stats = tape.stats();
        assert_eq!(stats.adjoint_solves, 2);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn passes_resume_in_descending_order() {
        let mut tape = Tape::new();
        let u0 = register(&mut tape, "u", RightHandSide::plain(ConstantRhs::new(Vector::from(vec![1.0])), vec![]));
        let u1 = register(&mut tape, "u", RightHandSide::plain(AssignRhs::new("u"), vec![u0]));
        register(&mut tape, "u", RightHandSide::plain(AssignRhs::new("u"), vec![u1]));

        let mut functional = Sum {
            name: "u",
            reported: false,
        };
        for index in (0..3).rev() {
            tape.get_adjoint_solution(index, &mut functional).unwrap();
        }
        assert_eq!(tape.stats().adjoint_solves, 3);

        // Already computed, so no new solves.
        tape.get_adjoint_solution(2, &mut functional).unwrap();
        assert_eq!(tape.stats().adjoint_solves, 3);

        // Forgotten, so the pass starts over.
        tape.forget_adjoint_equation(2).unwrap();
        tape.get_adjoint_solution(2, &mut functional).unwrap();
        assert_eq!(tape.stats().adjoint_solves, 4);
    }

    #[test]
    fn unrecorded_dependencies_are_rejected() {
        let mut tape = Tape::new();
        register(&mut tape, "u", RightHandSide::plain(ConstantRhs::new(Vector::from(vec![1.0])), vec![]));
        tape.next_variable("ghost");

        let mut functional = Sum {
            name: "ghost",
            reported: false,
        };
        assert!(matches!(
            tape.get_adjoint_solution(0, &mut functional),
            Err(Error::ConsistencyViolation(_))
        ));
    }
}
