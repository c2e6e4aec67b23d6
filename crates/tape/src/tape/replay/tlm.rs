use std::collections::HashMap;

use spool_core::{Error, Parameter, Term, Variable, Vector};
use tracing::{debug, info};

use super::ValueCache;
use crate::tape::Tape;

/// Tangent-linear solutions for one parameter direction, keyed by forward
/// variable.
///
/// Variables the parameter does not reach have no entry; their tangent is
/// zero.
#[derive(Debug, Clone, Default)]
pub struct TangentLinear {
    parameter: String,
    solutions: HashMap<Variable, Vector>,
}

impl TangentLinear {
    #[must_use]
    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    #[must_use]
    pub fn get(&self, variable: &Variable) -> Option<&Vector> {
        self.solutions.get(variable)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.solutions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Vector)> {
        self.solutions.iter()
    }
}

impl Tape {
    /// Propagates the derivative direction of `parameter` forward through
    /// every recorded equation.
    ///
    /// Forward values are rebuilt alongside and dropped after their last use,
    /// so the pass never needs stored values beyond what the first equations
    /// read.
    ///
    /// # Errors
    ///
    /// Returns an error if a callback fails or is not implemented for a
    /// needed derivative.
    pub fn solve_tangent_linear(&self, parameter: &dyn Parameter) -> Result<TangentLinear, Error> {
        let last_uses = self.last_uses();
        let mut cache = ValueCache::new();
        let mut solutions: HashMap<Variable, Vector> = HashMap::new();

        for (index, equation) in self.log.iter().enumerate() {
            let target = equation.target();
            let dependencies = equation.dependencies();
            let values = self.values_for(&dependencies, &mut cache)?;
            let solution = equation.forward(&values)?;

            let mut source: Option<Term> = None;
            for dependency in &dependencies {
                let Some(tau) = solutions.get(dependency) else {
                    continue;
                };
                let contributions = [
                    equation.rhs_derivative(&values, &solution, dependency, tau, false)?,
                    equation.block_derivative(&values, &solution, dependency, tau, false)?,
                ];
                for term in contributions.into_iter().flatten() {
                    source = Some(match source {
                        Some(sum) => sum.axpy(1.0, term)?,
                        None => term,
                    });
                }
            }

            let mut parameter_values = values.clone();
            parameter_values.insert(target.clone(), solution.clone());
            if let Some(injected) = parameter.source(&parameter_values, target)? {
                let term = Term::Vector(injected);
                source = Some(match source {
                    Some(sum) => sum.axpy(1.0, term)?,
                    None => term,
                });
            }

            cache.insert(target.clone(), solution);
            for variable in dependencies.iter().chain(std::iter::once(target)) {
                if last_uses.get(variable) == Some(&index) {
                    cache.remove(variable);
                }
            }

            match source.filter(|term| !term.is_zero()) {
                Some(source) => {
                    let tau = equation.solve_linearized(&values, false, source)?;
                    self.bump(|stats| stats.tangent_solves += 1);
                    debug!(index, variable = %target, norm = tau.norm(), "solved tangent-linear equation");
                    solutions.insert(target.clone(), tau);
                }
                None => self.bump(|stats| stats.skipped += 1),
            }
        }

        info!(
            parameter = parameter.name(),
            nonzero = solutions.len(),
            "tangent-linear pass complete"
        );
        Ok(TangentLinear {
            parameter: parameter.name().to_owned(),
            solutions,
        })
    }
}
