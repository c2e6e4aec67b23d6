//! Ready-made functionals and parameters.

use std::fmt;

use spool_core::{Error, Functional, Parameter, Values, Variable, VariableStore, Vector};

type ValueFn = Box<dyn Fn(&Vector) -> Result<f64, Error>>;
type DerivativeFn = Box<dyn Fn(&Vector) -> Result<Vector, Error>>;
type SourceFn = Box<dyn Fn(&Values, &Variable) -> Result<Option<Vector>, Error>>;

/// A functional of the final value of one quantity.
///
/// The dependency is reported on the first query of a pass (the latest
/// timestep) and never again until the tape resets the functional.
pub struct FinalFunctional {
    name: String,
    field: String,
    value: ValueFn,
    derivative: DerivativeFn,
    reported: bool,
}

impl FinalFunctional {
    /// Creates a functional `J(u)` with derivative `dJ/du`, evaluated on the
    /// final value of `field`.
    pub fn new(
        name: impl Into<String>,
        field: impl Into<String>,
        value: impl Fn(&Vector) -> Result<f64, Error> + 'static,
        derivative: impl Fn(&Vector) -> Result<Vector, Error> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            value: Box::new(value),
            derivative: Box::new(derivative),
            reported: false,
        }
    }

    /// `J(u) = 0.5 * |u|^2`.
    pub fn half_norm_squared(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(
            format!("half_norm_squared({field})"),
            field,
            |u| Ok(0.5 * u.dot(u)?),
            |u| Ok(u.clone()),
        )
    }

    /// `J(u) = w . u`.
    pub fn weighted_sum(field: impl Into<String>, weights: Vector) -> Self {
        let field = field.into();
        let derivative = weights.clone();
        Self::new(
            format!("weighted_sum({field})"),
            field,
            move |u| weights.dot(u),
            move |_| Ok(derivative.clone()),
        )
    }

    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    fn final_value<'a>(&self, dependencies: &[Variable], values: &'a Values) -> Result<&'a Vector, Error> {
        let variable = dependencies.first().ok_or_else(|| {
            Error::invalid_inputs(format!("functional `{}` was given no dependencies", self.name))
        })?;
        values.variable(variable).ok_or_else(|| {
            Error::invalid_inputs(format!("functional `{}` has no value for {variable}", self.name))
        })
    }
}

impl fmt::Debug for FinalFunctional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalFunctional")
            .field("name", &self.name)
            .field("field", &self.field)
            .field("reported", &self.reported)
            .finish_non_exhaustive()
    }
}

impl Functional for FinalFunctional {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&mut self, store: &VariableStore, _timestep: usize) -> Result<Vec<Variable>, Error> {
        if self.reported {
            return Ok(Vec::new());
        }
        let variable = store.lookup(&self.field)?;
        self.reported = true;
        Ok(vec![variable])
    }

    fn value(&self, dependencies: &[Variable], values: &Values) -> Result<f64, Error> {
        (self.value)(self.final_value(dependencies, values)?)
    }

    fn derivative(
        &self,
        variable: &Variable,
        dependencies: &[Variable],
        values: &Values,
    ) -> Result<Vector, Error> {
        let u = self.final_value(dependencies, values)?;
        if dependencies.first() == Some(variable) {
            (self.derivative)(u)
        } else {
            Ok(Vector::zeros(u.len()))
        }
    }

    fn reset(&mut self) {
        self.reported = false;
    }
}

/// Perturbs the initial condition of one quantity along `direction`.
#[derive(Debug, Clone)]
pub struct InitialConditionParameter {
    field: String,
    direction: Vector,
}

impl InitialConditionParameter {
    pub fn new(field: impl Into<String>, direction: Vector) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    #[must_use]
    pub fn direction(&self) -> &Vector {
        &self.direction
    }
}

impl Parameter for InitialConditionParameter {
    fn name(&self) -> &str {
        &self.field
    }

    fn source(&self, _values: &Values, variable: &Variable) -> Result<Option<Vector>, Error> {
        let initial = variable.name() == self.field && variable.timestep() == 0 && variable.iteration() == 0;
        Ok(initial.then(|| self.direction.clone()))
    }
}

/// A parameter whose source is computed by a closure.
///
/// The closure sees the dependencies and target of each equation and returns
/// the derivative of that equation's right-hand side along the parameter
/// direction, or `None` where the parameter does not act.
pub struct SourceParameter {
    name: String,
    source: SourceFn,
}

impl SourceParameter {
    pub fn new(
        name: impl Into<String>,
        source: impl Fn(&Values, &Variable) -> Result<Option<Vector>, Error> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            source: Box::new(source),
        }
    }
}

impl fmt::Debug for SourceParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceParameter")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Parameter for SourceParameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self, values: &Values, variable: &Variable) -> Result<Option<Vector>, Error> {
        (self.source)(values, variable)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn final_functional_reports_once_per_pass() {
        let mut store = VariableStore::new();
        store.next("u");
        store.next("u");
        let mut functional = FinalFunctional::half_norm_squared("u");

        let first = functional.dependencies(&store, 1).unwrap();
        assert_eq!(first, vec![Variable::forward("u", 1, 0)]);
        assert!(functional.dependencies(&store, 0).unwrap().is_empty());

        functional.reset();
        assert_eq!(functional.dependencies(&store, 1).unwrap().len(), 1);
    }

    #[test]
    fn half_norm_squared_value_and_derivative() {
        let u = Variable::forward("u", 0, 0);
        let values: Values = [(u.clone(), Vector::from(vec![3.0, 4.0]))].into_iter().collect();
        let functional = FinalFunctional::half_norm_squared("u");
        let dependencies = [u.clone()];

        assert_relative_eq!(functional.value(&dependencies, &values).unwrap(), 12.5);
        assert_eq!(
            functional.derivative(&u, &dependencies, &values).unwrap().to_vec(),
            vec![3.0, 4.0]
        );
    }

    #[test]
    fn initial_condition_acts_only_at_timestep_zero() {
        let parameter = InitialConditionParameter::new("u", Vector::from(vec![1.0]));
        let values = Values::new();
        assert!(parameter.source(&values, &Variable::forward("u", 0, 0)).unwrap().is_some());
        assert!(parameter.source(&values, &Variable::forward("u", 1, 0)).unwrap().is_none());
        assert!(parameter.source(&values, &Variable::forward("v", 0, 0)).unwrap().is_none());
    }
}
