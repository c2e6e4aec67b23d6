use crate::{Error, Values, Variable, VariableStore, Vector};

/// A scalar objective over recorded variables.
///
/// The tape queries [`dependencies`](Self::dependencies) once per timestep
/// during an adjoint pass, starting from the latest. An implementation must
/// report each dependency exactly once per pass and return an empty list on
/// later calls; [`reset`](Self::reset) re-arms it and is called by the tape at
/// the start of every pass.
pub trait Functional {
    fn name(&self) -> &str;

    /// Returns the variables the functional depends on at `timestep`.
    ///
    /// # Errors
    ///
    /// Returns an error if a dependency cannot be resolved.
    fn dependencies(
        &mut self,
        store: &VariableStore,
        timestep: usize,
    ) -> Result<Vec<Variable>, Error>;

    /// Evaluates the functional.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails.
    fn value(&self, dependencies: &[Variable], values: &Values) -> Result<f64, Error>;

    /// Returns the partial derivative with respect to `variable`.
    ///
    /// # Errors
    ///
    /// Returns an error if differentiation fails.
    fn derivative(
        &self,
        variable: &Variable,
        dependencies: &[Variable],
        values: &Values,
    ) -> Result<Vector, Error>;

    /// Re-arms the once-per-pass dependency guard.
    fn reset(&mut self);
}

/// A derivative direction injected into the tangent-linear system.
///
/// `values` holds the dependencies and target of the equation that produced
/// `variable`. A parameter returns a source only at its own injection point.
pub trait Parameter {
    fn name(&self) -> &str;

    /// Returns the source for `variable`, or `None` if the parameter does not
    /// act there.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be computed.
    fn source(&self, values: &Values, variable: &Variable) -> Result<Option<Vector>, Error>;
}
