//! Derivatives of a functional with respect to a parameter.
//!
//! [`compute_gradient`] uses the adjoint, one reverse sweep per functional.
//! [`compute_tlm`] uses the tangent-linear system, one forward sweep per
//! parameter direction. Both give the same number, which makes each a check
//! on the other.

use spool_core::{Error, Functional, Parameter, Variable, Vector};
use tracing::info;

use crate::{Tape, tape::ValueCache};

/// Evaluates `functional` on the recorded forward values.
///
/// # Errors
///
/// Returns an error if a dependency is unknown or its value cannot be
/// rebuilt.
pub fn functional_value(tape: &Tape, functional: &mut dyn Functional) -> Result<f64, Error> {
    let dependencies = tape.functional_dependencies(functional)?;
    let values = tape.values_for(&dependencies, &mut ValueCache::new())?;
    functional.value(&dependencies, &values)
}

/// Returns `dJ/dm`, the derivative of `functional` along `parameter`, from
/// an adjoint sweep.
///
/// With `forget` set, each adjoint solution and the checkpoints it no
/// longer needs are released as soon as its contribution is summed.
///
/// # Errors
///
/// Returns an error if the adjoint sweep fails or the parameter source
/// cannot be computed.
pub fn compute_gradient(
    tape: &mut Tape,
    functional: &mut dyn Functional,
    parameter: &dyn Parameter,
    forget: bool,
) -> Result<f64, Error> {
    let mut total = 0.0;
    for index in (0..tape.len()).rev() {
        let (variable, lambda) = tape.get_adjoint_solution(index, functional)?;
        if !lambda.is_zero() {
            let values = tape.equation_values(index)?;
            if let Some(source) = parameter.source(&values, &variable)? {
                total += lambda.dot(&source)?;
            }
        }
        if forget {
            tape.forget_adjoint_equation(index)?;
        }
    }
    info!(
        functional = functional.name(),
        parameter = parameter.name(),
        gradient = total,
        "computed adjoint gradient"
    );
    Ok(total)
}

/// Returns `dJ/dm` from a tangent-linear sweep: the sum of `dJ/dx . tau_x`
/// over the functional's dependencies.
///
/// # Errors
///
/// Returns an error if the tangent-linear sweep fails or the functional
/// cannot be differentiated.
pub fn compute_tlm(tape: &Tape, functional: &mut dyn Functional, parameter: &dyn Parameter) -> Result<f64, Error> {
    let tangent = tape.solve_tangent_linear(parameter)?;
    let dependencies = tape.functional_dependencies(functional)?;
    let values = tape.values_for(&dependencies, &mut ValueCache::new())?;

    let mut total = 0.0;
    for variable in &dependencies {
        if let Some(tau) = tangent.get(variable) {
            total += functional.derivative(variable, &dependencies, &values)?.dot(tau)?;
        }
    }
    info!(
        functional = functional.name(),
        parameter = parameter.name(),
        gradient = total,
        "computed tangent-linear derivative"
    );
    Ok(total)
}

/// Returns the gradient of `functional` with respect to the initial value of
/// `name`: the adjoint solution at `(name, 0, 0)`.
///
/// # Errors
///
/// Returns [`Error::ConsistencyViolation`] if `name` has no recorded initial
/// value, or any error from the adjoint sweep.
pub fn initial_condition_gradient(
    tape: &mut Tape,
    functional: &mut dyn Functional,
    name: &str,
) -> Result<Vector, Error> {
    let initial = Variable::forward(name, 0, 0);
    let index = tape
        .producer(&initial)
        .ok_or_else(|| Error::consistency(format!("{initial} was never recorded")))?;
    let (_, lambda) = tape.get_adjoint_solution(index, functional)?;
    Ok(lambda)
}
