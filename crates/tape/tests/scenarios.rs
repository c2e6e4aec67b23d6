mod common;

use std::rc::Rc;

use approx::assert_relative_eq;
use spool_core::{Error, Functional, Kind, Rhs, Term, Values, Variable, VariableStore, Vector};
use spool_tape::{
    FinalFunctional, InitialConditionParameter, InitialGuess, Problem, SolveOptions, Tape,
    compute_gradient, compute_tlm, equation::IdentityBlock, functional_value,
    initial_condition_gradient,
};

/// `x = factor * source`.
#[derive(Debug)]
struct Scaled {
    source: &'static str,
    factor: f64,
}

impl Rhs for Scaled {
    fn coefficients(&self) -> Vec<String> {
        vec![self.source.into()]
    }

    fn evaluate(&self, values: &Values) -> Result<Term, Error> {
        Ok(Term::Vector(values.get(self.source)?.scaled(self.factor)))
    }

    fn derivative_action(
        &self,
        _values: &Values,
        variable: &Variable,
        contraction: &Vector,
        _hermitian: bool,
    ) -> Result<Term, Error> {
        if variable.name() == self.source {
            Ok(Term::Vector(contraction.scaled(self.factor)))
        } else {
            Ok(Term::zero(contraction.len()))
        }
    }
}

#[test]
fn identity_chain_has_the_analytic_adjoint() {
    let mut tape = Tape::new();
    tape.set_field("u", Vector::from(vec![1.0, -2.0]));
    let double = Problem::Linear {
        blocks: vec![Rc::new(IdentityBlock::new(2))],
        rhs: Rc::new(Scaled {
            source: "u",
            factor: 2.0,
        }),
    };
    tape.solve(&double, "u", SolveOptions::default()).unwrap();
    let u2 = tape.solve(&double, "u", SolveOptions::default()).unwrap();
    assert_eq!(u2.to_vec(), vec![4.0, -8.0]);

    // J = 0.5 |u2|^2 = 8 |u0|^2, so dJ/du0 = 16 u0.
    let mut functional = FinalFunctional::half_norm_squared("u");
    assert_relative_eq!(functional_value(&tape, &mut functional).unwrap(), 40.0);

    let gradient = initial_condition_gradient(&mut tape, &mut functional, "u").unwrap();
    assert_relative_eq!(gradient[0], 16.0);
    assert_relative_eq!(gradient[1], -32.0);

    let (variable, lambda) = tape.get_adjoint_solution(2, &mut functional).unwrap();
    assert_eq!(variable, Variable::forward("u", 2, 0));
    assert_eq!(variable.kind(), Kind::Adjoint);
    assert_eq!(lambda, u2);
}

#[test]
fn initial_guess_edge_contributes_nothing() {
    let mut tape = Tape::new();
    tape.set_field("a", Vector::from(vec![9.0]));
    let problem = Problem::nonlinear(common::SquareRoot);
    tape.solve(&problem, "x", SolveOptions::default()).unwrap();
    tape.solve(&problem, "x", SolveOptions::default()).unwrap();

    let x0 = Variable::forward("x", 0, 0);
    let x1 = Variable::forward("x", 1, 0);
    assert!(tape.equation(tape.producer(&x1).unwrap()).unwrap().depends_on(&x0));

    let mut functional = FinalFunctional::weighted_sum("x", Vector::from(vec![1.0]));
    let (_, lambda) = tape
        .get_adjoint_solution(tape.producer(&x0).unwrap(), &mut functional)
        .unwrap();
    assert!(lambda.is_zero());

    // x1 = sqrt(a), so dx1/da = 1/6 and nothing flows back through x0.
    let parameter = InitialConditionParameter::new("a", Vector::from(vec![1.0]));
    let adjoint = compute_gradient(&mut tape, &mut functional, &parameter, false).unwrap();
    let tangent = compute_tlm(&tape, &mut functional, &parameter).unwrap();
    assert_relative_eq!(adjoint, 1.0 / 6.0, epsilon = 1e-12);
    assert_relative_eq!(tangent, 1.0 / 6.0, epsilon = 1e-12);
}

#[test]
fn rejecting_the_guess_edge_fails_the_adjoint() {
    let mut tape = Tape::new();
    tape.set_field("a", Vector::from(vec![4.0]));
    let problem = Problem::nonlinear(common::SquareRoot);
    let options = SolveOptions::default().with_initial_guess(InitialGuess::Reject);
    tape.solve(&problem, "x", options).unwrap();
    tape.solve(&problem, "x", options).unwrap();

    let mut functional = FinalFunctional::weighted_sum("x", Vector::from(vec![1.0]));
    let result = tape.get_adjoint_solution(0, &mut functional);
    assert!(matches!(result, Err(Error::NotImplemented(_))));
}

/// Wraps a functional and logs every dependency query.
struct Logged {
    inner: FinalFunctional,
    queries: Vec<(usize, usize)>,
}

impl Functional for Logged {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dependencies(
        &mut self,
        store: &VariableStore,
        timestep: usize,
    ) -> Result<Vec<Variable>, Error> {
        let dependencies = self.inner.dependencies(store, timestep)?;
        self.queries.push((timestep, dependencies.len()));
        Ok(dependencies)
    }

    fn value(&self, dependencies: &[Variable], values: &Values) -> Result<f64, Error> {
        self.inner.value(dependencies, values)
    }

    fn derivative(
        &self,
        variable: &Variable,
        dependencies: &[Variable],
        values: &Values,
    ) -> Result<Vector, Error> {
        self.inner.derivative(variable, dependencies, values)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

#[test]
fn functional_dependencies_are_reported_once() {
    let mut tape = Tape::new();
    common::run(&mut tape, &common::initial(), 1.0, 1, SolveOptions::default()).unwrap();
    assert_eq!(tape.clock().timestep(), 1);

    let mut functional = Logged {
        inner: FinalFunctional::half_norm_squared("u"),
        queries: Vec::new(),
    };
    let direction = common::direction();
    let parameter = InitialConditionParameter::new("u", direction.clone());
    let gradient = compute_gradient(&mut tape, &mut functional, &parameter, false).unwrap();
    assert_eq!(functional.queries, vec![(1, 1), (0, 0)]);

    let h = 1e-6;
    let objective = |h: f64| {
        common::objective(&common::perturbed(&common::initial(), h, &direction), 1.0, 1).unwrap()
    };
    let fd = (objective(h) - objective(-h)) / (2.0 * h);
    assert_relative_eq!(gradient, fd, max_relative = 1e-6);
}

#[test]
fn adjoint_and_tangent_linear_agree() {
    let mut tape = Tape::new();
    common::run(&mut tape, &common::initial(), 0.8, 5, SolveOptions::default()).unwrap();

    let mut functional = FinalFunctional::half_norm_squared("u");
    for parameter in [
        InitialConditionParameter::new("u", common::direction()),
        InitialConditionParameter::new("kappa", Vector::from(vec![1.0])),
    ] {
        let adjoint = compute_gradient(&mut tape, &mut functional, &parameter, false).unwrap();
        let tangent = compute_tlm(&tape, &mut functional, &parameter).unwrap();
        assert_relative_eq!(adjoint, tangent, max_relative = 1e-10);
    }
}

#[test]
fn recorded_runs_replay_exactly() {
    let mut tape = Tape::new();
    let u = common::run(&mut tape, &common::initial(), 1.0, 4, SolveOptions::recorded()).unwrap();

    let report = tape.check_replay(1e-12).unwrap();
    assert_eq!(report.replayed, common::equations(4));
    assert_eq!(report.compared, common::equations(4));
    assert_eq!(tape.field("u"), Some(&u));
}

#[test]
fn solving_with_an_unknown_coefficient_fails() {
    let mut tape = Tape::new();
    let problem = Problem::Linear {
        blocks: vec![Rc::new(IdentityBlock::new(1))],
        rhs: Rc::new(Scaled {
            source: "missing",
            factor: 1.0,
        }),
    };
    assert!(matches!(
        tape.solve(&problem, "x", SolveOptions::default()),
        Err(Error::ConsistencyViolation(_))
    ));
    assert!(tape.is_empty());
}
