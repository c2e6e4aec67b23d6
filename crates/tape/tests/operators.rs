mod common;

use std::rc::Rc;

use approx::assert_relative_eq;
use spool_core::{Block, DenseMatrix, Error, Operator, Term, Values, Variable, Vector};
use spool_tape::{
    FinalFunctional, InitialConditionParameter, Problem, SolveOptions, Tape, compute_gradient,
    compute_tlm,
    equation::{AssignRhs, IdentityBlock},
};

const STEPS: usize = 4;
const SPEED: f64 = 0.6;

/// A skewed transport stencil with no symmetry.
fn stencil() -> Result<DenseMatrix, Error> {
    Ok(DenseMatrix::from_rows(&[
        vec![0.5, -1.0, 0.0],
        vec![0.25, 0.5, -1.5],
        vec![-0.75, 0.3, 0.5],
    ])?)
}

/// `p * B`, reading `p`.
#[derive(Debug)]
struct Transport;

impl Block for Transport {
    fn name(&self) -> &str {
        "Transport"
    }

    fn coefficients(&self) -> Vec<String> {
        vec!["p".into()]
    }

    fn assemble(
        &self,
        values: &Values,
        hermitian: bool,
        coefficient: f64,
    ) -> Result<(Operator, Term), Error> {
        let p = values.get("p")?[0];
        let mut operator = stencil()?.scaled(p * coefficient);
        if hermitian {
            operator = operator.transpose();
        }
        Ok((Operator::Dense(operator), Term::zero(3)))
    }

    fn derivative_action(
        &self,
        _values: &Values,
        _variable: &Variable,
        contraction: &Vector,
        hermitian: bool,
        input: &Vector,
        coefficient: f64,
    ) -> Result<Vector, Error> {
        let bu = stencil()?.matvec(contraction)?.scaled(coefficient);
        if hermitian {
            Ok(Vector::from(vec![bu.dot(input)?]))
        } else {
            Ok(bu.scaled(input[0]))
        }
    }
}

/// `(I + p B) u_next = u`, assembled from two blocks.
fn problem() -> Problem {
    Problem::Linear {
        blocks: vec![Rc::new(IdentityBlock::new(3)), Rc::new(Transport)],
        rhs: Rc::new(AssignRhs::new("u")),
    }
}

fn initial() -> Vector {
    Vector::from(vec![1.0, -0.5, 2.0])
}

fn run(tape: &mut Tape, u0: &Vector, p: f64, options: SolveOptions) -> Result<Vector, Error> {
    tape.set_field("u", u0.clone());
    tape.set_field("p", Vector::from(vec![p]));
    let problem = problem();
    let mut u = u0.clone();
    for _ in 0..STEPS {
        u = tape.solve(&problem, "u", options)?;
    }
    Ok(u)
}

/// `sum(w * u_final)` from an unannotated run.
fn objective(u0: &Vector, p: f64) -> f64 {
    let u = run(&mut Tape::new(), u0, p, SolveOptions::untracked()).unwrap();
    u.dot(&weights()).unwrap()
}

fn weights() -> Vector {
    Vector::from(vec![1.0, 2.0, -0.5])
}

fn recorded() -> Tape {
    let mut tape = Tape::new();
    run(&mut tape, &initial(), SPEED, SolveOptions::default()).unwrap();
    tape
}

#[test]
fn transposed_assembly_differs_from_the_forward_operator() {
    let values: Values = [(Variable::forward("p", 0, 0), Vector::from(vec![2.0]))]
        .into_iter()
        .collect();
    let (Operator::Dense(forward), _) = Transport.assemble(&values, false, 1.0).unwrap() else {
        panic!("expected a dense operator");
    };
    let (Operator::Dense(adjoint), _) = Transport.assemble(&values, true, 1.0).unwrap() else {
        panic!("expected a dense operator");
    };
    assert_relative_eq!(forward.get(0, 1), -2.0);
    assert_relative_eq!(adjoint.get(0, 1), 0.5);
    assert_relative_eq!(adjoint.get(1, 0), forward.get(0, 1));
}

#[test]
fn coefficient_derivative_agrees_across_modes() {
    let mut tape = recorded();
    let mut functional = FinalFunctional::weighted_sum("u", weights());
    let parameter = InitialConditionParameter::new("p", Vector::from(vec![1.0]));

    let adjoint = compute_gradient(&mut tape, &mut functional, &parameter, false).unwrap();
    let tangent = compute_tlm(&tape, &mut functional, &parameter).unwrap();
    assert_relative_eq!(adjoint, tangent, max_relative = 1e-10);

    let h = 1e-6;
    let fd = (objective(&initial(), SPEED + h) - objective(&initial(), SPEED - h)) / (2.0 * h);
    assert_relative_eq!(adjoint, fd, max_relative = 1e-6);
}

#[test]
fn initial_condition_derivative_agrees_across_modes() {
    let direction = Vector::from(vec![0.4, 1.0, -0.3]);
    let mut tape = recorded();
    let mut functional = FinalFunctional::weighted_sum("u", weights());
    let parameter = InitialConditionParameter::new("u", direction.clone());

    let adjoint = compute_gradient(&mut tape, &mut functional, &parameter, false).unwrap();
    let tangent = compute_tlm(&tape, &mut functional, &parameter).unwrap();
    assert_relative_eq!(adjoint, tangent, max_relative = 1e-10);

    // J is linear in u0, so a unit step is exact.
    let fd = objective(&common::perturbed(&initial(), 1.0, &direction), SPEED)
        - objective(&initial(), SPEED);
    assert_relative_eq!(adjoint, fd, max_relative = 1e-9);
}

#[test]
fn half_norm_gradient_matches_finite_differences() {
    let mut tape = recorded();
    let mut functional = FinalFunctional::half_norm_squared("u");
    let parameter = InitialConditionParameter::new("p", Vector::from(vec![1.0]));
    let adjoint = compute_gradient(&mut tape, &mut functional, &parameter, false).unwrap();
    let tangent = compute_tlm(&tape, &mut functional, &parameter).unwrap();
    assert_relative_eq!(adjoint, tangent, max_relative = 1e-10);

    let energy = |p: f64| {
        let u = run(&mut Tape::new(), &initial(), p, SolveOptions::untracked()).unwrap();
        0.5 * u.dot(&u).unwrap()
    };
    let h = 1e-6;
    let fd = (energy(SPEED + h) - energy(SPEED - h)) / (2.0 * h);
    assert_relative_eq!(adjoint, fd, max_relative = 1e-6);
}
