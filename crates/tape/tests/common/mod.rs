//! Models shared by the integration tests.
//!
//! The heat model solves `(I + dt * kappa * L) u_next = u` each step on a
//! four-cell rod with insulated ends, where `L` is the graph Laplacian.

#![allow(dead_code)]

use std::rc::Rc;

use spool_core::{
    Block, DenseMatrix, Error, NonlinearProblem, Operator, Term, Values, Variable, Vector,
};
use spool_tape::{Problem, SolveOptions, Tape, equation::AssignRhs};

pub const CELLS: usize = 4;
pub const DT: f64 = 0.1;

fn laplacian() -> Result<DenseMatrix, Error> {
    Ok(DenseMatrix::from_rows(&[
        vec![1.0, -1.0, 0.0, 0.0],
        vec![-1.0, 2.0, -1.0, 0.0],
        vec![0.0, -1.0, 2.0, -1.0],
        vec![0.0, 0.0, -1.0, 1.0],
    ])?)
}

/// `I + dt * kappa * L`, reading `kappa`.
#[derive(Debug)]
pub struct Diffusion;

impl Block for Diffusion {
    fn name(&self) -> &str {
        "Diffusion"
    }

    fn coefficients(&self) -> Vec<String> {
        vec!["kappa".into()]
    }

    fn assemble(&self, values: &Values, _hermitian: bool, coefficient: f64) -> Result<(Operator, Term), Error> {
        let kappa = values.get("kappa")?[0];
        let operator = DenseMatrix::identity(CELLS).add_scaled(DT * kappa, &laplacian()?)?;
        Ok((Operator::Dense(operator.scaled(coefficient)), Term::zero(CELLS)))
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
        let lu = laplacian()?.matvec(contraction)?.scaled(DT * coefficient);
        if hermitian {
            Ok(Vector::from(vec![lu.dot(input)?]))
        } else {
            Ok(lu.scaled(input[0]))
        }
    }
}

pub fn initial() -> Vector {
    Vector::from(vec![1.0, 0.5, -0.25, 2.0])
}

pub fn direction() -> Vector {
    Vector::from(vec![0.3, -1.0, 0.7, 0.2])
}

/// The number of equations an annotated run of `steps` records.
pub fn equations(steps: usize) -> usize {
    steps + 2
}

/// Runs the model and returns the final state.
pub fn run(tape: &mut Tape, u0: &Vector, kappa: f64, steps: usize, options: SolveOptions) -> Result<Vector, Error> {
    tape.set_field("u", u0.clone());
    tape.set_field("kappa", Vector::from(vec![kappa]));
    let problem = Problem::Linear {
        blocks: vec![Rc::new(Diffusion)],
        rhs: Rc::new(AssignRhs::new("u")),
    };

    tape.start_timestep(0.0);
    let mut u = u0.clone();
    for step in 0..steps {
        u = tape.solve(&problem, "u", options)?;
        tape.inc_timestep(Some(DT * (step + 1) as f64), step + 1 == steps);
    }
    Ok(u)
}

/// `0.5 * |u_final|^2` from an unannotated run.
pub fn objective(u0: &Vector, kappa: f64, steps: usize) -> Result<f64, Error> {
    let mut tape = Tape::new();
    let u = run(&mut tape, u0, kappa, steps, SolveOptions::untracked())?;
    Ok(0.5 * u.dot(&u)?)
}

/// `u0 + h * d`.
pub fn perturbed(u0: &Vector, h: f64, d: &Vector) -> Vector {
    let mut u = u0.clone();
    u.axpy(h, d).expect("perturbation has the state's length");
    u
}

/// `x^2 = a`, solved by Newton from the initial guess.
#[derive(Debug)]
pub struct SquareRoot;

impl NonlinearProblem for SquareRoot {
    fn coefficients(&self) -> Vec<String> {
        vec!["a".into()]
    }

    fn mass(&self) -> Operator {
        Operator::Identity(1)
    }

    fn solve(&self, values: &Values, guess: Option<&Vector>) -> Result<Vector, Error> {
        let a = values.get("a")?[0];
        let mut x = guess.map_or(1.0, |g| g[0]);
        for _ in 0..60 {
            x -= (x * x - a) / (2.0 * x);
        }
        Ok(Vector::from(vec![x]))
    }

    fn derivative_action(
        &self,
        _values: &Values,
        solution: &Vector,
        variable: &Variable,
        contraction: &Vector,
        _hermitian: bool,
    ) -> Result<Term, Error> {
        if variable.name() == "a" {
            Ok(Term::Vector(Vector::from(vec![contraction[0] / (2.0 * solution[0])])))
        } else {
            Ok(Term::zero(contraction.len()))
        }
    }
}
