//! Records an implicit heat solve and differentiates the final energy.
//!
//! Run with `cargo run -p spool-tape --example heat`.

use std::rc::Rc;

use spool_core::{Block, DenseMatrix, Error, Operator, Term, Values, Variable, Vector};
use spool_tape::{
    CheckpointConfig, FinalFunctional, InitialConditionParameter, Problem, SolveOptions, Tape,
    TapeConfig, compute_gradient, compute_tlm, equation::AssignRhs, export,
    initial_condition_gradient,
};

const CELLS: usize = 8;
const STEPS: usize = 20;
const DT: f64 = 0.05;

/// The Neumann graph Laplacian of a rod.
fn laplacian() -> Result<DenseMatrix, Error> {
    let rows: Vec<Vec<f64>> = (0..CELLS)
        .map(|i| {
            let mut row = vec![0.0; CELLS];
            if i > 0 {
                row[i - 1] = -1.0;
                row[i] += 1.0;
            }
            if i + 1 < CELLS {
                row[i + 1] = -1.0;
                row[i] += 1.0;
            }
            row
        })
        .collect();
    Ok(DenseMatrix::from_rows(&rows)?)
}

/// `I + dt * kappa * L`.
#[derive(Debug)]
struct Diffusion {
    laplacian: DenseMatrix,
}

impl Block for Diffusion {
    fn name(&self) -> &str {
        "Diffusion"
    }

    fn coefficients(&self) -> Vec<String> {
        vec!["kappa".into()]
    }

    fn assemble(
        &self,
        values: &Values,
        _hermitian: bool,
        coefficient: f64,
    ) -> Result<(Operator, Term), Error> {
        let kappa = values.get("kappa")?[0];
        let operator = DenseMatrix::identity(CELLS).add_scaled(DT * kappa, &self.laplacian)?;
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
        let lu = self.laplacian.matvec(contraction)?.scaled(DT * coefficient);
        if hermitian {
            Ok(Vector::from(vec![lu.dot(input)?]))
        } else {
            Ok(lu.scaled(input[0]))
        }
    }
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let checkpoint = CheckpointConfig::multistage(STEPS + 2, 2, 1, true)
        .map_err(|e| Error::invalid_inputs(e.to_string()))?;
    let config = TapeConfig::new(checkpoint).map_err(|e| Error::invalid_inputs(e.to_string()))?;
    let mut tape = Tape::with_config(config)?;

    let initial: Vec<f64> = (0..CELLS).map(|i| if i < CELLS / 2 { 1.0 } else { 0.0 }).collect();
    tape.set_field("u", Vector::from(initial));
    tape.set_field("kappa", Vector::from(vec![0.8]));

    let problem = Problem::Linear {
        blocks: vec![Rc::new(Diffusion {
            laplacian: laplacian()?,
        })],
        rhs: Rc::new(AssignRhs::new("u")),
    };
    tape.start_timestep(0.0);
    for step in 0..STEPS {
        tape.solve(&problem, "u", SolveOptions::default())?;
        tape.inc_timestep(Some(DT * (step + 1) as f64), step + 1 == STEPS);
    }
    tape.check_checkpoints()?;

    let mut energy = FinalFunctional::half_norm_squared("u");
    let kappa = InitialConditionParameter::new("kappa", Vector::from(vec![1.0]));
    let adjoint = compute_gradient(&mut tape, &mut energy, &kappa, false)?;
    let tangent = compute_tlm(&tape, &mut energy, &kappa)?;
    let initial = initial_condition_gradient(&mut tape, &mut energy, "u")?;

    println!("dJ/dkappa (adjoint):        {adjoint:.10}");
    println!("dJ/dkappa (tangent linear): {tangent:.10}");
    println!("dJ/du0: {:?}", initial.to_vec());
    println!("{:?}", tape.stats());
    print!("{}", export::report(&tape));

    tape.reset()
}
