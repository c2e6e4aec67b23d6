//! Blocks and right-hand sides the tape synthesizes itself.

use spool_core::{Block, Error, Operator, Rhs, Term, Values, Variable, Vector};

/// The identity operator.
#[derive(Debug, Clone, Copy)]
pub struct IdentityBlock {
    dim: usize,
}

impl IdentityBlock {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Block for IdentityBlock {
    fn name(&self) -> &str {
        "Identity"
    }

    fn assemble(
        &self,
        _values: &Values,
        _hermitian: bool,
        coefficient: f64,
    ) -> Result<(Operator, Term), Error> {
        let operator = Operator::Identity(self.dim).scaled(coefficient)?;
        Ok((operator, Term::zero(self.dim)))
    }

    fn action(
        &self,
        _values: &Values,
        _hermitian: bool,
        coefficient: f64,
        input: &Vector,
    ) -> Result<Vector, Error> {
        Ok(input.scaled(coefficient))
    }
}

/// A fixed, coefficient-free mass operator.
///
/// Dense operators are transposed for hermitian assembly. Host operators are
/// assumed symmetric, which holds for any mass matrix.
#[derive(Debug, Clone)]
pub struct MassBlock {
    operator: Operator,
}

impl MassBlock {
    #[must_use]
    pub fn new(operator: Operator) -> Self {
        Self { operator }
    }
}

impl Block for MassBlock {
    fn name(&self) -> &str {
        "Mass"
    }

    fn assemble(
        &self,
        _values: &Values,
        hermitian: bool,
        coefficient: f64,
    ) -> Result<(Operator, Term), Error> {
        let operator = match (&self.operator, hermitian) {
            (Operator::Dense(m), true) => Operator::Dense(m.transpose()),
            (operator, _) => operator.clone(),
        };
        let dim = operator.dim();
        Ok((operator.scaled(coefficient)?, Term::zero(dim)))
    }
}

/// A literal value with no dependencies.
///
/// Used for initial conditions and host writes. It has no meaningful
/// derivative, so asking for one is an error.
#[derive(Debug, Clone)]
pub struct ConstantRhs {
    value: Vector,
}

impl ConstantRhs {
    #[must_use]
    pub fn new(value: Vector) -> Self {
        Self { value }
    }
}

impl Rhs for ConstantRhs {
    fn coefficients(&self) -> Vec<String> {
        Vec::new()
    }

    fn evaluate(&self, _values: &Values) -> Result<Term, Error> {
        Ok(Term::Vector(self.value.clone()))
    }
}

/// Copies another quantity: `x = source`.
#[derive(Debug, Clone)]
pub struct AssignRhs {
    source: String,
}

impl AssignRhs {
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl Rhs for AssignRhs {
    fn coefficients(&self) -> Vec<String> {
        vec![self.source.clone()]
    }

    fn evaluate(&self, values: &Values) -> Result<Term, Error> {
        Ok(Term::Vector(values.get(&self.source)?.clone()))
    }

    fn derivative_action(
        &self,
        _values: &Values,
        variable: &Variable,
        contraction: &Vector,
        _hermitian: bool,
    ) -> Result<Term, Error> {
        if variable.name() == self.source {
            Ok(Term::Vector(contraction.clone()))
        } else {
            Ok(Term::zero(contraction.len()))
        }
    }
}
