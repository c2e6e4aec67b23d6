//! Recorded equations.
//!
//! An [`Equation`] captures one solve, `sum(blocks) * target = rhs`, together
//! with the variables each block and the right-hand side read. Equations are
//! built once and never change after registration; the same equation is
//! re-evaluated for forward replay, transposed for the adjoint, and
//! differentiated for the tangent-linear system.

mod builtin;
mod nonlinear;

use std::rc::Rc;

use spool_core::{Block, Error, Operator, Rhs, Term, Values, Variable, Vector};

pub use builtin::{AssignRhs, ConstantRhs, IdentityBlock, MassBlock};
pub use nonlinear::{InitialGuess, NonlinearRhs};

/// A block together with its resolved dependencies.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    block: Rc<dyn Block>,
    dependencies: Vec<Variable>,
}

impl BlockEntry {
    #[must_use]
    pub fn block(&self) -> &Rc<dyn Block> {
        &self.block
    }

    #[must_use]
    pub fn dependencies(&self) -> &[Variable] {
        &self.dependencies
    }
}

/// The right-hand side of an equation.
#[derive(Debug, Clone)]
pub enum RightHandSide {
    Plain {
        rhs: Rc<dyn Rhs>,
        dependencies: Vec<Variable>,
    },
    Nonlinear(NonlinearRhs),
}

impl RightHandSide {
    pub fn plain(rhs: impl Rhs + 'static, dependencies: Vec<Variable>) -> Self {
        Self::Plain {
            rhs: Rc::new(rhs),
            dependencies,
        }
    }

    #[must_use]
    pub fn dependencies(&self) -> Vec<Variable> {
        match self {
            Self::Plain { dependencies, .. } => dependencies.clone(),
            Self::Nonlinear(rhs) => rhs.dependencies(),
        }
    }

    fn depends_on(&self, variable: &Variable) -> bool {
        match self {
            Self::Plain { dependencies, .. } => dependencies.contains(variable),
            Self::Nonlinear(rhs) => rhs.dependencies().contains(variable),
        }
    }

    fn evaluate(&self, values: &Values) -> Result<Term, Error> {
        match self {
            Self::Plain { rhs, .. } => rhs.evaluate(values),
            Self::Nonlinear(rhs) => rhs.evaluate(values),
        }
    }

    /// A short label used in logs and exports.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Plain { .. } => "rhs",
            Self::Nonlinear(_) => "nonlinear",
        }
    }
}

/// One recorded solve.
#[derive(Debug, Clone)]
pub struct Equation {
    target: Variable,
    dim: usize,
    timestep: usize,
    blocks: Vec<BlockEntry>,
    rhs: RightHandSide,
}

impl Equation {
    /// Creates an equation with no blocks yet.
    #[must_use]
    pub fn new(target: Variable, dim: usize, rhs: RightHandSide) -> Self {
        Self {
            target,
            dim,
            timestep: 0,
            blocks: Vec::new(),
            rhs,
        }
    }

    /// Creates the equation `M u = M u*` for a nonlinear solve.
    #[must_use]
    pub fn nonlinear(target: Variable, dim: usize, rhs: NonlinearRhs) -> Self {
        let mass = MassBlock::new(rhs.problem().mass());
        Self::new(target, dim, RightHandSide::Nonlinear(rhs)).with_block(Rc::new(mass), Vec::new())
    }

    /// Adds a block to the diagonal operator.
    #[must_use]
    pub fn with_block(mut self, block: Rc<dyn Block>, dependencies: Vec<Variable>) -> Self {
        self.blocks.push(BlockEntry {
            block,
            dependencies,
        });
        self
    }

    pub(crate) fn set_dim(&mut self, dim: usize) {
        self.dim = dim;
    }

    pub(crate) fn set_timestep(&mut self, timestep: usize) {
        self.timestep = timestep;
    }

    #[must_use]
    pub fn target(&self) -> &Variable {
        &self.target
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The clock timestep the equation was registered at.
    #[must_use]
    pub fn timestep(&self) -> usize {
        self.timestep
    }

    #[must_use]
    pub fn blocks(&self) -> &[BlockEntry] {
        &self.blocks
    }

    #[must_use]
    pub fn rhs(&self) -> &RightHandSide {
        &self.rhs
    }

    /// Returns every variable the equation reads, each once, blocks first.
    #[must_use]
    pub fn dependencies(&self) -> Vec<Variable> {
        let mut dependencies: Vec<Variable> = Vec::new();
        let all = self
            .blocks
            .iter()
            .flat_map(|entry| entry.dependencies.iter().cloned())
            .chain(self.rhs.dependencies());
        for variable in all {
            if !dependencies.contains(&variable) {
                dependencies.push(variable);
            }
        }
        dependencies
    }

    #[must_use]
    pub fn depends_on(&self, variable: &Variable) -> bool {
        self.rhs.depends_on(variable)
            || self
                .blocks
                .iter()
                .any(|entry| entry.dependencies.contains(variable))
    }

    /// Solves the equation for its target.
    ///
    /// # Errors
    ///
    /// Returns an error if a callback fails or the equation has no blocks.
    pub fn forward(&self, values: &Values) -> Result<Vector, Error> {
        let rhs = self.rhs.evaluate(values)?;
        let (operator, lifted) = self.operator(values, false)?;
        operator.solve(rhs.axpy(1.0, lifted)?)
    }

    /// Solves `A x = source`, or `A^T x = source` when `hermitian` is set.
    ///
    /// Any boundary data lifted by the blocks is ignored: adjoint and
    /// tangent-linear systems are homogeneous.
    ///
    /// # Errors
    ///
    /// Returns an error if a callback fails or the equation has no blocks.
    pub fn solve_linearized(
        &self,
        values: &Values,
        hermitian: bool,
        source: Term,
    ) -> Result<Vector, Error> {
        let (operator, _) = self.operator(values, hermitian)?;
        operator.solve(source)
    }

    fn operator(&self, values: &Values, hermitian: bool) -> Result<(Operator, Term), Error> {
        let mut entries = self.blocks.iter();
        let Some(first) = entries.next() else {
            return Err(Error::invalid_inputs(format!(
                "equation for {} has no blocks",
                self.target
            )));
        };
        let (mut operator, mut lifted) = first.block.assemble(values, hermitian, 1.0)?;
        for entry in entries {
            let (op, term) = entry.block.assemble(values, hermitian, 1.0)?;
            operator = operator.add_scaled(1.0, op)?;
            lifted = lifted.axpy(1.0, term)?;
        }
        Ok((operator, lifted))
    }

    /// Returns the right-hand side derivative along `variable` applied to
    /// `contraction`, transposed when `hermitian` is set.
    ///
    /// `solution` is the equation's own forward value, needed by nonlinear
    /// right-hand sides. Returns `None` if the right-hand side does not read
    /// `variable`.
    ///
    /// # Errors
    ///
    /// Returns an error if the callback fails or is not implemented.
    pub fn rhs_derivative(
        &self,
        values: &Values,
        solution: &Vector,
        variable: &Variable,
        contraction: &Vector,
        hermitian: bool,
    ) -> Result<Option<Term>, Error> {
        if !self.rhs.depends_on(variable) {
            return Ok(None);
        }
        let term = match &self.rhs {
            RightHandSide::Plain { rhs, .. } => {
                rhs.derivative_action(values, variable, contraction, hermitian)?
            }
            RightHandSide::Nonlinear(rhs) => {
                rhs.derivative_action(values, solution, variable, contraction, hermitian)?
            }
        };
        Ok(Some(term))
    }

    /// Returns `-(dA/d variable . solution)` applied to `input`, transposed
    /// when `hermitian` is set, summed over every block that reads
    /// `variable`.
    ///
    /// Returns `None` if no block reads `variable`.
    ///
    /// # Errors
    ///
    /// Returns an error if a callback fails or is not implemented.
    pub fn block_derivative(
        &self,
        values: &Values,
        solution: &Vector,
        variable: &Variable,
        input: &Vector,
        hermitian: bool,
    ) -> Result<Option<Term>, Error> {
        let mut total: Option<Term> = None;
        for entry in self
            .blocks
            .iter()
            .filter(|entry| entry.dependencies.contains(variable))
        {
            let action = entry.block.derivative_action(
                values, variable, solution, hermitian, input, -1.0,
            )?;
            total = Some(match total {
                Some(sum) => sum.axpy(1.0, Term::Vector(action))?,
                None => Term::Vector(action),
            });
        }
        Ok(total)
    }
}
