use std::{
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

/// Which system a [`Variable`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Forward,
    Adjoint,
    TangentLinear,
}

/// A node in the tape's dependency graph.
///
/// A variable names one value of a host quantity at one logical time level.
/// Equality and hashing consider only `(name, timestep, iteration)`, so the
/// adjoint or tangent-linear counterpart of a forward variable addresses the
/// same graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    name: String,
    timestep: usize,
    iteration: usize,
    kind: Kind,
}

impl Variable {
    /// Creates a variable of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, timestep: usize, iteration: usize, kind: Kind) -> Self {
        Self {
            name: name.into(),
            timestep,
            iteration,
            kind,
        }
    }

    /// Creates a forward variable.
    #[must_use]
    pub fn forward(name: impl Into<String>, timestep: usize, iteration: usize) -> Self {
        Self::new(name, timestep, iteration, Kind::Forward)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn timestep(&self) -> usize {
        self.timestep
    }

    #[must_use]
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Returns the same node tagged with another kind.
    #[must_use]
    pub fn with_kind(&self, kind: Kind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    /// Returns the variable one timestep earlier, or `None` at timestep zero.
    #[must_use]
    pub fn previous(&self) -> Option<Self> {
        let timestep = self.timestep.checked_sub(1)?;
        Some(Self {
            timestep,
            ..self.clone()
        })
    }

    /// Returns a deterministic, file-system safe name for this variable.
    ///
    /// ASCII letters and digits pass through, `_` becomes `__` and every
    /// other byte becomes `_xHH`. The parts are joined with `-`, so distinct
    /// variables never share a name.
    #[must_use]
    pub fn artifact_name(&self) -> String {
        let mut name = String::with_capacity(self.name.len());
        for byte in self.name.bytes() {
            match byte {
                b'_' => name.push_str("__"),
                b if b.is_ascii_alphanumeric() => name.push(char::from(b)),
                b => name.push_str(&format!("_x{b:02X}")),
            }
        }
        format!("{name}-{}-{}", self.timestep, self.iteration)
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.timestep == other.timestep
            && self.iteration == other.iteration
            && self.name == other.name
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.timestep.hash(state);
        self.iteration.hash(state);
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{:?}",
            self.name, self.timestep, self.iteration, self.kind
        )
    }
}
