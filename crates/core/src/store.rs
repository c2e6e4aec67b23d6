use std::collections::HashMap;

use crate::{Error, Variable};

/// Maps quantity names to their current forward [`Variable`].
///
/// Each call to [`next`](Self::next) advances a name by one timestep, so the
/// host never manages time levels by hand. Names are independent of each
/// other.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    timesteps: HashMap<String, usize>,
}

impl VariableStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances `name` and returns its new variable.
    ///
    /// The first call for an unseen name returns `(name, 0, 0)`.
    pub fn next(&mut self, name: &str) -> Variable {
        let timestep = match self.timesteps.get_mut(name) {
            Some(timestep) => {
                *timestep += 1;
                *timestep
            }
            None => {
                self.timesteps.insert(name.to_owned(), 0);
                0
            }
        };
        Variable::forward(name, timestep, 0)
    }

    /// Returns the variable the next call to [`next`](Self::next) would
    /// issue, without advancing.
    #[must_use]
    pub fn upcoming(&self, name: &str) -> Variable {
        let timestep = self.timesteps.get(name).map_or(0, |&timestep| timestep + 1);
        Variable::forward(name, timestep, 0)
    }

    /// Returns the current variable for `name` without advancing it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsistencyViolation`] if `next` was never called for
    /// `name`.
    pub fn lookup(&self, name: &str) -> Result<Variable, Error> {
        self.timesteps
            .get(name)
            .map(|&timestep| Variable::forward(name, timestep, 0))
            .ok_or_else(|| Error::consistency(format!("no variable has been issued for `{name}`")))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.timesteps.contains_key(name)
    }

    /// Returns the tracked names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.timesteps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Forgets every name.
    pub fn reset(&mut self) {
        self.timesteps.clear();
    }
}
