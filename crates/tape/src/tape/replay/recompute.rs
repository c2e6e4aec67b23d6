use std::collections::HashMap;

use spool_core::{Error, Values, Variable, Vector};
use tracing::debug;

use crate::tape::Tape;

/// Forward values rebuilt during one replay.
pub(crate) type ValueCache = HashMap<Variable, Vector>;

impl Tape {
    /// Returns the forward value of `variable`.
    ///
    /// Looks in `cache`, then the current host-visible values, then storage.
    /// Anything else is recomputed by re-running the log from the nearest
    /// checkpoint at or before the equation that produced it; every value
    /// rebuilt on the way is added to `cache`.
    pub(crate) fn value_of(
        &self,
        variable: &Variable,
        cache: &mut ValueCache,
    ) -> Result<Vector, Error> {
        if let Some(value) = self.known_value(variable, cache)? {
            return Ok(value);
        }

        let index = self.producer(variable).ok_or_else(|| {
            Error::consistency(format!("{variable} was never registered"))
        })?;
        self.recompute(index, cache)?;
        cache
            .get(variable)
            .cloned()
            .ok_or_else(|| Error::StorageMissing {
                variable: variable.clone(),
                index,
            })
    }

    fn known_value(
        &self,
        variable: &Variable,
        cache: &ValueCache,
    ) -> Result<Option<Vector>, Error> {
        if let Some(value) = cache.get(variable) {
            return Ok(Some(value.clone()));
        }
        if let Some((current, value)) = self.current.get(variable.name())
            && current == variable
        {
            return Ok(Some(value.clone()));
        }
        self.storage.get(variable)
    }

    /// Re-runs equations from the nearest checkpoint up to and including
    /// `index`.
    ///
    /// A checkpoint only holds the latest value of each name. Older
    /// dependencies are fetched through [`Tape::value_of`], which recurses to
    /// an earlier checkpoint; producers always precede their readers, so the
    /// recursion ends.
    fn recompute(&self, index: usize, cache: &mut ValueCache) -> Result<(), Error> {
        let mut local = ValueCache::new();
        let start = match self.storage.checkpoint_at_or_before(index) {
            Some((start, checkpoint)) => {
                for variable in checkpoint.variables() {
                    let value = self.storage.get(variable)?.ok_or_else(|| Error::StorageMissing {
                        variable: variable.clone(),
                        index: start,
                    })?;
                    local.insert(variable.clone(), value);
                }
                start
            }
            None => 0,
        };
        debug!(from = start, to = index, "recomputing forward values");

        for (i, equation) in self.log.iter().enumerate().take(index + 1).skip(start) {
            let mut values = Values::new();
            for dependency in equation.dependencies() {
                let value = match local.get(&dependency) {
                    Some(value) => value.clone(),
                    // Produced before the checkpoint, so rebuilt from an earlier one.
                    None if self.producer(&dependency).is_some() => {
                        self.value_of(&dependency, cache)?
                    }
                    None => self.known_value(&dependency, cache)?.ok_or_else(|| {
                        Error::StorageMissing {
                            variable: dependency.clone(),
                            index: i,
                        }
                    })?,
                };
                values.insert(dependency, value);
            }
            let value = equation.forward(&values)?;
            local.insert(equation.target().clone(), value);
            self.bump(|stats| stats.recomputed += 1);
        }

        cache.extend(local);
        Ok(())
    }

    /// Maps every variable to the last equation index that reads it, or to
    /// its producer if nothing does.
    pub(crate) fn last_uses(&self) -> HashMap<Variable, usize> {
        let mut last = HashMap::new();
        for (index, equation) in self.log.iter().enumerate() {
            last.insert(equation.target().clone(), index);
            for dependency in equation.dependencies() {
                last.insert(dependency, index);
            }
        }
        last
    }
}
