use std::collections::HashMap;

use spool_core::{Variable, Vector};

/// Values held in process memory.
#[derive(Debug, Default)]
pub(crate) struct MemoryTier {
    values: HashMap<Variable, Vector>,
}

impl MemoryTier {
    pub(crate) fn insert(&mut self, variable: Variable, value: Vector) {
        self.values.insert(variable, value);
    }

    pub(crate) fn get(&self, variable: &Variable) -> Option<&Vector> {
        self.values.get(variable)
    }

    pub(crate) fn remove(&mut self, variable: &Variable) {
        self.values.remove(variable);
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }
}
