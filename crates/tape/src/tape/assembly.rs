use std::rc::Rc;

use spool_core::{Block, Error, Operator, Rhs, Values, Variable, Vector};
use tracing::debug;

use super::Tape;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Handle {
    tape: u64,
    slot: usize,
}

/// An operator assembled from host values.
///
/// Operators assembled through [`Tape::assemble_operator`] remember the block
/// they came from, so a later annotated solve can record it. An operator
/// built any other way is untracked and only usable in unannotated solves.
#[derive(Debug, Clone)]
pub struct AssembledOperator {
    handle: Option<Handle>,
    operator: Operator,
}

impl AssembledOperator {
    /// Wraps an operator the tape knows nothing about.
    #[must_use]
    pub fn untracked(operator: Operator) -> Self {
        Self {
            handle: None,
            operator,
        }
    }

    #[must_use]
    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.handle.is_some()
    }
}

/// A right-hand side vector assembled from host values.
#[derive(Debug, Clone)]
pub struct AssembledVector {
    handle: Option<Handle>,
    value: Vector,
}

impl AssembledVector {
    #[must_use]
    pub fn untracked(value: Vector) -> Self {
        Self {
            handle: None,
            value,
        }
    }

    #[must_use]
    pub fn value(&self) -> &Vector {
        &self.value
    }

    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.handle.is_some()
    }
}

/// Blocks and right-hand sides handed out through tracked assembly.
///
/// Each distinct `Rc` takes one slot, so reassembling the same block every
/// timestep does not grow the cache.
#[derive(Debug, Default)]
pub(super) struct AssemblyCache {
    blocks: Vec<Rc<dyn Block>>,
    rhs: Vec<Rc<dyn Rhs>>,
}

impl AssemblyCache {
    pub(super) fn clear(&mut self) {
        self.blocks.clear();
        self.rhs.clear();
    }

    fn block_slot(&mut self, block: Rc<dyn Block>) -> usize {
        slot_of(&mut self.blocks, block)
    }

    fn rhs_slot(&mut self, rhs: Rc<dyn Rhs>) -> usize {
        slot_of(&mut self.rhs, rhs)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.blocks.len() + self.rhs.len()
    }
}

fn slot_of<T: ?Sized>(entries: &mut Vec<Rc<T>>, entry: Rc<T>) -> usize {
    if let Some(slot) = entries
        .iter()
        .position(|held| std::ptr::addr_eq(Rc::as_ptr(held), Rc::as_ptr(&entry)))
    {
        return slot;
    }
    entries.push(entry);
    entries.len() - 1
}

impl Tape {
    /// Assembles `block` against the current host values.
    ///
    /// Nothing is recorded until the operator is used in an annotated solve.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInputs`] if a coefficient has no host value, or
    /// the block's own error if assembly fails.
    pub fn assemble_operator(
        &mut self,
        block: Rc<dyn Block>,
    ) -> Result<AssembledOperator, Error> {
        let values = self.field_values(&block.coefficients())?;
        let (operator, _) = block.assemble(&values, false, 1.0)?;
        let slot = self.assembly.block_slot(block);
        debug!(slot, "assembled operator");
        Ok(AssembledOperator {
            handle: Some(Handle { tape: self.id, slot }),
            operator,
        })
    }

    /// Evaluates `rhs` against the current host values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInputs`] if a coefficient has no host value, or
    /// the right-hand side's own error if evaluation fails.
    pub fn assemble_vector(&mut self, rhs: Rc<dyn Rhs>) -> Result<AssembledVector, Error> {
        let values = self.field_values(&rhs.coefficients())?;
        let value = rhs.evaluate(&values)?.materialize()?;
        let slot = self.assembly.rhs_slot(rhs);
        debug!(slot, "assembled vector");
        Ok(AssembledVector {
            handle: Some(Handle { tape: self.id, slot }),
            value,
        })
    }

    pub(super) fn assembled_block(
        &self,
        operator: &AssembledOperator,
    ) -> Result<Rc<dyn Block>, Error> {
        operator
            .handle
            .filter(|handle| handle.tape == self.id)
            .and_then(|handle| self.assembly.blocks.get(handle.slot))
            .cloned()
            .ok_or_else(|| {
                Error::invalid_inputs("operator was not assembled through this tape")
            })
    }

    pub(super) fn assembled_rhs(&self, vector: &AssembledVector) -> Result<Rc<dyn Rhs>, Error> {
        vector
            .handle
            .filter(|handle| handle.tape == self.id)
            .and_then(|handle| self.assembly.rhs.get(handle.slot))
            .cloned()
            .ok_or_else(|| {
                Error::invalid_inputs("right-hand side was not assembled through this tape")
            })
    }

    /// Collects host values for `names`.
    pub(super) fn field_values(&self, names: &[String]) -> Result<Values, Error> {
        let mut values = Values::new();
        for name in names {
            let value = self.fields.get(name).ok_or_else(|| {
                Error::invalid_inputs(format!("`{name}` has no host value"))
            })?;
            let variable = self
                .store
                .lookup(name)
                .unwrap_or_else(|_| Variable::forward(name.as_str(), 0, 0));
            values.insert(variable, value.clone());
        }
        Ok(values)
    }
}
