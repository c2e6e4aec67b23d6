//! The tape: an ordered log of equations plus the state needed to replay it.

mod assembly;
mod clock;
mod config;
mod replay;
mod solve;

use std::{
    cell::Cell,
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
};

use spool_core::{Error, Values, Variable, VariableStore, Vector};
use tracing::{debug, info};

use crate::{
    checkpoint::{CheckpointConfig, Persistence, Strategy},
    equation::Equation,
    storage::{Storage, Tier},
};

pub use assembly::{AssembledOperator, AssembledVector};
pub use clock::Clock;
pub use config::TapeConfig;
pub use replay::{ReplayAction, ReplayEvent, ReplayReport, ReplayStats, TangentLinear};
pub use solve::{Problem, SolveOptions};

pub(crate) use replay::ValueCache;

use self::{assembly::AssemblyCache, replay::AdjointPass};

static NEXT_TAPE_ID: AtomicU64 = AtomicU64::new(0);

/// Records forward solves and replays them forward, in reverse (adjoint),
/// or linearized forward (tangent linear).
///
/// A tape is created once, records equations in strictly increasing order,
/// and can be [`reset`](Self::reset) to start over. Dropping it removes any
/// disk checkpoints it wrote.
#[derive(Debug)]
pub struct Tape {
    id: u64,
    config: TapeConfig,
    strategy: Option<Box<dyn Strategy>>,
    log: Vec<Equation>,
    producers: HashMap<Variable, usize>,
    store: VariableStore,
    storage: Storage,
    clock: Clock,
    current: HashMap<String, (Variable, Vector)>,
    fields: HashMap<String, Vector>,
    host_writes: HashSet<String>,
    assembly: AssemblyCache,
    adjoint: Option<AdjointPass>,
    stats: Cell<ReplayStats>,
}

impl Default for Tape {
    fn default() -> Self {
        Self::from_valid_config(TapeConfig::default())
    }
}

impl Tape {
    /// Creates a tape that keeps every value in memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tape from a config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInputs`] if the checkpoint budget is invalid.
    pub fn with_config(config: TapeConfig) -> Result<Self, Error> {
        config
            .checkpoint()
            .validate()
            .map_err(|e| Error::invalid_inputs(format!("checkpoint config: {e}")))?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: TapeConfig) -> Self {
        let storage = Storage::new(config.disk_dir().map(Into::into));
        Self {
            id: NEXT_TAPE_ID.fetch_add(1, Ordering::Relaxed),
            config,
            strategy: None,
            log: Vec::new(),
            producers: HashMap::new(),
            store: VariableStore::new(),
            storage,
            clock: Clock::default(),
            current: HashMap::new(),
            fields: HashMap::new(),
            host_writes: HashSet::new(),
            assembly: AssemblyCache::default(),
            adjoint: None,
            stats: Cell::new(ReplayStats::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TapeConfig {
        &self.config
    }

    /// Selects the checkpoint strategy by name: `"all"`, `"none"`, or
    /// `"multistage"`.
    ///
    /// A multistage strategy also needs
    /// [`set_revolve_options`](Self::set_revolve_options) before the first
    /// registration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsistencyViolation`] once an equation has been
    /// registered, or [`Error::InvalidInputs`] for an unknown name.
    pub fn set_checkpoint_strategy(&mut self, name: &str) -> Result<(), Error> {
        self.ensure_unconfigured()?;
        let checkpoint = match name {
            "all" => CheckpointConfig::All,
            "none" => CheckpointConfig::None,
            "multistage" => match self.config.checkpoint() {
                multistage @ CheckpointConfig::Multistage { .. } => *multistage,
                _ => CheckpointConfig::Multistage {
                    steps: 0,
                    ram: 0,
                    disk: 0,
                    verbose: false,
                },
            },
            other => {
                return Err(Error::invalid_inputs(format!(
                    "unknown checkpoint strategy `{other}`"
                )));
            }
        };
        self.config.set_checkpoint(checkpoint);
        self.strategy = None;
        Ok(())
    }

    /// Configures the multistage schedule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsistencyViolation`] once an equation has been
    /// registered, or [`Error::InvalidInputs`] if the budget cannot be
    /// scheduled.
    pub fn set_revolve_options(
        &mut self,
        steps: usize,
        disk: usize,
        ram: usize,
        verbose: bool,
    ) -> Result<(), Error> {
        self.ensure_unconfigured()?;
        let checkpoint = CheckpointConfig::multistage(steps, ram, disk, verbose)
            .map_err(|e| Error::invalid_inputs(format!("revolve options: {e}")))?;
        self.config.set_checkpoint(checkpoint);
        self.strategy = None;
        Ok(())
    }

    fn ensure_unconfigured(&self) -> Result<(), Error> {
        if self.log.is_empty() {
            Ok(())
        } else {
            Err(Error::consistency(format!(
                "checkpointing must be configured before recording ({} equations registered)",
                self.log.len()
            )))
        }
    }

    fn strategy(&mut self) -> Result<&dyn Strategy, Error> {
        if self.strategy.is_none() {
            let checkpoint = self.config.checkpoint();
            let strategy = checkpoint.build().map_err(|e| {
                Error::consistency(format!(
                    "checkpoint strategy `{}` is not usable: {e}",
                    checkpoint.name()
                ))
            })?;
            self.strategy = Some(strategy);
        }
        self.strategy
            .as_deref()
            .ok_or_else(|| Error::consistency("checkpoint strategy is missing"))
    }

    /// Checks that a fixed checkpoint schedule covers exactly the recorded
    /// equations.
    ///
    /// Strategies without a fixed schedule always pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsistencyViolation`] if the counts differ.
    pub fn check_checkpoints(&mut self) -> Result<(), Error> {
        let recorded = self.log.len();
        let strategy = self.strategy()?;
        match strategy.total_steps() {
            Some(steps) if steps != recorded => Err(Error::consistency(format!(
                "strategy `{}` was configured for {steps} steps but {recorded} equations were recorded",
                strategy.name()
            ))),
            _ => Ok(()),
        }
    }

    /// Issues the next variable for `name`.
    pub fn next_variable(&mut self, name: &str) -> Variable {
        self.store.next(name)
    }

    #[must_use]
    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    /// Appends an equation to the log.
    ///
    /// Before the equation is appended the checkpoint strategy decides
    /// whether the values known at this point are persisted. The equation is
    /// stamped with the clock's current timestep.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsistencyViolation`] if the target is already known,
    /// a dependency is unknown, or the checkpoint strategy is not usable.
    /// Returns [`Error::InvalidInputs`] if the equation has zero dimension.
    pub fn register_equation(&mut self, mut equation: Equation) -> Result<usize, Error> {
        let target = equation.target().clone();
        if let Some(&index) = self.producers.get(&target) {
            return Err(Error::consistency(format!(
                "{target} is already known (equation {index})"
            )));
        }
        if equation.dim() == 0 {
            return Err(Error::invalid_inputs(format!(
                "equation for {target} has zero dimension"
            )));
        }
        for dependency in equation.dependencies() {
            if dependency == target {
                return Err(Error::consistency(format!(
                    "equation for {target} depends on itself"
                )));
            }
            if !self.variable_known(&dependency) {
                return Err(Error::consistency(format!(
                    "equation for {target} depends on unknown {dependency}"
                )));
            }
        }

        let index = self.log.len();
        let persistence = self.strategy()?.persistence(index);
        self.take_checkpoint(index, persistence)?;

        equation.set_timestep(self.clock.timestep());
        debug!(index, variable = %target, timestep = equation.timestep(), "registered equation");
        self.producers.insert(target, index);
        self.log.push(equation);
        self.adjoint = None;
        Ok(index)
    }

    fn take_checkpoint(&mut self, index: usize, persistence: Persistence) -> Result<(), Error> {
        let tier = match persistence {
            Persistence::None => return Ok(()),
            Persistence::Memory => Tier::Memory,
            Persistence::Disk => Tier::Disk,
        };
        if self.current.is_empty() {
            return Ok(());
        }

        let mut snapshot: Vec<(Variable, Vector)> = self.current.values().cloned().collect();
        snapshot.sort_by(|(a, _), (b, _)| a.name().cmp(b.name()));

        if self.config.checkpoint().verbose() {
            info!(index, ?tier, values = snapshot.len(), "checkpointing");
        } else {
            debug!(index, ?tier, values = snapshot.len(), "checkpointing");
        }
        self.storage.checkpoint(index, tier, &snapshot)
    }

    /// Returns `true` once an equation producing `variable` is registered.
    #[must_use]
    pub fn variable_known(&self, variable: &Variable) -> bool {
        self.producers.contains_key(variable)
    }

    /// Returns the index of the equation that produced `variable`.
    #[must_use]
    pub fn producer(&self, variable: &Variable) -> Option<usize> {
        self.producers.get(variable).copied()
    }

    #[must_use]
    pub fn equation(&self, index: usize) -> Option<&Equation> {
        self.log.get(index)
    }

    #[must_use]
    pub fn equations(&self) -> &[Equation] {
        &self.log
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.log.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Stores a value explicitly.
    ///
    /// Recorded values are what [`check_replay`](Self::check_replay)
    /// compares against, and they are never recomputed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsistencyViolation`] if `variable` is unknown, or a
    /// storage error if a disk write fails.
    pub fn record_variable(&mut self, variable: &Variable, value: Vector, tier: Tier) -> Result<(), Error> {
        if !self.variable_known(variable) {
            return Err(Error::consistency(format!(
                "cannot record unknown {variable}"
            )));
        }
        self.storage.record(variable, &value, tier)?;
        if self.store.lookup(variable.name()).ok().as_ref() == Some(variable) {
            self.current
                .insert(variable.name().to_owned(), (variable.clone(), value));
        }
        Ok(())
    }

    /// Releases the storage tied to equation `index`: the checkpoint taken
    /// before it and any explicit recording of its target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInputs`] for an index past the end of the log,
    /// or a storage error if a disk artifact cannot be removed.
    pub fn forget_equation(&mut self, index: usize) -> Result<(), Error> {
        let target = self.target_of(index)?.clone();
        self.storage.forget_checkpoint(index)?;
        self.storage.forget_recorded(&target)?;
        debug!(index, "forgot equation storage");
        Ok(())
    }

    /// Releases the adjoint solution at `index` and every checkpoint the
    /// remaining reverse steps can no longer need.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInputs`] for an index past the end of the log,
    /// or a storage error if a disk artifact cannot be removed.
    pub fn forget_adjoint_equation(&mut self, index: usize) -> Result<(), Error> {
        self.target_of(index)?;
        if let Some(pass) = &mut self.adjoint {
            pass.forget(index);
        }
        self.storage.forget_checkpoints_from(index)?;
        debug!(index, "forgot adjoint equation");
        Ok(())
    }

    fn target_of(&self, index: usize) -> Result<&Variable, Error> {
        self.log.get(index).map(Equation::target).ok_or_else(|| {
            Error::invalid_inputs(format!(
                "no equation {index} (the tape holds {})",
                self.log.len()
            ))
        })
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Gives direct access to the timestep clock.
    pub fn time(&mut self) -> &mut Clock {
        &mut self.clock
    }

    pub fn start_timestep(&mut self, t0: f64) {
        self.clock.start(t0);
    }

    /// Advances the clock, optionally recording the new start time and
    /// marking the run as finished.
    pub fn inc_timestep(&mut self, time: Option<f64>, finished: bool) {
        self.clock.next(time);
        if finished {
            self.clock.finish();
        }
    }

    /// Returns the host-visible value of `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Vector> {
        self.fields.get(name)
    }

    /// Publishes a host value for `name` without recording anything.
    ///
    /// The next annotated solve that reads `name` records the value as a
    /// constant: an initial condition for a new name, or a fresh time level
    /// for a name the tape already tracks.
    pub fn set_field(&mut self, name: &str, value: Vector) {
        self.write_field(name, value);
    }

    fn write_field(&mut self, name: &str, value: Vector) {
        self.fields.insert(name.to_owned(), value);
        self.host_writes.insert(name.to_owned());
    }

    /// Makes `value` the current value of a freshly registered `variable`.
    fn publish(&mut self, variable: &Variable, value: Vector) {
        let name = variable.name().to_owned();
        self.fields.insert(name.clone(), value.clone());
        self.host_writes.remove(&name);
        self.current.insert(name, (variable.clone(), value));
    }

    /// Returns the replay work counters.
    #[must_use]
    pub fn stats(&self) -> ReplayStats {
        self.stats.get()
    }

    fn bump(&self, update: impl FnOnce(&mut ReplayStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }

    /// Clears the log, the variable store, every stored value, and the clock.
    ///
    /// The checkpoint configuration is kept and may be changed again before
    /// the next registration.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a disk artifact cannot be removed.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.storage.reset()?;
        self.strategy = None;
        self.log.clear();
        self.producers.clear();
        self.store.reset();
        self.clock = Clock::default();
        self.current.clear();
        self.fields.clear();
        self.host_writes.clear();
        self.assembly.clear();
        self.adjoint = None;
        self.stats.set(ReplayStats::default());
        info!(tape = self.id, "reset tape");
        Ok(())
    }

    /// Collects the values of `variables`, recomputing any that are not
    /// stored.
    pub(crate) fn values_for(
        &self,
        variables: &[Variable],
        cache: &mut ValueCache,
    ) -> Result<Values, Error> {
        let mut values = Values::new();
        for variable in variables {
            let value = self.value_of(variable, cache)?;
            values.insert(variable.clone(), value);
        }
        Ok(values)
    }

    /// Returns the values an equation's parameter source sees: its
    /// dependencies and its target.
    pub(crate) fn equation_values(&self, index: usize) -> Result<Values, Error> {
        let equation = self
            .log
            .get(index)
            .ok_or_else(|| Error::invalid_inputs(format!("no equation {index}")))?;
        let mut cache = ValueCache::new();
        let mut values = self.values_for(&equation.dependencies(), &mut cache)?;
        let target = equation.target();
        values.insert(target.clone(), self.value_of(target, &mut cache)?);
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::rc::Rc;

    use crate::equation::{AssignRhs, ConstantRhs, IdentityBlock, RightHandSide};

    fn constant(tape: &mut Tape, name: &str, value: f64) -> Variable {
        let variable = tape.next_variable(name);
        let equation = Equation::new(
            variable.clone(),
            1,
            RightHandSide::plain(ConstantRhs::new(Vector::from(vec![value])), vec![]),
        )
        .with_block(Rc::new(IdentityBlock::new(1)), vec![]);
        tape.register_equation(equation).unwrap();
        variable
    }

    fn copy(target: Variable, source: &Variable) -> Equation {
        Equation::new(
            target,
            1,
            RightHandSide::plain(AssignRhs::new(source.name()), vec![source.clone()]),
        )
        .with_block(Rc::new(IdentityBlock::new(1)), vec![])
    }

    #[test]
    fn registration_marks_targets_known() {
        let mut tape = Tape::new();
        let u0 = constant(&mut tape, "u", 1.0);

        assert!(tape.variable_known(&u0));
        assert_eq!(tape.producer(&u0), Some(0));
        assert_eq!(tape.len(), 1);
    }

    #[test]
    fn duplicate_targets_are_rejected() {
        let mut tape = Tape::new();
        let u0 = constant(&mut tape, "u", 1.0);

        let again = Equation::new(
            u0,
            1,
            RightHandSide::plain(ConstantRhs::new(Vector::zeros(1)), vec![]),
        )
        .with_block(Rc::new(IdentityBlock::new(1)), vec![]);
        assert!(matches!(
            tape.register_equation(again),
            Err(Error::ConsistencyViolation(_))
        ));
    }

    #[test]
    fn unknown_dependencies_are_rejected() {
        let mut tape = Tape::new();
        let ghost = Variable::forward("ghost", 0, 0);
        let target = tape.next_variable("v");

        let result = tape.register_equation(copy(target, &ghost));
        let Err(Error::ConsistencyViolation(message)) = result else {
            panic!("expected a consistency violation");
        };
        assert!(message.contains("ghost:0:0"));
    }

    #[test]
    fn recording_unknown_variables_is_rejected() {
        let mut tape = Tape::new();
        let result = tape.record_variable(&Variable::forward("u", 0, 0), Vector::zeros(1), Tier::Memory);
        assert!(matches!(result, Err(Error::ConsistencyViolation(_))));
    }

    #[test]
    fn checkpointing_is_locked_after_registration() {
        let mut tape = Tape::new();
        tape.set_checkpoint_strategy("none").unwrap();
        constant(&mut tape, "u", 1.0);

        assert!(matches!(
            tape.set_checkpoint_strategy("all"),
            Err(Error::ConsistencyViolation(_))
        ));
        assert!(matches!(
            tape.set_revolve_options(4, 0, 1, false),
            Err(Error::ConsistencyViolation(_))
        ));
    }

    #[test]
    fn unknown_strategy_names_are_rejected() {
        let mut tape = Tape::new();
        assert!(matches!(
            tape.set_checkpoint_strategy("revolve-ish"),
            Err(Error::InvalidInputs(_))
        ));
    }

    #[test]
    fn multistage_without_options_cannot_record() {
        let mut tape = Tape::new();
        tape.set_checkpoint_strategy("multistage").unwrap();
        let variable = tape.next_variable("u");
        let equation = Equation::new(
            variable,
            1,
            RightHandSide::plain(ConstantRhs::new(Vector::zeros(1)), vec![]),
        )
        .with_block(Rc::new(IdentityBlock::new(1)), vec![]);

        assert!(matches!(
            tape.register_equation(equation),
            Err(Error::ConsistencyViolation(_))
        ));
    }

    #[test]
    fn check_checkpoints_compares_step_counts() {
        let mut tape = Tape::new();
        tape.set_revolve_options(3, 0, 1, false).unwrap();
        let u0 = constant(&mut tape, "u", 1.0);
        let u1 = tape.next_variable("u");
        tape.register_equation(copy(u1, &u0)).unwrap();

        assert!(matches!(
            tape.check_checkpoints(),
            Err(Error::ConsistencyViolation(_))
        ));

        let u1 = tape.store().lookup("u").unwrap();
        let u2 = tape.next_variable("u");
        tape.register_equation(copy(u2, &u1)).unwrap();
        tape.check_checkpoints().unwrap();
    }

    #[test]
    fn equations_are_stamped_with_the_clock() {
        let mut tape = Tape::new();
        tape.start_timestep(0.0);
        constant(&mut tape, "u", 1.0);
        tape.inc_timestep(Some(0.5), true);
        let v = constant(&mut tape, "v", 2.0);

        assert_eq!(tape.equation(0).unwrap().timestep(), 0);
        assert_eq!(tape.equation(tape.producer(&v).unwrap()).unwrap().timestep(), 1);
        assert!(tape.clock().is_finished());
    }

    #[test]
    fn reset_clears_everything() {
        let mut tape = Tape::new();
        let u0 = constant(&mut tape, "u", 1.0);
        tape.record_variable(&u0, Vector::from(vec![1.0]), Tier::Memory)
            .unwrap();

        tape.reset().unwrap();
        assert!(tape.is_empty());
        assert!(!tape.variable_known(&u0));
        assert!(tape.storage().is_empty());
        assert!(!tape.store().contains("u"));
        tape.set_checkpoint_strategy("none").unwrap();
    }
}
