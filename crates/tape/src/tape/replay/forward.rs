use serde::Serialize;
use spool_core::{Error, Observer, Values, Variable, Vector};
use tracing::{info, warn};

use super::ValueCache;
use crate::tape::Tape;

/// One equation re-executed during a forward replay.
#[derive(Debug, Clone)]
pub struct ReplayEvent {
    pub index: usize,
    pub variable: Variable,
    pub value: Vector,
    /// The explicitly recorded value of `variable`, if there is one.
    pub recorded: Option<Vector>,
}

/// Actions an observer can request during a forward replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayAction {
    Stop,
}

/// Summary of [`Tape::check_replay`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReplayReport {
    /// Equations re-executed.
    pub replayed: usize,
    /// Replayed values that had a recorded value to compare against.
    pub compared: usize,
    /// Largest absolute difference seen.
    pub max_difference: f64,
}

impl Tape {
    /// Re-runs every equation from the start of the log.
    ///
    /// Values are dropped as soon as no later equation reads them. The
    /// observer sees each solution in order and may stop the replay early.
    /// Returns the number of equations replayed.
    ///
    /// # Errors
    ///
    /// Returns an error if a callback fails or a recorded value cannot be
    /// loaded.
    pub fn forward_replay<O>(&self, mut observer: O) -> Result<usize, Error>
    where
        O: Observer<ReplayEvent, ReplayAction>,
    {
        let last_uses = self.last_uses();
        let mut live = ValueCache::new();

        for (index, equation) in self.log.iter().enumerate() {
            let mut values = Values::new();
            for dependency in equation.dependencies() {
                let value = live.get(&dependency).cloned().ok_or_else(|| Error::StorageMissing {
                    variable: dependency.clone(),
                    index,
                })?;
                values.insert(dependency, value);
            }

            let target = equation.target();
            let value = equation.forward(&values)?;
            let recorded = if self.storage.is_recorded(target) {
                self.storage.get(target)?
            } else {
                None
            };
            let event = ReplayEvent {
                index,
                variable: target.clone(),
                value: value.clone(),
                recorded,
            };

            live.insert(target.clone(), value);
            for variable in values.variables().chain(std::iter::once(target)) {
                if last_uses.get(variable) == Some(&index) {
                    live.remove(variable);
                }
            }

            if let Some(ReplayAction::Stop) = observer.observe(&event) {
                return Ok(index + 1);
            }
        }

        Ok(self.log.len())
    }

    /// Replays the tape and compares every explicitly recorded value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsistencyViolation`] naming the first variable whose
    /// replayed value differs from its recording by more than `tolerance`,
    /// or any error from the replay itself.
    pub fn check_replay(&self, tolerance: f64) -> Result<ReplayReport, Error> {
        let mut compared = 0;
        let mut max_difference: f64 = 0.0;
        let mut mismatch: Option<(Variable, f64)> = None;

        let replayed = self.forward_replay(|event: &ReplayEvent| {
            let recorded = event.recorded.as_ref()?;
            let difference = event
                .value
                .max_abs_diff(recorded)
                .unwrap_or(f64::INFINITY);
            compared += 1;
            max_difference = max_difference.max(difference);
            (difference > tolerance).then(|| {
                mismatch = Some((event.variable.clone(), difference));
                ReplayAction::Stop
            })
        })?;

        if let Some((variable, difference)) = mismatch {
            warn!(%variable, difference, tolerance, "replay diverged");
            return Err(Error::consistency(format!(
                "replayed {variable} differs from its recorded value by {difference:e} (tolerance {tolerance:e})"
            )));
        }

        info!(replayed, compared, max_difference, "replay matches recorded values");
        Ok(ReplayReport {
            replayed,
            compared,
            max_difference,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use spool_core::{Rhs, Term};

    use crate::{
        equation::{AssignRhs, IdentityBlock},
        tape::{Problem, SolveOptions},
    };

    use super::*;

    /// Doubles `u`, or does something else entirely after the first call.
    #[derive(Debug)]
    struct Drifting {
        calls: std::cell::Cell<usize>,
    }

    impl Rhs for Drifting {
        fn coefficients(&self) -> Vec<String> {
            vec!["u".into()]
        }

        fn evaluate(&self, values: &Values) -> Result<Term, Error> {
            let calls = self.calls.get();
            self.calls.set(calls + 1);
            let scale = if calls == 0 { 2.0 } else { 3.0 };
            Ok(Term::Vector(values.get("u")?.scaled(scale)))
        }
    }

    fn doubling_tape(rhs: impl Rhs + 'static) -> Tape {
        let mut tape = Tape::new();
        tape.set_field("u", Vector::from(vec![1.0, 2.0]));
        let problem = Problem::Linear {
            blocks: vec![Rc::new(IdentityBlock::new(2))],
            rhs: Rc::new(rhs),
        };
        tape.solve(&problem, "v", SolveOptions::recorded()).unwrap();
        tape.solve(
            &Problem::linear(IdentityBlock::new(2), AssignRhs::new("v")),
            "w",
            SolveOptions::recorded(),
        )
        .unwrap();
        tape
    }

    #[test]
    fn replay_matches_recorded_values() {
        let tape = doubling_tape(AssignRhs::new("u"));
        let report = tape.check_replay(1e-12).unwrap();
        assert_eq!(report.replayed, 3);
        assert_eq!(report.compared, 3);
        assert!(report.max_difference < 1e-12);
    }

    #[test]
    fn divergence_names_the_variable() {
        let tape = doubling_tape(Drifting {
            calls: std::cell::Cell::new(0),
        });
        let Err(Error::ConsistencyViolation(message)) = tape.check_replay(1e-12) else {
            panic!("expected the replay to diverge");
        };
        assert!(message.contains("v:0:0"));
    }

    #[test]
    fn observers_can_stop_early() {
        let tape = doubling_tape(AssignRhs::new("u"));
        let replayed = tape
            .forward_replay(|event: &ReplayEvent| (event.index == 1).then_some(ReplayAction::Stop))
            .unwrap();
        assert_eq!(replayed, 2);
    }
}
