//! Read-only views of a recorded tape.
//!
//! Nothing here mutates the tape or triggers a replay.

use std::{collections::HashMap, fmt::Write as _};

use petgraph::{
    Direction,
    algo::toposort,
    dot::Dot,
    graph::{DiGraph, NodeIndex},
};
use serde::Serialize;
use spool_core::{Error, Variable};

use crate::{
    Tape,
    storage::Tier,
    tape::ReplayStats,
};

/// The dependency graph of a tape.
///
/// Nodes are variables. An edge runs from each dependency to the target of
/// the equation that reads it, weighted by that equation's index.
#[derive(Debug)]
pub struct TapeGraph {
    graph: DiGraph<Variable, usize>,
    node_map: HashMap<Variable, NodeIndex>,
}

impl TapeGraph {
    #[must_use]
    pub fn from_tape(tape: &Tape) -> Self {
        let mut graph = Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        };
        for (index, equation) in tape.equations().iter().enumerate() {
            let target = graph.get_or_add(equation.target());
            for dependency in equation.dependencies() {
                let source = graph.get_or_add(&dependency);
                graph.graph.add_edge(source, target, index);
            }
        }
        graph
    }

    fn get_or_add(&mut self, variable: &Variable) -> NodeIndex {
        if let Some(&index) = self.node_map.get(variable) {
            return index;
        }
        let index = self.graph.add_node(variable.clone());
        self.node_map.insert(variable.clone(), index);
        index
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the variables `variable` was computed from.
    #[must_use]
    pub fn dependencies_of(&self, variable: &Variable) -> Vec<&Variable> {
        let Some(&index) = self.node_map.get(variable) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .map(|n| &self.graph[n])
            .collect()
    }

    /// Returns the variables that read `variable`.
    #[must_use]
    pub fn dependents_of(&self, variable: &Variable) -> Vec<&Variable> {
        let Some(&index) = self.node_map.get(variable) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(index, Direction::Outgoing)
            .map(|n| &self.graph[n])
            .collect()
    }

    /// Returns every variable after all of its dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsistencyViolation`] if the graph has a cycle, which
    /// registration rules out.
    pub fn topological_order(&self) -> Result<Vec<&Variable>, Error> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            Error::consistency(format!(
                "dependency cycle through {}",
                self.graph[cycle.node_id()]
            ))
        })?;
        Ok(sorted.into_iter().map(|n| &self.graph[n]).collect())
    }

    /// Renders the graph in Graphviz DOT format.
    #[must_use]
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::new(&self.graph))
    }
}

#[derive(Debug, Serialize)]
struct TapeSummary {
    strategy: &'static str,
    timestep: usize,
    equations: Vec<EquationSummary>,
    checkpoints: Vec<CheckpointSummary>,
    stats: ReplayStats,
}

#[derive(Debug, Serialize)]
struct EquationSummary {
    index: usize,
    target: Variable,
    timestep: usize,
    blocks: Vec<String>,
    rhs: &'static str,
    dependencies: Vec<Variable>,
    recorded: bool,
}

#[derive(Debug, Serialize)]
struct CheckpointSummary {
    index: usize,
    tier: Tier,
    variables: Vec<Variable>,
}

fn summarize(tape: &Tape) -> TapeSummary {
    let equations = tape
        .equations()
        .iter()
        .enumerate()
        .map(|(index, equation)| EquationSummary {
            index,
            target: equation.target().clone(),
            timestep: equation.timestep(),
            blocks: equation
                .blocks()
                .iter()
                .map(|entry| entry.block().name().to_owned())
                .collect(),
            rhs: equation.rhs().label(),
            dependencies: equation.dependencies(),
            recorded: tape.storage().is_recorded(equation.target()),
        })
        .collect();
    let checkpoints = tape
        .storage()
        .checkpoints()
        .map(|(index, checkpoint)| CheckpointSummary {
            index,
            tier: checkpoint.tier(),
            variables: checkpoint.variables().to_vec(),
        })
        .collect();

    TapeSummary {
        strategy: tape.config().checkpoint().name(),
        timestep: tape.clock().timestep(),
        equations,
        checkpoints,
        stats: tape.stats(),
    }
}

/// Renders the equation log and checkpoints as plain text.
#[must_use]
pub fn report(tape: &Tape) -> String {
    let summary = summarize(tape);
    let mut out = String::new();

    let _ = writeln!(
        out,
        "tape: {} equations, strategy `{}`, timestep {}",
        summary.equations.len(),
        summary.strategy,
        summary.timestep
    );
    for equation in &summary.equations {
        let dependencies: Vec<String> = equation.dependencies.iter().map(ToString::to_string).collect();
        let _ = writeln!(
            out,
            "  [{}] {} <- {} [{}] via {} (timestep {}){}",
            equation.index,
            equation.target,
            equation.blocks.join(" + "),
            dependencies.join(", "),
            equation.rhs,
            equation.timestep,
            if equation.recorded { ", recorded" } else { "" }
        );
    }
    for checkpoint in &summary.checkpoints {
        let _ = writeln!(
            out,
            "  checkpoint before [{}] in {:?}: {} values",
            checkpoint.index,
            checkpoint.tier,
            checkpoint.variables.len()
        );
    }
    out
}

/// Serializes the equation log, checkpoints, and replay counters as JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_json(tape: &Tape) -> Result<String, Error> {
    serde_json::to_string_pretty(&summarize(tape)).map_err(Error::host)
}
