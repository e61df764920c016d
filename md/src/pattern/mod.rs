//! Pattern engine: collaboration topologies over a resolved agent set
//!
//! Every topology shares one contract: a NodeStatus per participant (there
//! is no "done" state), outputs concatenated in declared participant order
//! regardless of completion time, a run timeout, and an absolute-veto
//! short-circuit. Gates are evaluated at the phase boundary over the
//! collected status map.

mod chain;
mod checkpoint;
mod concurrent;
mod iterative;
mod mesh;
mod runner;

pub use runner::{PatternEngine, ResolvedParticipant};

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::GatePredicate;
use crate::guard::GuardReport;

/// Per-participant terminal tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Vetoed,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Vetoed | NodeStatus::Failed)
    }
}

/// One participant's result within a run
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub agent_id: String,
    pub status: NodeStatus,
    pub output: Option<String>,
    pub guard: Option<GuardReport>,
    pub annotations: Vec<String>,
}

impl NodeResult {
    pub fn pending(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: NodeStatus::Pending,
            output: None,
            guard: None,
            annotations: Vec::new(),
        }
    }
}

/// The outcome of one pattern run
#[derive(Debug, Clone)]
pub struct PatternRunResult {
    pub run_id: String,
    /// Declared participant order
    pub nodes: Vec<NodeResult>,
    /// Concatenated or aggregated final output
    pub final_output: Option<String>,
    /// Pending human checkpoint, when the pattern paused on one
    pub checkpoint_id: Option<String>,
    /// Fitness keys of the participants, for the phase-close update
    pub team_keys: Vec<missionstore::TeamKey>,
    pub model_keys: Vec<missionstore::ModelKey>,
}

impl PatternRunResult {
    /// Concatenate completed outputs in declared order
    pub fn concat_outputs(&self) -> String {
        self.nodes
            .iter()
            .filter_map(|n| n.output.as_deref())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn has_veto(&self) -> bool {
        self.nodes.iter().any(|n| n.status == NodeStatus::Vetoed)
    }
}

/// How a gate resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Pass,
    Fail,
    /// Phase stays open until a human approval event arrives
    AwaitingApproval,
}

/// Evaluate a phase gate over the collected node results
pub fn evaluate_gate(gate: GatePredicate, result: &PatternRunResult, adversarial_ids: &HashSet<String>) -> GateOutcome {
    match gate {
        GatePredicate::AllApproved => {
            let non_adversarial_ok = result
                .nodes
                .iter()
                .filter(|n| !adversarial_ids.contains(&n.agent_id))
                .all(|n| n.status == NodeStatus::Completed);
            let adversarial_ok = result
                .nodes
                .iter()
                .filter(|n| adversarial_ids.contains(&n.agent_id))
                .all(|n| n.status != NodeStatus::Vetoed);
            if non_adversarial_ok && adversarial_ok {
                GateOutcome::Pass
            } else {
                GateOutcome::Fail
            }
        }
        GatePredicate::NoVeto => {
            if result.has_veto() {
                GateOutcome::Fail
            } else {
                GateOutcome::Pass
            }
        }
        GatePredicate::Always => GateOutcome::Pass,
        GatePredicate::Checkpoint => GateOutcome::AwaitingApproval,
    }
}
