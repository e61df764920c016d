//! Pattern definitions: collaboration topologies over an agent set

use serde::{Deserialize, Serialize};

use super::Role;

/// The collaboration topology tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternType {
    Solo,
    Sequential,
    Parallel,
    Hierarchical,
    Network,
    Loop,
    Router,
    Aggregator,
    HumanInTheLoop,
    Debate,
    AdversarialPair,
    AdversarialCascade,
    Wave,
}

impl PatternType {
    /// Execution-flavored patterns get the semantic L1 review; discussion
    /// patterns skip it to save cost.
    pub fn is_execution_flavored(&self) -> bool {
        matches!(
            self,
            PatternType::Sequential
                | PatternType::Parallel
                | PatternType::Hierarchical
                | PatternType::Loop
                | PatternType::AdversarialPair
                | PatternType::AdversarialCascade
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Solo => "solo",
            PatternType::Sequential => "sequential",
            PatternType::Parallel => "parallel",
            PatternType::Hierarchical => "hierarchical",
            PatternType::Network => "network",
            PatternType::Loop => "loop",
            PatternType::Router => "router",
            PatternType::Aggregator => "aggregator",
            PatternType::HumanInTheLoop => "human-in-the-loop",
            PatternType::Debate => "debate",
            PatternType::AdversarialPair => "adversarial-pair",
            PatternType::AdversarialCascade => "adversarial-cascade",
            PatternType::Wave => "wave",
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A participant slot: a concrete agent, or a role resolved at phase start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParticipantRef {
    /// Concrete agent id
    Agent { agent: String },
    /// Role descriptor resolved by the selector
    Role {
        role: Role,
        #[serde(default)]
        technology: Option<String>,
    },
}

/// Semantic tag on a directed edge between participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Delegate,
    Inform,
    Review,
    Veto,
    Negotiate,
    Escalate,
    Aggregate,
}

/// A directed edge between two participant slots (by index)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub kind: EdgeKind,
}

/// How pattern-layer memory is shared inside the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPolicy {
    /// All non-adversarial participants share the pattern layer
    #[default]
    Shared,
    /// Nobody reads the pattern layer
    Isolated,
}

/// A declared pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    /// Ordered participant slots; order is also the output concatenation order
    pub participants: Vec<ParticipantRef>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Iteration bound for loop/debate style patterns
    #[serde(rename = "max-iterations", default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Convergence rule for loop patterns: "no_veto" or "all_completed"
    #[serde(default)]
    pub convergence: Option<String>,
    /// Concurrent agent cap for parallel patterns (0 = config default)
    #[serde(rename = "wip-limit", default)]
    pub wip_limit: usize,
    /// Run timeout in seconds (0 = config default)
    #[serde(rename = "timeout-s", default)]
    pub timeout_s: u64,
    #[serde(rename = "memory-policy", default)]
    pub memory_policy: MemoryPolicy,
}

fn default_max_iterations() -> u32 {
    3
}

impl PatternDefinition {
    pub fn new(id: impl Into<String>, pattern_type: PatternType, participants: Vec<ParticipantRef>) -> Self {
        Self {
            id: id.into(),
            pattern_type,
            participants,
            edges: Vec::new(),
            max_iterations: default_max_iterations(),
            convergence: None,
            wip_limit: 0,
            timeout_s: 0,
            memory_policy: MemoryPolicy::default(),
        }
    }

    /// Participants referencing a concrete agent id
    pub fn agent(id: impl Into<String>) -> ParticipantRef {
        ParticipantRef::Agent { agent: id.into() }
    }

    /// Participants resolved by role at phase start
    pub fn role(role: Role) -> ParticipantRef {
        ParticipantRef::Role { role, technology: None }
    }
}
