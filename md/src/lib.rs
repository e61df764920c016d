//! missiond - multi-agent mission orchestration daemon
//!
//! missiond drives teams of LLM-backed agents through structured missions:
//! a workflow of phases, each phase running one collaboration pattern over
//! a selected agent team, gated by an adversarial guard, with evolutionary
//! selection of teams and models feeding on the gate outcomes.
//!
//! # Core pieces
//!
//! - [`orchestrator`] - admission, the phase loop, recovery, the mission API
//! - [`pattern`] - the collaboration topologies and gate evaluation
//! - [`agent`] - agent definitions and the bounded tool-calling executor
//! - [`guard`] - the deterministic + semantic veto cascade
//! - [`darwin`] - Thompson-sampled team and model selection
//! - [`memory`] - four-layer scoped memory with isolation rules
//! - [`bus`] - typed priority pub/sub between agents
//! - [`llm`] - the rate-limited multi-provider gateway
//! - [`state`] - the actor owning the transactional store
//!
//! State lives in the `missionstore` crate; everything here reaches it
//! through the [`state::StateManager`] handle.

pub mod agent;
pub mod bus;
pub mod cli;
pub mod config;
pub mod darwin;
pub mod domain;
pub mod events;
pub mod guard;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod pattern;
pub mod state;
pub mod tools;

// Re-export commonly used types
pub use agent::{AgentExecutor, AgentRegistry, AgentTurn, PhaseContext, TurnInput};
pub use bus::{BusError, BusHandle, LiveListener, MessageBus};
pub use config::Config;
pub use darwin::{DarwinSelector, PhaseOutcome, ShadowPlan, TeamChoice};
pub use domain::{
    AgentDefinition, BusMessage, FailurePolicy, GatePredicate, MessageKind, MissionRun, MissionStatus,
    ParticipantRef, PatternDefinition, PatternType, PhaseSpec, Project, Recipients, Role, VetoLevel,
    WorkflowTemplate, Wsjf,
};
pub use events::{CoreEvent, EventStream};
pub use guard::{DeterministicGuard, GuardDecision, SemanticReviewer, SemanticVerdict};
pub use llm::{AnthropicClient, CompletionRequest, CompletionResponse, LlmClient, LlmError, LlmGateway, MockLlmClient};
pub use memory::{MemoryManager, MemoryScopes};
pub use orchestrator::{Admission, MissionView, Orchestrator, OrchestratorError, RecoveryStats};
pub use pattern::{GateOutcome, NodeResult, NodeStatus, PatternEngine, PatternRunResult, ResolvedParticipant};
pub use state::{StateError, StateManager};
pub use tools::{Tool, ToolContext, ToolError, ToolResult, ToolRunner};
