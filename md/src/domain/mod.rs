//! Domain model: agents, patterns, workflows, missions, messages
//!
//! Graph-ish structures (participants, edges) are flat collections keyed by
//! stable ids; nothing here owns anything cyclically. Runtime resolution is
//! registry lookup, not inheritance.

mod agent;
mod id;
mod message;
mod mission;
mod pattern;
mod project;
mod workflow;

pub use agent::{AgentDefinition, LlmCategory, ModelFlavor, ModelWeight, Permissions, Role, VetoLevel};
pub use id::{DomainId, generate_id};
pub use message::{BusMessage, MessageKind, Recipients, VETO_PRIORITY};
pub use mission::{MissionRun, MissionStatus, SprintStatus, Wsjf};
pub use pattern::{Edge, EdgeKind, MemoryPolicy, ParticipantRef, PatternDefinition, PatternType};
pub use project::Project;
pub use workflow::{FailurePolicy, GatePredicate, PhaseSpec, WorkflowTemplate};

// The memory layer vocabulary is shared with the store
pub use missionstore::MemoryLayer;
