//! Agents: the definition registry and the turn executor

mod executor;
mod registry;

pub use executor::{AgentExecutor, AgentTurn, PhaseContext, TurnInput};
pub use registry::AgentRegistry;
