//! Mission API surface: errors and read projections
//!
//! Transport is a surrounding-code concern; the contract here is the
//! command vocabulary on [`super::Orchestrator`] plus these result shapes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::MissionStatus;
use crate::state::StateError;

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Mission {0} is already terminal")]
    AlreadyTerminal(String),

    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("State error: {0}")]
    State(#[from] StateError),
}

/// Full mission projection returned by get_mission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionView {
    pub id: String,
    pub project_id: String,
    pub workflow_id: String,
    pub status: MissionStatus,
    pub phase_index: usize,
    pub phase_name: Option<String>,
    pub sprint: u32,
    /// Per-phase issue notes accumulated so far
    pub issues: serde_json::Value,
    /// Pending checkpoint ids awaiting a human decision
    pub pending_checkpoints: Vec<String>,
    /// Token/cost attribution: (input tokens, output tokens, micro-USD)
    pub cost: (i64, i64, i64),
    /// Most recent journaled events, oldest first
    pub recent_events: Vec<serde_json::Value>,
}
