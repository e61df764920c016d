//! Typed core events
//!
//! Every state change in the core emits exactly one of these. The dotted
//! kind strings are the wire vocabulary; the journal stores them verbatim so
//! replay and live subscription speak the same language.

use serde::{Deserialize, Serialize};

/// A core event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoreEvent {
    MissionCreated {
        mission_id: String,
        project_id: String,
        workflow_id: String,
    },
    MissionPhaseStarted {
        mission_id: String,
        phase_index: usize,
        phase_name: String,
        sprint: u32,
    },
    MissionPhaseGate {
        mission_id: String,
        phase_index: usize,
        outcome: String,
    },
    MissionSprintOpened {
        mission_id: String,
        sprint_id: String,
        phase_index: usize,
        number: u32,
    },
    MissionSprintClosedWithRetro {
        mission_id: String,
        sprint_id: String,
        retro_summary: String,
    },
    MissionPaused {
        mission_id: String,
        reason: String,
    },
    MissionDone {
        mission_id: String,
        status: String,
    },
    AgentMessage {
        mission_id: Option<String>,
        message_id: String,
        sender: String,
        message_kind: String,
        priority: u8,
    },
    AgentToolCalled {
        mission_id: Option<String>,
        agent_id: String,
        tool: String,
        success: bool,
        duration_ms: i64,
    },
    AdversarialVeto {
        mission_id: Option<String>,
        agent_id: String,
        stage: String,
        reason: String,
    },
    DarwinSelectedTeam {
        mission_id: String,
        role: String,
        agent_id: String,
        sampled_score: f64,
    },
    DarwinSelectedModel {
        mission_id: String,
        agent_id: String,
        provider: String,
        model: String,
    },
    CheckpointPending {
        mission_id: String,
        checkpoint_id: String,
        phase_index: usize,
    },
    MemoryDegraded {
        detail: String,
    },
}

impl CoreEvent {
    /// Dotted kind tag, stable across journal and live stream
    pub fn kind(&self) -> &'static str {
        match self {
            CoreEvent::MissionCreated { .. } => "mission.created",
            CoreEvent::MissionPhaseStarted { .. } => "mission.phase_started",
            CoreEvent::MissionPhaseGate { .. } => "mission.phase_gate",
            CoreEvent::MissionSprintOpened { .. } => "mission.sprint_opened",
            CoreEvent::MissionSprintClosedWithRetro { .. } => "mission.sprint_closed_with_retro",
            CoreEvent::MissionPaused { .. } => "mission.paused",
            CoreEvent::MissionDone { .. } => "mission.done",
            CoreEvent::AgentMessage { .. } => "agent.message",
            CoreEvent::AgentToolCalled { .. } => "agent.tool_called",
            CoreEvent::AdversarialVeto { .. } => "adversarial.veto",
            CoreEvent::DarwinSelectedTeam { .. } => "darwin.selected_team",
            CoreEvent::DarwinSelectedModel { .. } => "darwin.selected_model",
            CoreEvent::CheckpointPending { .. } => "checkpoint.pending",
            CoreEvent::MemoryDegraded { .. } => "memory.degraded",
        }
    }

    /// Mission attribution, where applicable
    pub fn mission_id(&self) -> Option<&str> {
        match self {
            CoreEvent::MissionCreated { mission_id, .. }
            | CoreEvent::MissionPhaseStarted { mission_id, .. }
            | CoreEvent::MissionPhaseGate { mission_id, .. }
            | CoreEvent::MissionSprintOpened { mission_id, .. }
            | CoreEvent::MissionSprintClosedWithRetro { mission_id, .. }
            | CoreEvent::MissionPaused { mission_id, .. }
            | CoreEvent::MissionDone { mission_id, .. }
            | CoreEvent::DarwinSelectedTeam { mission_id, .. }
            | CoreEvent::DarwinSelectedModel { mission_id, .. }
            | CoreEvent::CheckpointPending { mission_id, .. } => Some(mission_id),
            CoreEvent::AgentMessage { mission_id, .. }
            | CoreEvent::AgentToolCalled { mission_id, .. }
            | CoreEvent::AdversarialVeto { mission_id, .. } => mission_id.as_deref(),
            CoreEvent::MemoryDegraded { .. } => None,
        }
    }

    /// JSON payload for the journal
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        let event = CoreEvent::MissionPhaseGate {
            mission_id: "m-1".into(),
            phase_index: 0,
            outcome: "pass".into(),
        };
        assert_eq!(event.kind(), "mission.phase_gate");
        assert_eq!(event.mission_id(), Some("m-1"));
    }

    #[test]
    fn test_payload_round_trip() {
        let event = CoreEvent::AdversarialVeto {
            mission_id: Some("m-1".into()),
            agent_id: "sec-critic".into(),
            stage: "l0".into(),
            reason: "fabricated build output".into(),
        };
        let payload = event.payload();
        let back: CoreEvent = serde_json::from_value(payload).unwrap();
        assert_eq!(back.kind(), "adversarial.veto");
    }

    #[test]
    fn test_memory_degraded_has_no_mission() {
        let event = CoreEvent::MemoryDegraded {
            detail: "fts index unreadable".into(),
        };
        assert!(event.mission_id().is_none());
    }
}
