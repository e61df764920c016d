//! Sprint retrospectives
//!
//! A completed dev sprint gets an LLM-written retrospective, persisted as a
//! project-layer memory entry so later sprints of the same phase (and every
//! later mission against the project) see it through context injection.

use handlebars::Handlebars;
use tracing::{info, warn};

use crate::domain::PhaseSpec;
use crate::events::CoreEvent;
use crate::llm::{CallContext, CompletionRequest, Message};
use crate::pattern::PatternRunResult;

use super::core::Orchestrator;

const RETRO_TEMPLATE: &str = "\
Write a three-sentence sprint retrospective for the phase '{{phase}}'. \
Name what worked, what dragged, and one concrete adjustment for the next \
sprint. Base it only on the outputs below.\n\n{{outputs}}";

impl Orchestrator {
    /// Close a completed sprint with an LLM-generated retrospective
    ///
    /// The retro is best-effort: a broken LLM call still closes the sprint,
    /// with a fallback note instead of silence.
    pub(super) async fn close_sprint_with_retro(
        &self,
        mission_id: &str,
        project: &crate::domain::Project,
        phase: &PhaseSpec,
        sprint_row_id: &str,
        result: &PatternRunResult,
    ) {
        let outputs: Vec<String> = result
            .nodes
            .iter()
            .filter_map(|n| n.output.as_ref().map(|o| format!("[{}] {}", n.agent_id, o)))
            .collect();

        let retro = self
            .generate_retro(mission_id, &phase.name, &outputs.join("\n\n"))
            .await
            .unwrap_or_else(|| format!("Sprint for phase '{}' completed; retrospective unavailable.", phase.name));

        let velocity = result
            .nodes
            .iter()
            .filter(|n| n.status == crate::pattern::NodeStatus::Completed)
            .count() as i64;

        if let Err(e) = self
            .state
            .close_sprint(sprint_row_id, "completed", Some(velocity), Some(retro.clone()))
            .await
        {
            warn!(error = %e, "Failed to close sprint row");
        }

        if let Err(e) = self
            .memory
            .put_system(
                missionstore::MemoryLayer::Project,
                &project.id,
                "retro",
                &retro,
                serde_json::json!({ "mission_id": mission_id, "phase": phase.name, "sprint": sprint_row_id }),
            )
            .await
        {
            warn!(error = %e, "Failed to persist retro memory entry");
        }

        self.events
            .emit(CoreEvent::MissionSprintClosedWithRetro {
                mission_id: mission_id.to_string(),
                sprint_id: sprint_row_id.to_string(),
                retro_summary: retro.chars().take(200).collect(),
            })
            .await;
        info!(mission_id, sprint_id = %sprint_row_id, "Sprint closed with retrospective");
    }

    async fn generate_retro(&self, mission_id: &str, phase_name: &str, outputs: &str) -> Option<String> {
        let handlebars = Handlebars::new();
        let prompt = handlebars
            .render_template(RETRO_TEMPLATE, &serde_json::json!({ "phase": phase_name, "outputs": outputs }))
            .ok()?;

        let request = CompletionRequest {
            system_prompt: "You write terse, honest sprint retrospectives.".to_string(),
            messages: vec![Message::user(prompt)],
            tools: vec![],
            max_tokens: 400,
        };
        let context = CallContext {
            agent_id: "retro-writer".to_string(),
            mission_id: Some(mission_id.to_string()),
            phase: phase_name.to_string(),
        };

        match self.gateway.call(&context, "light-production", None, &request).await {
            Ok(response) => response.response.content,
            Err(e) => {
                warn!(error = %e, "Retro generation failed");
                None
            }
        }
    }
}
