//! PatternEngine - dispatch, node execution, timeout and veto handling

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{AgentExecutor, AgentTurn, PhaseContext, TurnInput};
use crate::config::PatternConfig;
use crate::domain::{AgentDefinition, PatternDefinition, PatternType, VetoLevel, generate_id};
use crate::events::{CoreEvent, EventStream};
use crate::guard::{DeterministicGuard, SemanticReviewer, TurnView};
use crate::llm::{CallContext, ModelBinding};
use crate::memory::MemoryManager;
use crate::state::StateManager;

use super::{NodeResult, NodeStatus, PatternRunResult};

/// A participant slot resolved to a concrete agent and model
#[derive(Debug, Clone)]
pub struct ResolvedParticipant {
    pub agent: AgentDefinition,
    pub binding: Option<ModelBinding>,
    pub team_key: Option<missionstore::TeamKey>,
    pub model_key: Option<missionstore::ModelKey>,
}

impl ResolvedParticipant {
    pub fn new(agent: AgentDefinition) -> Self {
        Self {
            agent,
            binding: None,
            team_key: None,
            model_key: None,
        }
    }
}

pub(super) type SharedNodes = Arc<Mutex<Vec<NodeResult>>>;

/// The engine
pub struct PatternEngine {
    pub(super) executor: Arc<AgentExecutor>,
    pub(super) memory: MemoryManager,
    pub(super) events: Arc<EventStream>,
    pub(super) l0: DeterministicGuard,
    pub(super) l1: SemanticReviewer,
    pub(super) config: PatternConfig,
    pub(super) state: StateManager,
}

pub(super) struct RunCtx<'a> {
    pub definition: &'a PatternDefinition,
    pub participants: &'a [ResolvedParticipant],
    pub task: &'a str,
    pub phase: &'a PhaseContext,
    pub nodes: &'a SharedNodes,
}

impl PatternEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: Arc<AgentExecutor>,
        memory: MemoryManager,
        events: Arc<EventStream>,
        l0: DeterministicGuard,
        l1: SemanticReviewer,
        config: PatternConfig,
        state: StateManager,
    ) -> Self {
        Self {
            executor,
            memory,
            events,
            l0,
            l1,
            config,
            state,
        }
    }

    /// Run one pattern to termination: all nodes terminal, the timeout, or
    /// an absolute veto short-circuit
    pub async fn run(
        &self,
        definition: &PatternDefinition,
        participants: Vec<ResolvedParticipant>,
        task: &str,
        phase: &PhaseContext,
        cancel: CancellationToken,
    ) -> eyre::Result<PatternRunResult> {
        let run_id = generate_id("run", &definition.id);
        let mut phase = phase.clone();
        phase.pattern_run_id = run_id.clone();

        info!(
            run_id = %run_id,
            pattern = %definition.pattern_type,
            participants = participants.len(),
            "Pattern run starting"
        );

        let nodes: SharedNodes = Arc::new(Mutex::new(
            participants.iter().map(|p| NodeResult::pending(&p.agent.id)).collect(),
        ));

        let timeout = if definition.timeout_s > 0 {
            Duration::from_secs(definition.timeout_s)
        } else {
            Duration::from_secs(self.config.default_timeout_s)
        };

        let ctx = RunCtx {
            definition,
            participants: &participants,
            task,
            phase: &phase,
            nodes: &nodes,
        };

        let mut checkpoint_id = None;
        let mut final_output = None;

        tokio::select! {
            outcome = self.dispatch(&ctx) => {
                let (output, checkpoint) = outcome?;
                final_output = output;
                checkpoint_id = checkpoint;
            }
            _ = tokio::time::sleep(timeout) => {
                warn!(run_id = %run_id, ?timeout, "Pattern run timed out");
                fail_unfinished(&nodes, "pattern timeout").await;
            }
            _ = cancel.cancelled() => {
                info!(run_id = %run_id, "Pattern run cancelled");
                fail_unfinished(&nodes, "cancelled").await;
            }
        }

        // Pattern-layer memory expires with the run
        if let Err(e) = self.memory.expire_scope(missionstore::MemoryLayer::Pattern, &run_id).await {
            warn!(error = %e, "Failed to expire pattern memory scope");
        }

        let nodes = nodes.lock().await.clone();
        let team_keys = participants.iter().filter_map(|p| p.team_key.clone()).collect();
        let model_keys = participants.iter().filter_map(|p| p.model_key.clone()).collect();

        let result = PatternRunResult {
            run_id,
            nodes,
            final_output,
            checkpoint_id,
            team_keys,
            model_keys,
        };

        // Declared-order concatenation when the driver produced no aggregate
        let result = PatternRunResult {
            final_output: result.final_output.clone().or_else(|| {
                let concatenated = result.concat_outputs();
                if concatenated.is_empty() { None } else { Some(concatenated) }
            }),
            ..result
        };

        Ok(result)
    }

    /// Route to the per-type driver; returns (aggregate output, checkpoint)
    async fn dispatch(&self, ctx: &RunCtx<'_>) -> eyre::Result<(Option<String>, Option<String>)> {
        match ctx.definition.pattern_type {
            PatternType::Solo => self.drive_solo(ctx).await.map(|o| (o, None)),
            PatternType::Sequential => self.drive_sequential(ctx).await.map(|o| (o, None)),
            PatternType::AdversarialCascade => self.drive_cascade(ctx).await.map(|o| (o, None)),
            PatternType::Parallel | PatternType::Wave => self.drive_parallel(ctx).await.map(|o| (o, None)),
            PatternType::Aggregator => self.drive_aggregator(ctx).await.map(|o| (o, None)),
            PatternType::Loop => self.drive_loop(ctx).await.map(|o| (o, None)),
            PatternType::Debate | PatternType::AdversarialPair => self.drive_debate(ctx).await.map(|o| (o, None)),
            PatternType::Network => self.drive_network(ctx).await.map(|o| (o, None)),
            PatternType::Router => self.drive_router(ctx).await.map(|o| (o, None)),
            PatternType::Hierarchical => self.drive_hierarchical(ctx).await.map(|o| (o, None)),
            PatternType::HumanInTheLoop => self.drive_checkpoint(ctx).await,
        }
    }

    /// Run one participant's turn and grade it through the guard cascade
    pub(super) async fn run_node(&self, ctx: &RunCtx<'_>, index: usize, task: &str) -> NodeResult {
        let participant = &ctx.participants[index];
        let agent = &participant.agent;
        set_status(ctx.nodes, index, NodeStatus::Running).await;

        let turn = match self
            .executor
            .run_turn(TurnInput {
                agent: agent.clone(),
                task: task.to_string(),
                conversation: Vec::new(),
                binding: participant.binding.clone(),
                phase: ctx.phase.clone(),
            })
            .await
        {
            Ok(turn) => turn,
            Err(e) => {
                warn!(agent = %agent.id, error = %e, "Turn failed");
                let mut node = NodeResult::pending(&agent.id);
                node.status = NodeStatus::Failed;
                node.annotations.push(e.to_string());
                set_node(ctx.nodes, index, node.clone()).await;
                return node;
            }
        };

        let node = self.grade_turn(ctx, agent, task, turn).await;
        set_node(ctx.nodes, index, node.clone()).await;
        node
    }

    async fn grade_turn(&self, ctx: &RunCtx<'_>, agent: &AgentDefinition, task: &str, turn: AgentTurn) -> NodeResult {
        let mut node = NodeResult::pending(&agent.id);

        if let Some(reason) = &turn.escalated {
            node.status = NodeStatus::Failed;
            node.annotations.push(format!("escalated: {}", reason));
            return node;
        }

        let output = turn.output.clone().unwrap_or_default();
        self.events
            .emit(CoreEvent::AgentMessage {
                mission_id: Some(ctx.phase.mission_id.clone()),
                message_id: uuid::Uuid::now_v7().to_string(),
                sender: agent.id.clone(),
                message_kind: "response".to_string(),
                priority: 4,
            })
            .await;

        if turn.round_cap_reached {
            node.annotations.push("round_cap_reached".to_string());
        }

        // An explicit veto from an empowered agent
        if let Some(reason) = parse_veto(&output) {
            if agent.permissions.veto_level > VetoLevel::None {
                self.emit_veto(ctx, &agent.id, "agent", &reason).await;
                node.status = NodeStatus::Vetoed;
                node.output = Some(output);
                node.annotations.push(format!("veto: {}", reason));
                return node;
            }
            node.annotations.push("veto claimed without veto permission".to_string());
        }

        // L0: deterministic catalogue
        let view = TurnView {
            output: output.clone(),
            prompt: task.to_string(),
            tools_used: turn.tools_used.clone(),
            round_cap_reached: turn.round_cap_reached,
            technology: ctx.phase.technology.clone(),
            worktree: Some(ctx.phase.worktree.clone()),
        };
        let report = self.l0.evaluate(&view);
        let rejected_l0 = report.rejected();
        if report.decision == crate::guard::GuardDecision::SoftPass {
            node.annotations.push("guard warning".to_string());
        }
        node.guard = Some(report);

        if rejected_l0 {
            self.emit_veto(ctx, &agent.id, "l0", "deterministic catalogue rejection").await;
            node.status = NodeStatus::Vetoed;
            node.output = Some(output);
            return node;
        }

        // L1: one semantic review for execution-flavored patterns
        let call_context = CallContext {
            agent_id: agent.id.clone(),
            mission_id: Some(ctx.phase.mission_id.clone()),
            phase: ctx.phase.phase_name.clone(),
        };
        if let Some(verdict) = self
            .l1
            .review(ctx.definition.pattern_type, task, &output, &call_context)
            .await
            && let crate::guard::SemanticVerdict::Reject { reason } = verdict
        {
            self.emit_veto(ctx, &agent.id, "l1", &reason).await;
            node.status = NodeStatus::Vetoed;
            node.output = Some(output);
            node.annotations.push(format!("semantic rejection: {}", reason));
            return node;
        }

        node.status = NodeStatus::Completed;
        node.output = Some(output);
        node
    }

    pub(super) async fn emit_veto(&self, ctx: &RunCtx<'_>, agent_id: &str, stage: &str, reason: &str) {
        self.events
            .emit(CoreEvent::AdversarialVeto {
                mission_id: Some(ctx.phase.mission_id.clone()),
                agent_id: agent_id.to_string(),
                stage: stage.to_string(),
                reason: reason.to_string(),
            })
            .await;
    }

    pub(super) fn wip_limit(&self, definition: &PatternDefinition) -> usize {
        if definition.wip_limit > 0 {
            definition.wip_limit
        } else {
            self.config.default_wip_limit.max(1)
        }
    }
}

/// Parse an explicit veto marker at the head of an output
pub(super) fn parse_veto(output: &str) -> Option<String> {
    let trimmed = output.trim_start();
    let head = trimmed.get(..4)?;
    if !head.eq_ignore_ascii_case("VETO") {
        return None;
    }
    let rest = &trimmed[4..];
    // "vetoed" or similar is not a marker
    if rest.chars().next().map(|c| c.is_alphanumeric()).unwrap_or(false) {
        return None;
    }
    let reason = rest.trim_start_matches([':', ' ', '-']).trim();
    Some(if reason.is_empty() {
        "no reason given".to_string()
    } else {
        reason.lines().next().unwrap_or(reason).to_string()
    })
}

pub(super) async fn set_status(nodes: &SharedNodes, index: usize, status: NodeStatus) {
    let mut nodes = nodes.lock().await;
    if let Some(node) = nodes.get_mut(index) {
        node.status = status;
    }
}

pub(super) async fn set_node(nodes: &SharedNodes, index: usize, node: NodeResult) {
    let mut nodes = nodes.lock().await;
    if let Some(slot) = nodes.get_mut(index) {
        *slot = node;
    }
}

/// Mark every non-terminal node failed with an annotation
async fn fail_unfinished(nodes: &SharedNodes, reason: &str) {
    let mut nodes = nodes.lock().await;
    for node in nodes.iter_mut() {
        if !node.status.is_terminal() && node.status != NodeStatus::Pending {
            node.status = NodeStatus::Failed;
            node.annotations.push(reason.to_string());
        }
    }
}

/// Conversation slice handed to later participants: predecessor outputs
pub(super) fn predecessors_message(task: &str, outputs: &[(String, String)]) -> String {
    if outputs.is_empty() {
        return task.to_string();
    }
    let mut text = format!("{}\n\nWork so far:\n", task);
    for (agent_id, output) in outputs {
        text.push_str(&format!("\n--- {} ---\n{}\n", agent_id, output));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_veto_forms() {
        assert_eq!(parse_veto("VETO: hardcoded secrets"), Some("hardcoded secrets".to_string()));
        assert_eq!(parse_veto("  veto - unsafe migration"), Some("unsafe migration".to_string()));
        assert_eq!(parse_veto("VETO"), Some("no reason given".to_string()));
        assert_eq!(parse_veto("Approved, ship it"), None);
        assert_eq!(parse_veto("The veto power is unused here"), None);
    }

    #[test]
    fn test_predecessors_message() {
        let text = predecessors_message(
            "Review the change",
            &[("dev-a".to_string(), "implemented X".to_string())],
        );
        assert!(text.starts_with("Review the change"));
        assert!(text.contains("--- dev-a ---"));
    }

    #[tokio::test]
    async fn test_fail_unfinished_only_touches_running() {
        let nodes: SharedNodes = Arc::new(Mutex::new(vec![
            NodeResult::pending("a"),
            NodeResult {
                status: NodeStatus::Running,
                ..NodeResult::pending("b")
            },
            NodeResult {
                status: NodeStatus::Completed,
                ..NodeResult::pending("c")
            },
        ]));
        fail_unfinished(&nodes, "timeout").await;
        let nodes = nodes.lock().await;
        assert_eq!(nodes[0].status, NodeStatus::Pending);
        assert_eq!(nodes[1].status, NodeStatus::Failed);
        assert_eq!(nodes[2].status, NodeStatus::Completed);
    }
}
