//! Chain topologies: solo, sequential, adversarial-cascade

use tracing::{debug, info};

use crate::domain::VetoLevel;

use super::runner::{PatternEngine, RunCtx, predecessors_message};
use super::NodeStatus;

impl PatternEngine {
    /// One agent, terminates on its first final message
    pub(super) async fn drive_solo(&self, ctx: &RunCtx<'_>) -> eyre::Result<Option<String>> {
        if ctx.participants.is_empty() {
            return Ok(None);
        }
        let node = self.run_node(ctx, 0, ctx.task).await;
        Ok(node.output)
    }

    /// Agents run in declared order; each sees its predecessors' outputs;
    /// a veto halts the chain
    pub(super) async fn drive_sequential(&self, ctx: &RunCtx<'_>) -> eyre::Result<Option<String>> {
        let mut outputs: Vec<(String, String)> = Vec::new();

        for index in 0..ctx.participants.len() {
            let task = predecessors_message(ctx.task, &outputs);
            let node = self.run_node(ctx, index, &task).await;

            match node.status {
                NodeStatus::Vetoed => {
                    info!(agent = %node.agent_id, "Veto halts the sequential chain");
                    break;
                }
                NodeStatus::Completed => {
                    if let Some(output) = &node.output {
                        outputs.push((node.agent_id.clone(), output.clone()));
                    }
                }
                _ => {
                    debug!(agent = %node.agent_id, status = ?node.status, "Node did not complete, chain continues");
                }
            }
        }

        Ok(None)
    }

    /// Sequential chain of specialist critics, each able to veto
    ///
    /// Only an absolute veto short-circuits the cascade; weaker vetoes are
    /// recorded and the remaining critics still get their look. Consecutive
    /// critics should ride distinct providers when available; this is
    /// best-effort and never blocks.
    pub(super) async fn drive_cascade(&self, ctx: &RunCtx<'_>) -> eyre::Result<Option<String>> {
        let mut previous_provider: Option<String> = None;

        for index in 0..ctx.participants.len() {
            let participant = &ctx.participants[index];
            if let (Some(previous), Some(binding)) = (&previous_provider, &participant.binding)
                && previous == &binding.provider
            {
                debug!(
                    agent = %participant.agent.id,
                    provider = %binding.provider,
                    "Consecutive critics share a provider; diversity preference unmet"
                );
            }
            previous_provider = participant.binding.as_ref().map(|b| b.provider.clone());

            let task = format!(
                "You are a specialist critic in a review cascade. Review the work below.\n\
                 Answer APPROVE or VETO: <reason> as your first line, then your findings.\n\n{}",
                ctx.task
            );
            let node = self.run_node(ctx, index, &task).await;

            if node.status == NodeStatus::Vetoed
                && participant.agent.permissions.veto_level == VetoLevel::Absolute
            {
                info!(agent = %participant.agent.id, "Absolute veto short-circuits the cascade");
                break;
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
pub(super) use test_support::*;

#[cfg(test)]
mod test_support {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::agent::{AgentExecutor, PhaseContext};
    use crate::bus::MessageBus;
    use crate::config::{Config, ExecutorConfig, LlmConfig, ProviderConfig};
    use crate::events::EventStream;
    use crate::guard::{DeterministicGuard, SemanticReviewer};
    use crate::llm::{LlmClient, LlmGateway, MockLlmClient};
    use crate::memory::MemoryManager;
    use crate::pattern::PatternEngine;
    use crate::state::StateManager;
    use crate::tools::ToolRunner;

    /// Everything a pattern test needs, over a scripted mock LLM
    pub struct EngineFixture {
        pub engine: PatternEngine,
        pub state: StateManager,
        pub mock: Arc<MockLlmClient>,
        pub worktree: tempfile::TempDir,
    }

    impl EngineFixture {
        pub fn phase(&self) -> PhaseContext {
            PhaseContext {
                mission_id: "m-1".into(),
                project_id: "proj-1".into(),
                phase_name: "implement".into(),
                phase_type: "dev".into(),
                technology: "generic".into(),
                sprint: 1,
                worktree: self.worktree.path().to_path_buf(),
                session_id: "sess-1".into(),
                pattern_run_id: String::new(),
                deploy_approved: false,
            }
        }
    }

    pub fn engine_fixture(responses: Vec<crate::llm::CompletionResponse>) -> EngineFixture {
        let config = Config::default();
        let state = StateManager::spawn_in_memory().unwrap();
        let events = Arc::new(EventStream::new(state.clone()));
        let memory = MemoryManager::new(state.clone(), events.clone());

        let mock = Arc::new(MockLlmClient::named("mock", responses));
        let provider = ProviderConfig {
            name: "mock".into(),
            protocol: "mock".into(),
            models: HashMap::from([
                ("heavy-reasoning".to_string(), "mock-model".to_string()),
                ("light-reasoning".to_string(), "mock-model".to_string()),
            ]),
            ..Default::default()
        };
        let client: Arc<dyn LlmClient> = mock.clone();
        let gateway = Arc::new(LlmGateway::with_clients(LlmConfig::default(), vec![(provider, client)]));

        let runner = Arc::new(
            ToolRunner::standard(Duration::from_secs(10), Duration::from_secs(10)).with_state(state.clone()),
        );
        let bus = MessageBus::new(100);
        let bus_handle = bus.handle();
        tokio::spawn(bus.run());

        let executor = Arc::new(AgentExecutor::new(
            gateway.clone(),
            runner,
            memory.clone(),
            bus_handle,
            events.clone(),
            state.clone(),
            ExecutorConfig::default(),
        ));

        // L1 off by default in fixtures; individual tests opt in
        let guard_config = crate::config::GuardConfig {
            l1_enabled: false,
            ..Default::default()
        };
        let engine = PatternEngine::new(
            executor,
            memory,
            events,
            DeterministicGuard::new(&config.guard),
            SemanticReviewer::new(gateway, &guard_config),
            config.pattern.clone(),
            state.clone(),
        );

        EngineFixture {
            engine,
            state,
            mock,
            worktree: tempfile::tempdir().unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::engine_fixture;
    use crate::domain::{AgentDefinition, PatternDefinition, PatternType, Role, VetoLevel};
    use crate::llm::MockLlmClient;
    use crate::pattern::{NodeStatus, ResolvedParticipant};
    use tokio_util::sync::CancellationToken;

    fn participants(agents: Vec<AgentDefinition>) -> Vec<ResolvedParticipant> {
        agents.into_iter().map(ResolvedParticipant::new).collect()
    }

    fn definition(pattern_type: PatternType, count: usize) -> PatternDefinition {
        let slots = (0..count).map(|i| PatternDefinition::agent(format!("agent-{}", i))).collect();
        PatternDefinition::new("test-pattern", pattern_type, slots)
    }

    #[tokio::test]
    async fn test_sequential_two_agents_complete() {
        let fx = engine_fixture(vec![
            MockLlmClient::text_response("first agent implemented the parser changes as requested"),
            MockLlmClient::text_response("second agent reviewed and extended the parser test coverage"),
        ]);
        let agents = vec![
            AgentDefinition::new("dev-a", "A", Role::Developer),
            AgentDefinition::new("dev-b", "B", Role::Developer),
        ];

        let result = fx
            .engine
            .run(
                &definition(PatternType::Sequential, 2),
                participants(agents),
                "Implement the parser feature",
                &fx.phase(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.nodes[0].status, NodeStatus::Completed);
        assert_eq!(result.nodes[1].status, NodeStatus::Completed);
        let output = result.final_output.unwrap();
        // Declared order: first agent's output precedes the second's
        let first = output.find("first agent").unwrap();
        let second = output.find("second agent").unwrap();
        assert!(first < second);

        // The second agent saw the first agent's output
        let requests = fx.mock.requests.lock().unwrap();
        let last = requests.last().unwrap();
        let text = serde_json::to_string(&last.messages).unwrap();
        assert!(text.contains("first agent implemented"));
        fx.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_sequential_veto_halts_chain() {
        let fx = engine_fixture(vec![
            MockLlmClient::text_response("VETO: the migration drops a column that is still read"),
            MockLlmClient::text_response("never reached"),
        ]);
        let agents = vec![
            AgentDefinition::new("qa-a", "A", Role::Qa).with_veto(VetoLevel::Strong),
            AgentDefinition::new("dev-b", "B", Role::Developer),
        ];

        let result = fx
            .engine
            .run(
                &definition(PatternType::Sequential, 2),
                participants(agents),
                "Apply the schema migration",
                &fx.phase(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.nodes[0].status, NodeStatus::Vetoed);
        assert_eq!(result.nodes[1].status, NodeStatus::Pending);
        assert!(result.has_veto());
        fx.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cascade_absolute_veto_short_circuits() {
        let fx = engine_fixture(vec![
            MockLlmClient::text_response("APPROVE - the code structure holds up under review"),
            MockLlmClient::text_response("VETO: credentials are checked into the config file"),
            MockLlmClient::text_response("never reached"),
        ]);
        let agents = vec![
            AgentDefinition::new("code-critic", "Code", Role::Adversarial).with_veto(VetoLevel::Strong),
            AgentDefinition::new("sec-critic", "Sec", Role::Adversarial).with_veto(VetoLevel::Absolute),
            AgentDefinition::new("arch-critic", "Arch", Role::Adversarial).with_veto(VetoLevel::Strong),
        ];

        let result = fx
            .engine
            .run(
                &definition(PatternType::AdversarialCascade, 3),
                participants(agents),
                "Review the credentials handling change",
                &fx.phase(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.nodes[0].status, NodeStatus::Completed);
        assert_eq!(result.nodes[1].status, NodeStatus::Vetoed);
        // The third critic is never instantiated
        assert_eq!(result.nodes[2].status, NodeStatus::Pending);
        fx.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cascade_weak_veto_continues() {
        let fx = engine_fixture(vec![
            MockLlmClient::text_response("VETO: naming drifts from the project conventions in places"),
            MockLlmClient::text_response("APPROVE - no security concerns in this change set"),
        ]);
        let agents = vec![
            AgentDefinition::new("code-critic", "Code", Role::Adversarial).with_veto(VetoLevel::Advisory),
            AgentDefinition::new("sec-critic", "Sec", Role::Adversarial).with_veto(VetoLevel::Absolute),
        ];

        let result = fx
            .engine
            .run(
                &definition(PatternType::AdversarialCascade, 2),
                participants(agents),
                "Review the refactor",
                &fx.phase(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.nodes[0].status, NodeStatus::Vetoed);
        assert_eq!(result.nodes[1].status, NodeStatus::Completed);
        fx.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_solo_first_final_message_ends_run() {
        let fx = engine_fixture(vec![MockLlmClient::text_response(
            "the analysis is written up with the trade-offs on both sides",
        )]);
        let agents = vec![AgentDefinition::new("dev-solo", "Solo", Role::Developer)];

        let result = fx
            .engine
            .run(
                &definition(PatternType::Solo, 1),
                participants(agents),
                "Analyze the options",
                &fx.phase(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.nodes[0].status, NodeStatus::Completed);
        assert!(result.final_output.unwrap().contains("trade-offs"));
        fx.state.shutdown().await.unwrap();
    }
}
