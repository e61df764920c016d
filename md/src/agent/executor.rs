//! AgentExecutor - one agent turn inside a pattern
//!
//! A turn is a bounded iteration over (LLM call, tool dispatch): never
//! recursive, hard-capped at the configured round count. Policy refusals
//! from the tool runner halt the loop, emit an escalate message, and yield
//! no final output.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::BusHandle;
use crate::config::ExecutorConfig;
use crate::domain::{AgentDefinition, BusMessage, MessageKind, Recipients};
use crate::events::{CoreEvent, EventStream};
use crate::llm::{
    CallContext, CompletionRequest, CompletionResponse, ContentBlock, LlmGateway, Message, ModelBinding, StopReason,
    TokenUsage,
};
use crate::memory::{ContextBudget, MemoryManager, MemoryScopes};
use crate::state::StateManager;
use crate::tools::{ToolContext, ToolRunner};

/// Where in the mission a turn executes
#[derive(Debug, Clone, Default)]
pub struct PhaseContext {
    pub mission_id: String,
    pub project_id: String,
    pub phase_name: String,
    pub phase_type: String,
    pub technology: String,
    pub sprint: u32,
    pub worktree: std::path::PathBuf,
    pub session_id: String,
    pub pattern_run_id: String,
    pub deploy_approved: bool,
}

impl PhaseContext {
    pub fn memory_scopes(&self) -> MemoryScopes {
        MemoryScopes {
            session_id: Some(self.session_id.clone()),
            pattern_run_id: Some(self.pattern_run_id.clone()),
            project_id: Some(self.project_id.clone()),
        }
    }
}

/// Input for one turn
pub struct TurnInput {
    pub agent: AgentDefinition,
    /// The task message opening this turn
    pub task: String,
    /// Prior conversation slice (already windowed by the pattern)
    pub conversation: Vec<Message>,
    /// Model binding chosen by the selector, if any
    pub binding: Option<ModelBinding>,
    pub phase: PhaseContext,
}

/// Output of one turn
#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub agent_id: String,
    /// Final content; None when the turn escalated
    pub output: Option<String>,
    /// Tool rounds actually executed
    pub rounds: u32,
    pub round_cap_reached: bool,
    /// Policy reason when the turn halted on an escalation
    pub escalated: Option<String>,
    /// Tools executed this turn, in order
    pub tools_used: Vec<String>,
    pub usage: TokenUsage,
    /// Provider/model that served the final call
    pub served_by: Option<ModelBinding>,
}

/// Runs agent turns
pub struct AgentExecutor {
    gateway: Arc<LlmGateway>,
    runner: Arc<ToolRunner>,
    memory: MemoryManager,
    bus: BusHandle,
    events: Arc<EventStream>,
    state: StateManager,
    config: ExecutorConfig,
}

impl AgentExecutor {
    pub fn new(
        gateway: Arc<LlmGateway>,
        runner: Arc<ToolRunner>,
        memory: MemoryManager,
        bus: BusHandle,
        events: Arc<EventStream>,
        state: StateManager,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            gateway,
            runner,
            memory,
            bus,
            events,
            state,
            config,
        }
    }

    /// Run one turn to completion, the round cap, or an escalation
    pub async fn run_turn(&self, input: TurnInput) -> eyre::Result<AgentTurn> {
        let agent = &input.agent;
        let phase = &input.phase;

        let fragment = self
            .memory
            .inject_context(&phase.project_id, &phase.phase_name, phase.sprint, ContextBudget::default())
            .await
            .unwrap_or_default();

        let system_prompt = build_system_prompt(agent, phase, &fragment);
        let tool_defs = self.runner.definitions_for(&agent.tools);

        let mut messages: Vec<Message> = input
            .conversation
            .iter()
            .rev()
            .take(self.config.history_window)
            .rev()
            .cloned()
            .collect();
        messages.push(Message::user(input.task.clone()));

        let call_context = CallContext {
            agent_id: agent.id.clone(),
            mission_id: Some(phase.mission_id.clone()),
            phase: phase.phase_name.clone(),
        };
        let category = agent.llm_category.tag();

        let tool_ctx = ToolContext::new(phase.worktree.clone(), agent.id.clone())
            .with_mission(phase.mission_id.clone())
            .with_technology(phase.technology.clone())
            .with_deploy_approval(phase.deploy_approved)
            .with_memory(self.memory.clone(), phase.memory_scopes())
            .with_viewer(agent.clone());

        let mut rounds: u32 = 0;
        let mut tools_used = Vec::new();
        let mut usage = TokenUsage::default();
        let mut served_by = None;
        let mut last_content: Option<String> = None;

        loop {
            let request = CompletionRequest {
                system_prompt: system_prompt.clone(),
                messages: messages.clone(),
                tools: tool_defs.clone(),
                max_tokens: 16384,
            };

            let gateway_response = self
                .gateway
                .call(&call_context, &category, input.binding.clone(), &request)
                .await
                .map_err(|e| eyre::eyre!("LLM call failed for {}: {}", agent.id, e))?;

            self.record_trace(&call_context, &gateway_response).await;
            usage.input_tokens += gateway_response.response.usage.input_tokens;
            usage.output_tokens += gateway_response.response.usage.output_tokens;
            served_by = Some(ModelBinding {
                provider: gateway_response.provider.clone(),
                model: gateway_response.model.clone(),
            });

            let response = gateway_response.response;
            if let Some(content) = &response.content {
                last_content = Some(content.clone());
            }

            if response.tool_calls.is_empty() || response.stop_reason != StopReason::ToolUse {
                debug!(agent = %agent.id, rounds, "Turn finished with final message");
                return Ok(AgentTurn {
                    agent_id: agent.id.clone(),
                    output: last_content,
                    rounds,
                    round_cap_reached: false,
                    escalated: None,
                    tools_used,
                    usage,
                    served_by,
                });
            }

            if rounds >= self.config.max_rounds {
                warn!(agent = %agent.id, rounds, "Round cap reached");
                return Ok(AgentTurn {
                    agent_id: agent.id.clone(),
                    output: last_content,
                    rounds,
                    round_cap_reached: true,
                    escalated: None,
                    tools_used,
                    usage,
                    served_by,
                });
            }

            // The tool result message must directly follow the tool_calls it
            // answers; assemble the pair before anything else is appended.
            messages.push(build_assistant_message(&response));

            let mut result_blocks = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let started = std::time::Instant::now();
                match self.runner.invoke(agent, call, &tool_ctx).await {
                    Ok(result) => {
                        self.events
                            .emit(CoreEvent::AgentToolCalled {
                                mission_id: Some(phase.mission_id.clone()),
                                agent_id: agent.id.clone(),
                                tool: call.name.clone(),
                                success: !result.is_error,
                                duration_ms: started.elapsed().as_millis() as i64,
                            })
                            .await;
                        tools_used.push(call.name.clone());
                        result_blocks.push(ContentBlock::tool_result(&call.id, &result.content, result.is_error));
                    }
                    Err(e) if e.is_policy() => {
                        info!(agent = %agent.id, tool = %call.name, error = %e, "Policy refusal, escalating");
                        self.escalate(agent, phase, &e.to_string()).await;
                        return Ok(AgentTurn {
                            agent_id: agent.id.clone(),
                            output: None,
                            rounds,
                            round_cap_reached: false,
                            escalated: Some(e.to_string()),
                            tools_used,
                            usage,
                            served_by,
                        });
                    }
                    Err(e) => {
                        // Registry/argument errors go back to the model as
                        // error results so it can correct itself.
                        result_blocks.push(ContentBlock::tool_result(&call.id, e.to_string(), true));
                    }
                }
            }
            messages.push(Message::user_blocks(result_blocks));
            rounds += 1;
        }
    }

    async fn escalate(&self, agent: &AgentDefinition, phase: &PhaseContext, reason: &str) {
        let message = BusMessage::new(
            agent.id.clone(),
            Recipients::One("orchestrator".to_string()),
            MessageKind::Escalate,
            serde_json::json!({
                "reason": reason,
                "mission_id": phase.mission_id,
                "phase": phase.phase_name,
            }),
        );
        if let Err(e) = self.bus.publish(message).await {
            warn!(error = %e, "Failed to publish escalate message");
        }
    }

    async fn record_trace(&self, context: &CallContext, response: &crate::llm::GatewayResponse) {
        let row = missionstore::LlmTraceRow {
            id: uuid::Uuid::now_v7().to_string(),
            mission_id: context.mission_id.clone(),
            agent_id: context.agent_id.clone(),
            phase: context.phase.clone(),
            provider: response.provider.clone(),
            model: response.model.clone(),
            input_tokens: response.response.usage.input_tokens as i64,
            output_tokens: response.response.usage.output_tokens as i64,
            latency_ms: response.latency_ms,
            cost_microusd: response.response.usage.cost_microusd(&response.model),
            prompt_hash: response.prompt_hash.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.state.record_llm_trace(row).await {
            warn!(error = %e, "Failed to record LLM trace");
        }
    }
}

fn build_system_prompt(agent: &AgentDefinition, phase: &PhaseContext, fragment: &str) -> String {
    let mut prompt = format!(
        "You are {} ({} role) working on phase '{}' (sprint {}) of a mission.\n\
         Technology: {}. Working directory: {}.\n\
         Use the available tools to do real work; never claim actions you did not take.",
        agent.name,
        agent.role,
        phase.phase_name,
        phase.sprint,
        phase.technology,
        phase.worktree.display(),
    );
    if !fragment.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(fragment);
    }
    prompt
}

fn build_assistant_message(response: &CompletionResponse) -> Message {
    let mut blocks = Vec::new();
    if let Some(text) = &response.content {
        blocks.push(ContentBlock::text(text));
    }
    for call in &response.tool_calls {
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        });
    }
    Message::assistant_blocks(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::config::{LlmConfig, ProviderConfig};
    use crate::domain::Role;
    use crate::llm::{LlmClient, MockLlmClient};
    use std::collections::HashMap;
    use std::time::Duration;

    struct Fixture {
        executor: AgentExecutor,
        mock: Arc<MockLlmClient>,
        state: StateManager,
        _bus_task: tokio::task::JoinHandle<()>,
        bus: BusHandle,
    }

    fn fixture(responses: Vec<crate::llm::CompletionResponse>, config: ExecutorConfig) -> Fixture {
        let state = StateManager::spawn_in_memory().unwrap();
        let events = Arc::new(EventStream::new(state.clone()));
        let memory = MemoryManager::new(state.clone(), events.clone());

        let mock = Arc::new(MockLlmClient::named("mock", responses));
        let provider = ProviderConfig {
            name: "mock".into(),
            protocol: "mock".into(),
            models: HashMap::from([("heavy-reasoning".to_string(), "mock-model".to_string())]),
            ..Default::default()
        };
        let client: Arc<dyn LlmClient> = mock.clone();
        let gateway = Arc::new(LlmGateway::with_clients(LlmConfig::default(), vec![(provider, client)]));

        let runner = Arc::new(
            ToolRunner::standard(Duration::from_secs(10), Duration::from_secs(10)).with_state(state.clone()),
        );

        let bus = MessageBus::new(100).with_state(state.clone());
        let handle = bus.handle();
        let bus_task = tokio::spawn(bus.run());

        let executor = AgentExecutor::new(
            gateway,
            runner,
            memory,
            handle.clone(),
            events,
            state.clone(),
            config,
        );
        Fixture {
            executor,
            mock,
            state,
            _bus_task: bus_task,
            bus: handle,
        }
    }

    fn input(agent: AgentDefinition, worktree: &std::path::Path) -> TurnInput {
        TurnInput {
            agent,
            task: "Do the work".into(),
            conversation: vec![],
            binding: None,
            phase: PhaseContext {
                mission_id: "m-1".into(),
                project_id: "proj-1".into(),
                phase_name: "implement".into(),
                phase_type: "dev".into(),
                technology: "generic".into(),
                sprint: 1,
                worktree: worktree.to_path_buf(),
                session_id: "sess-1".into(),
                pattern_run_id: "run-1".into(),
                deploy_approved: false,
            },
        }
    }

    #[tokio::test]
    async fn test_final_message_ends_turn() {
        let fx = fixture(vec![MockLlmClient::text_response("work complete")], ExecutorConfig::default());
        let temp = tempfile::tempdir().unwrap();
        let agent = AgentDefinition::new("dev-alice", "Alice", Role::Developer);

        let turn = fx.executor.run_turn(input(agent, temp.path())).await.unwrap();
        assert_eq!(turn.output.as_deref(), Some("work complete"));
        assert_eq!(turn.rounds, 0);
        assert!(!turn.round_cap_reached);
        fx.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_tool_round_then_final() {
        let fx = fixture(
            vec![
                MockLlmClient::tool_response("t1", "write_file", serde_json::json!({"path": "a.txt", "content": "hi"})),
                MockLlmClient::text_response("wrote the file"),
            ],
            ExecutorConfig::default(),
        );
        let temp = tempfile::tempdir().unwrap();
        let agent = AgentDefinition::new("dev-alice", "Alice", Role::Developer).with_tools(&["write_file"]);

        let turn = fx.executor.run_turn(input(agent, temp.path())).await.unwrap();
        assert_eq!(turn.rounds, 1);
        assert_eq!(turn.tools_used, vec!["write_file".to_string()]);
        assert_eq!(turn.output.as_deref(), Some("wrote the file"));
        assert!(temp.path().join("a.txt").exists());

        // Tool result message directly follows its tool_calls message
        let requests = fx.mock.requests.lock().unwrap();
        let second = &requests[1];
        let roles: Vec<_> = second.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![crate::llm::Role::User, crate::llm::Role::Assistant, crate::llm::Role::User]
        );
        fx.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_round_cap_annotated() {
        let config = ExecutorConfig {
            max_rounds: 2,
            ..Default::default()
        };
        // Always asks for another read; never finishes on its own
        let responses: Vec<_> = (0..4)
            .map(|i| {
                MockLlmClient::tool_response(
                    &format!("t{}", i),
                    "read_file",
                    serde_json::json!({"path": "a.txt"}),
                )
            })
            .collect();
        let fx = fixture(responses, config);
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.txt"), "data").unwrap();
        let agent = AgentDefinition::new("dev-alice", "Alice", Role::Developer).with_tools(&["read_file"]);

        let turn = fx.executor.run_turn(input(agent, temp.path())).await.unwrap();
        assert!(turn.round_cap_reached);
        assert_eq!(turn.rounds, 2);
        fx.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_policy_refusal_escalates() {
        let fx = fixture(
            vec![MockLlmClient::tool_response(
                "t1",
                "deploy",
                serde_json::json!({"target": "prod"}),
            )],
            ExecutorConfig::default(),
        );
        let temp = tempfile::tempdir().unwrap();
        let mut agent = AgentDefinition::new("devops-dan", "Dan", Role::Devops).with_tools(&["deploy"]);
        agent.permissions.may_deploy = true;

        fx.bus.register("orchestrator").await.unwrap();

        // No deploy approval on the mission: the turn must escalate
        let turn = fx.executor.run_turn(input(agent, temp.path())).await.unwrap();
        assert!(turn.output.is_none());
        assert!(turn.escalated.is_some());

        let escalation = fx
            .bus
            .recv("orchestrator", Duration::from_millis(500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(escalation.kind, MessageKind::Escalate);
        fx.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_traces_recorded_with_mission_attribution() {
        let fx = fixture(vec![MockLlmClient::text_response("done")], ExecutorConfig::default());
        let temp = tempfile::tempdir().unwrap();
        let agent = AgentDefinition::new("dev-alice", "Alice", Role::Developer);

        fx.executor.run_turn(input(agent, temp.path())).await.unwrap();

        let traces = fx.state.list_llm_traces("m-1").await.unwrap();
        assert_eq!(traces.len(), 1);
        assert!(traces[0].input_tokens >= 0);
        let (tokens_in, _, _) = fx.state.mission_cost("m-1").await.unwrap();
        assert!(tokens_in > 0);
        fx.state.shutdown().await.unwrap();
    }
}
