//! End-to-end scenarios against a scripted mock LLM
//!
//! These exercise the whole stack: orchestrator, admission, selection,
//! pattern engine, guard, executor, gateway, store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use missiond::agent::AgentExecutor;
use missiond::bus::MessageBus;
use missiond::config::{Config, ProviderConfig};
use missiond::darwin::DarwinSelector;
use missiond::domain::{
    AgentDefinition, FailurePolicy, GatePredicate, MissionStatus, PatternDefinition, PatternType, PhaseSpec, Project,
    Role, VetoLevel, WorkflowTemplate, Wsjf,
};
use missiond::events::EventStream;
use missiond::guard::{DeterministicGuard, SemanticReviewer};
use missiond::llm::{CompletionResponse, LlmClient, LlmError, LlmGateway, MockLlmClient};
use missiond::memory::MemoryManager;
use missiond::orchestrator::Orchestrator;
use missiond::pattern::PatternEngine;
use missiond::state::StateManager;
use missiond::tools::ToolRunner;

struct Harness {
    orchestrator: Arc<Orchestrator>,
    state: StateManager,
    primary: Arc<MockLlmClient>,
    secondary: Arc<MockLlmClient>,
    _worktree: tempfile::TempDir,
}

fn mock_provider(name: &str) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        protocol: "mock".to_string(),
        categories: vec![],
        models: HashMap::from([
            ("heavy-reasoning".to_string(), format!("{}-model", name)),
            ("light-production".to_string(), format!("{}-model", name)),
            ("light-reasoning".to_string(), format!("{}-model", name)),
        ]),
        api_key_env: String::new(),
        base_url: String::new(),
        max_tokens: 8192,
    }
}

/// Build the full stack over two mock providers
fn harness(setup: impl FnOnce(&mut Orchestrator, &Project)) -> Harness {
    let mut config = Config::default();
    config.guard.l1_enabled = false;
    config.darwin.ab_random_p = 0.0;
    config.llm.rate_wait_max_s = 1;

    let state = StateManager::spawn_in_memory().unwrap();
    let events = Arc::new(EventStream::new(state.clone()));
    let memory = MemoryManager::new(state.clone(), events.clone());

    let primary = Arc::new(MockLlmClient::named("primary", vec![]));
    let secondary = Arc::new(MockLlmClient::named("secondary", vec![]));
    // The secondary declares no models of its own: it never wins selection,
    // it only serves as the fallback leg of the chain.
    let secondary_provider = ProviderConfig {
        name: "secondary".to_string(),
        protocol: "mock".to_string(),
        categories: vec![],
        models: HashMap::new(),
        api_key_env: String::new(),
        base_url: String::new(),
        max_tokens: 8192,
    };
    let clients: Vec<(ProviderConfig, Arc<dyn LlmClient>)> = vec![
        (mock_provider("primary"), primary.clone()),
        (secondary_provider, secondary.clone()),
    ];
    let gateway = Arc::new(LlmGateway::with_clients(config.llm.clone(), clients));

    let runner =
        Arc::new(ToolRunner::standard(Duration::from_secs(10), Duration::from_secs(10)).with_state(state.clone()));
    let bus = MessageBus::new(config.bus.inbox_capacity).with_state(state.clone());
    let bus_handle = bus.handle();
    tokio::spawn(bus.run());

    let executor = Arc::new(AgentExecutor::new(
        gateway.clone(),
        runner,
        memory.clone(),
        bus_handle,
        events.clone(),
        state.clone(),
        config.executor.clone(),
    ));
    let engine = PatternEngine::new(
        executor,
        memory.clone(),
        events.clone(),
        DeterministicGuard::new(&config.guard),
        SemanticReviewer::new(gateway.clone(), &config.guard),
        config.pattern.clone(),
        state.clone(),
    );
    let darwin = DarwinSelector::new(state.clone(), events.clone(), config.darwin.clone());

    let worktree = tempfile::tempdir().unwrap();
    let project = Project::new("proj-1", "Webshop", worktree.path());

    let registry = missiond::agent::AgentRegistry::new();
    let mut orchestrator = Orchestrator::new(
        config,
        state.clone(),
        events,
        memory,
        darwin,
        engine,
        gateway,
        registry,
    );
    orchestrator.register_project(project.clone());
    setup(&mut orchestrator, &project);

    Harness {
        orchestrator: Arc::new(orchestrator),
        state,
        primary,
        secondary,
        _worktree: worktree,
    }
}

fn wsjf() -> Wsjf {
    Wsjf {
        business_value: 5,
        time_criticality: 3,
        risk_reduction: 2,
        job_duration: 2,
    }
}

fn phase(name: &str, pattern: &str, gate: GatePredicate, policy: FailurePolicy) -> PhaseSpec {
    PhaseSpec {
        name: name.to_string(),
        pattern: pattern.to_string(),
        gate,
        phase_type: "review".to_string(),
        technology: "generic".to_string(),
        max_sprints: 1,
        failure_policy: policy,
    }
}

fn text(content: &str) -> CompletionResponse {
    MockLlmClient::text_response(content)
}

async fn journal_kinds(state: &StateManager, mission_id: &str) -> Vec<String> {
    state
        .replay_journal(Some(mission_id), 0)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.kind)
        .collect()
}

// Scenario: trivial sequential pass
#[tokio::test]
async fn sequential_two_agents_pass_gate() {
    let harness = harness(|orchestrator, _| {
        orchestrator.register_agent(AgentDefinition::new("dev-a", "A", Role::Developer));
        orchestrator.register_agent(AgentDefinition::new("dev-b", "B", Role::Developer));
        orchestrator.register_pattern(PatternDefinition::new(
            "pair-sequential",
            PatternType::Sequential,
            vec![PatternDefinition::agent("dev-a"), PatternDefinition::agent("dev-b")],
        ));
        orchestrator.register_workflow(WorkflowTemplate {
            id: "wf-1".into(),
            name: "single phase".into(),
            phases: vec![phase("review", "pair-sequential", GatePredicate::AllApproved, FailurePolicy::Abort)],
        });
    });

    harness.primary.push_response(text("agent A finished the first review pass with concrete findings"));
    harness.primary.push_response(text("agent B confirmed the findings and closed out the review"));

    let mission_id = harness
        .orchestrator
        .create_mission("proj-1", "wf-1", wsjf())
        .await
        .unwrap();
    harness.orchestrator.start_mission(&mission_id).await.unwrap();

    let view = harness.orchestrator.get_mission(&mission_id).await.unwrap();
    assert_eq!(view.status, MissionStatus::Done);

    let kinds = journal_kinds(&harness.state, &mission_id).await;
    assert_eq!(kinds.iter().filter(|k| *k == "agent.message").count(), 2);
    assert_eq!(kinds.iter().filter(|k| *k == "mission.phase_gate").count(), 1);
    assert_eq!(kinds.iter().filter(|k| *k == "mission.done").count(), 1);
    assert_eq!(kinds.iter().filter(|k| *k == "mission.phase_started").count(), 1);

    harness.state.shutdown().await.unwrap();
}

// Scenario: absolute veto in a cascade
#[tokio::test]
async fn cascade_absolute_veto_yields_done_with_issues() {
    let harness = harness(|orchestrator, _| {
        orchestrator
            .register_agent(AgentDefinition::new("code-critic", "Code", Role::Adversarial).with_veto(VetoLevel::Strong));
        orchestrator
            .register_agent(AgentDefinition::new("sec-critic", "Sec", Role::Adversarial).with_veto(VetoLevel::Absolute));
        orchestrator
            .register_agent(AgentDefinition::new("arch-critic", "Arch", Role::Adversarial).with_veto(VetoLevel::Strong));
        orchestrator.register_pattern(PatternDefinition::new(
            "review-cascade",
            PatternType::AdversarialCascade,
            vec![
                PatternDefinition::agent("code-critic"),
                PatternDefinition::agent("sec-critic"),
                PatternDefinition::agent("arch-critic"),
            ],
        ));
        orchestrator.register_workflow(WorkflowTemplate {
            id: "wf-cascade".into(),
            name: "cascade".into(),
            phases: vec![phase("security review", "review-cascade", GatePredicate::NoVeto, FailurePolicy::Retry)],
        });
    });

    harness.primary.push_response(text("APPROVE - code structure is sound and the tests cover the change"));
    harness.primary.push_response(text("VETO: the service account key is committed in plain text"));

    let mission_id = harness
        .orchestrator
        .create_mission("proj-1", "wf-cascade", wsjf())
        .await
        .unwrap();
    harness.orchestrator.start_mission(&mission_id).await.unwrap();

    // max_sprints = 1, retry exhausted: the mission advances with issues
    let view = harness.orchestrator.get_mission(&mission_id).await.unwrap();
    assert_eq!(view.status, MissionStatus::DoneWithIssues);
    assert!(!view.issues.as_array().unwrap().is_empty());

    // The third critic was never called: only two requests reached the LLM
    assert_eq!(harness.primary.requests.lock().unwrap().len(), 2);

    let kinds = journal_kinds(&harness.state, &mission_id).await;
    assert!(kinds.iter().any(|k| k == "adversarial.veto"));

    harness.state.shutdown().await.unwrap();
}

// Scenario: selection under warmup
#[tokio::test]
async fn darwin_warmup_explores_both_candidates() {
    let harness = harness(|orchestrator, _| {
        orchestrator.register_agent(AgentDefinition::new("dev-a", "A", Role::Developer));
        orchestrator.register_agent(AgentDefinition::new("dev-b", "B", Role::Developer));
        orchestrator.register_pattern(PatternDefinition::new(
            "solo-role",
            PatternType::Solo,
            vec![PatternDefinition::role(Role::Developer)],
        ));
        orchestrator.register_workflow(WorkflowTemplate {
            id: "wf-solo".into(),
            name: "solo".into(),
            phases: vec![phase("build", "solo-role", GatePredicate::AllApproved, FailurePolicy::Abort)],
        });
    });

    for _ in 0..6 {
        harness
            .primary
            .push_response(text("the work for this mission is complete and verified in place"));
    }

    let mut mission_ids = Vec::new();
    for _ in 0..6 {
        let mission_id = harness
            .orchestrator
            .create_mission("proj-1", "wf-solo", wsjf())
            .await
            .unwrap();
        harness.orchestrator.start_mission(&mission_id).await.unwrap();
        mission_ids.push(mission_id);
    }

    // Selections journal per mission; both candidates appear in the warmup
    let mut selected = std::collections::HashSet::new();
    for mission_id in &mission_ids[..5] {
        for row in harness.state.replay_journal(Some(mission_id), 0).await.unwrap() {
            if row.kind == "darwin.selected_team" {
                selected.insert(row.payload["agent_id"].as_str().unwrap().to_string());
            }
        }
    }
    assert_eq!(selected.len(), 2, "both candidates explored during warmup");

    for mission_id in &mission_ids {
        let view = harness.orchestrator.get_mission(mission_id).await.unwrap();
        assert_eq!(view.status, MissionStatus::Done);
    }
    harness.state.shutdown().await.unwrap();
}

// Scenario: rate-limit fallback across providers
#[tokio::test]
async fn rate_limited_primary_falls_back_to_secondary() {
    let harness = harness(|orchestrator, _| {
        orchestrator.register_agent(AgentDefinition::new("dev-a", "A", Role::Developer));
        orchestrator.register_pattern(PatternDefinition::new(
            "solo-dev",
            PatternType::Solo,
            vec![PatternDefinition::agent("dev-a")],
        ));
        orchestrator.register_workflow(WorkflowTemplate {
            id: "wf-solo".into(),
            name: "solo".into(),
            phases: vec![phase("build", "solo-dev", GatePredicate::AllApproved, FailurePolicy::Abort)],
        });
    });

    harness.primary.push_error(LlmError::RateLimited {
        retry_after: Duration::from_secs(90),
    });
    harness
        .secondary
        .push_response(text("secondary provider carried the call and the work is done"));

    let mission_id = harness
        .orchestrator
        .create_mission("proj-1", "wf-solo", wsjf())
        .await
        .unwrap();
    harness.orchestrator.start_mission(&mission_id).await.unwrap();

    let view = harness.orchestrator.get_mission(&mission_id).await.unwrap();
    assert_eq!(view.status, MissionStatus::Done);

    // The successful trace is attributed to the secondary provider
    let traces = harness.state.list_llm_traces(&mission_id).await.unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].provider, "secondary");

    harness.state.shutdown().await.unwrap();
}

// Scenario: resume after a crash
#[tokio::test]
async fn resume_restarts_current_phase_only() {
    let harness = harness(|orchestrator, _| {
        orchestrator.register_agent(AgentDefinition::new("dev-a", "A", Role::Developer));
        orchestrator.register_pattern(PatternDefinition::new(
            "solo-dev",
            PatternType::Solo,
            vec![PatternDefinition::agent("dev-a")],
        ));
        orchestrator.register_workflow(WorkflowTemplate {
            id: "wf-2".into(),
            name: "two phase".into(),
            phases: vec![
                phase("first", "solo-dev", GatePredicate::AllApproved, FailurePolicy::Abort),
                phase("second", "solo-dev", GatePredicate::AllApproved, FailurePolicy::Abort),
            ],
        });
    });

    let mission_id = harness
        .orchestrator
        .create_mission("proj-1", "wf-2", wsjf())
        .await
        .unwrap();

    // Simulate pre-crash history: phase 0 ran and passed, phase 1 started
    // and the process died mid-call.
    harness
        .state
        .advance_cursor(&mission_id, 0, 1, "mission.phase_started", serde_json::json!({"phase": 0}))
        .await
        .unwrap();
    harness
        .state
        .advance_cursor(&mission_id, 1, 1, "mission.phase_advanced", serde_json::json!({"from": 0}))
        .await
        .unwrap();
    harness
        .state
        .advance_cursor(&mission_id, 1, 1, "mission.phase_started", serde_json::json!({"phase": 1}))
        .await
        .unwrap();
    harness.state.set_mission_status(&mission_id, "running").await.unwrap();

    // One scripted response: only phase 1 (the in-flight phase) reruns
    harness
        .primary
        .push_response(text("the second phase work is finished and checked into the tree"));

    let stats = harness.orchestrator.recover().await.unwrap();
    assert_eq!(stats.resumed, 1);

    // Wait for the resumed drive to finish
    for _ in 0..100 {
        let view = harness.orchestrator.get_mission(&mission_id).await.unwrap();
        if view.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let view = harness.orchestrator.get_mission(&mission_id).await.unwrap();
    assert_eq!(view.status, MissionStatus::Done);

    // Phase 0 was not re-run; phase 1 restarted exactly once after the crash
    let rows = harness.state.replay_journal(Some(&mission_id), 0).await.unwrap();
    let started_phase_0 = rows
        .iter()
        .filter(|r| r.kind == "mission.phase_started" && r.payload["phase"] == 0)
        .count();
    let started_phase_1 = rows
        .iter()
        .filter(|r| r.kind == "mission.phase_started" && r.payload["phase"] == 1)
        .count();
    assert_eq!(started_phase_0, 1);
    assert_eq!(started_phase_1, 2);
    assert_eq!(harness.primary.requests.lock().unwrap().len(), 1);

    harness.state.shutdown().await.unwrap();
}

// Scenario: human checkpoint accept and reject
#[tokio::test]
async fn checkpoint_gate_pauses_then_decision_settles_it() {
    let harness = harness(|orchestrator, _| {
        orchestrator.register_agent(AgentDefinition::new("dev-a", "A", Role::Developer));
        orchestrator.register_pattern(PatternDefinition::new(
            "solo-dev",
            PatternType::Solo,
            vec![PatternDefinition::agent("dev-a")],
        ));
        orchestrator.register_workflow(WorkflowTemplate {
            id: "wf-gated".into(),
            name: "gated".into(),
            phases: vec![phase("release gate", "solo-dev", GatePredicate::Checkpoint, FailurePolicy::Abort)],
        });
    });

    // Accept path
    harness
        .primary
        .push_response(text("release notes and rollout plan drafted for human sign-off"));
    let mission_id = harness
        .orchestrator
        .create_mission("proj-1", "wf-gated", wsjf())
        .await
        .unwrap();
    harness.orchestrator.start_mission(&mission_id).await.unwrap();

    let view = harness.orchestrator.get_mission(&mission_id).await.unwrap();
    assert_eq!(view.status, MissionStatus::Paused);
    assert_eq!(view.pending_checkpoints.len(), 1);
    let checkpoint_id = view.pending_checkpoints[0].clone();

    let kinds = journal_kinds(&harness.state, &mission_id).await;
    assert!(kinds.iter().any(|k| k == "checkpoint.pending"));

    harness
        .orchestrator
        .approve_checkpoint(&mission_id, &checkpoint_id, true)
        .await
        .unwrap();
    for _ in 0..100 {
        let view = harness.orchestrator.get_mission(&mission_id).await.unwrap();
        if view.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let view = harness.orchestrator.get_mission(&mission_id).await.unwrap();
    assert_eq!(view.status, MissionStatus::Done);

    // Reject path
    harness
        .primary
        .push_response(text("second release drafted, waiting on the same human gate"));
    let rejected_id = harness
        .orchestrator
        .create_mission("proj-1", "wf-gated", wsjf())
        .await
        .unwrap();
    harness.orchestrator.start_mission(&rejected_id).await.unwrap();

    let view = harness.orchestrator.get_mission(&rejected_id).await.unwrap();
    let checkpoint_id = view.pending_checkpoints[0].clone();
    harness
        .orchestrator
        .approve_checkpoint(&rejected_id, &checkpoint_id, false)
        .await
        .unwrap();

    let view = harness.orchestrator.get_mission(&rejected_id).await.unwrap();
    assert_eq!(view.status, MissionStatus::Failed);

    harness.state.shutdown().await.unwrap();
}

// Dev phases open sprints and close them with a retrospective
#[tokio::test]
async fn dev_phase_writes_sprint_retro_into_project_memory() {
    let harness = harness(|orchestrator, _| {
        orchestrator.register_agent(AgentDefinition::new("dev-a", "A", Role::Developer));
        orchestrator.register_pattern(PatternDefinition::new(
            "solo-dev",
            PatternType::Solo,
            vec![PatternDefinition::agent("dev-a")],
        ));
        orchestrator.register_workflow(WorkflowTemplate {
            id: "wf-dev".into(),
            name: "dev".into(),
            phases: vec![PhaseSpec {
                name: "implement".into(),
                pattern: "solo-dev".into(),
                gate: GatePredicate::AllApproved,
                phase_type: "dev".into(),
                technology: "generic".into(),
                max_sprints: 1,
                failure_policy: FailurePolicy::Abort,
            }],
        });
    });

    harness
        .primary
        .push_response(text("implemented the feature with tests and wired it into the module"));
    // The retro writer's own LLM call
    harness
        .primary
        .push_response(text("Went well: focused scope. Dragged: flaky fixture. Next: pin the fixture seed."));

    let mission_id = harness
        .orchestrator
        .create_mission("proj-1", "wf-dev", wsjf())
        .await
        .unwrap();
    harness.orchestrator.start_mission(&mission_id).await.unwrap();

    let view = harness.orchestrator.get_mission(&mission_id).await.unwrap();
    assert_eq!(view.status, MissionStatus::Done);

    let kinds = journal_kinds(&harness.state, &mission_id).await;
    assert!(kinds.iter().any(|k| k == "mission.sprint_opened"));
    assert!(kinds.iter().any(|k| k == "mission.sprint_closed_with_retro"));

    // The retro is durable project-layer memory
    let entries = harness
        .state
        .list_memory_scope(missionstore::MemoryLayer::Project, "proj-1", Some("retro"), 10)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].body.contains("fixture"));

    let sprints = harness.state.list_sprints(&mission_id).await.unwrap();
    assert_eq!(sprints.len(), 1);
    assert_eq!(sprints[0].status, "completed");

    harness.state.shutdown().await.unwrap();
}

// Structural errors are fatal with a precise pointer
#[tokio::test]
async fn missing_pattern_is_a_structural_error() {
    let harness = harness(|orchestrator, _| {
        orchestrator.register_workflow(WorkflowTemplate {
            id: "wf-broken".into(),
            name: "broken".into(),
            phases: vec![phase("ghost", "no-such-pattern", GatePredicate::Always, FailurePolicy::Abort)],
        });
    });

    let err = harness
        .orchestrator
        .create_mission("proj-1", "wf-broken", wsjf())
        .await
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("no-such-pattern"), "error names the missing entity: {}", text);

    harness.state.shutdown().await.unwrap();
}
