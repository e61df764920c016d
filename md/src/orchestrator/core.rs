//! The orchestrator

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentRegistry, PhaseContext};
use crate::config::Config;
use crate::darwin::{DarwinSelector, PhaseOutcome, ShadowPlan};
use crate::domain::{
    FailurePolicy, MissionStatus, ParticipantRef, PatternDefinition, PhaseSpec, Project, Wsjf, WorkflowTemplate,
    generate_id,
};
use crate::events::{CoreEvent, EventStream};
use crate::llm::LlmGateway;
use crate::memory::MemoryManager;
use crate::pattern::{GateOutcome, PatternEngine, PatternRunResult, ResolvedParticipant, evaluate_gate};
use crate::state::StateManager;

use super::admission::Admission;
use super::api::{MissionView, OrchestratorError};

/// Sprint budget for dev phases that do not pin their own
const DEV_MAX_SPRINTS_DEFAULT: u32 = 3;

/// Events included in the get_mission projection
const RECENT_EVENTS: usize = 20;

/// The top-level driver
pub struct Orchestrator {
    pub(super) config: Config,
    pub(super) state: StateManager,
    pub(super) events: Arc<EventStream>,
    pub(super) memory: MemoryManager,
    pub(super) darwin: DarwinSelector,
    pub(super) engine: PatternEngine,
    pub(super) gateway: Arc<LlmGateway>,
    pub(super) registry: AgentRegistry,
    workflows: HashMap<String, WorkflowTemplate>,
    patterns: HashMap<String, PatternDefinition>,
    projects: HashMap<String, Project>,
    pub(super) admission: Admission,
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
    deploy_approvals: Mutex<HashSet<String>>,
    /// Shadow comparisons scheduled during participant resolution, settled
    /// after the pattern run they shadow
    pending_shadows: Mutex<HashMap<String, Vec<ShadowPlan>>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        state: StateManager,
        events: Arc<EventStream>,
        memory: MemoryManager,
        darwin: DarwinSelector,
        engine: PatternEngine,
        gateway: Arc<LlmGateway>,
        registry: AgentRegistry,
    ) -> Self {
        let admission = Admission::new(&config.admission);
        Self {
            config,
            state,
            events,
            memory,
            darwin,
            engine,
            gateway,
            registry,
            workflows: HashMap::new(),
            patterns: HashMap::new(),
            projects: HashMap::new(),
            admission,
            cancel_tokens: Mutex::new(HashMap::new()),
            deploy_approvals: Mutex::new(HashSet::new()),
            pending_shadows: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_workflow(&mut self, workflow: WorkflowTemplate) {
        self.workflows.insert(workflow.id.clone(), workflow);
    }

    pub fn register_agent(&mut self, agent: crate::domain::AgentDefinition) {
        self.registry.register(agent);
    }

    pub fn register_pattern(&mut self, pattern: PatternDefinition) {
        self.patterns.insert(pattern.id.clone(), pattern);
    }

    pub fn register_project(&mut self, project: Project) {
        self.projects.insert(project.id.clone(), project);
    }

    /// Record a human deploy approval on a mission
    pub fn approve_deploy(&self, mission_id: &str) {
        self.deploy_approvals.lock().unwrap().insert(mission_id.to_string());
    }

    fn deploy_approved(&self, mission_id: &str) -> bool {
        self.deploy_approvals.lock().unwrap().contains(mission_id)
    }

    // === Mission API ===

    /// Create a mission in `queued`; validates every structural reference
    pub async fn create_mission(
        &self,
        project_id: &str,
        workflow_id: &str,
        wsjf: Wsjf,
    ) -> Result<String, OrchestratorError> {
        let project = self
            .projects
            .get(project_id)
            .ok_or_else(|| OrchestratorError::Structural(format!("unknown project {}", project_id)))?;
        let workflow = self
            .workflows
            .get(workflow_id)
            .ok_or_else(|| OrchestratorError::Structural(format!("unknown workflow {}", workflow_id)))?;

        // A workflow referencing a missing pattern or agent is unrunnable;
        // surface the precise pointer now rather than mid-mission.
        for phase in &workflow.phases {
            let pattern = self.patterns.get(&phase.pattern).ok_or_else(|| {
                OrchestratorError::Structural(format!(
                    "workflow {} phase '{}' references missing pattern {}",
                    workflow_id, phase.name, phase.pattern
                ))
            })?;
            for participant in &pattern.participants {
                if let ParticipantRef::Agent { agent } = participant
                    && self.registry.get(agent).is_none()
                {
                    return Err(OrchestratorError::Structural(format!(
                        "pattern {} references missing agent {}",
                        pattern.id, agent
                    )));
                }
            }
        }

        let mission_id = generate_id("mission", &format!("{}-{}", project.name, workflow.name));
        let row = missionstore::MissionRow {
            id: mission_id.clone(),
            project_id: project_id.to_string(),
            workflow_id: workflow_id.to_string(),
            status: MissionStatus::Queued.as_str().to_string(),
            business_value: wsjf.business_value,
            time_criticality: wsjf.time_criticality,
            risk_reduction: wsjf.risk_reduction,
            job_duration: wsjf.job_duration,
            phase_index: 0,
            sprint: 1,
            issues: serde_json::json!([]),
            started_at: None,
            ended_at: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        self.state.create_mission(row).await?;
        self.events
            .emit(CoreEvent::MissionCreated {
                mission_id: mission_id.clone(),
                project_id: project_id.to_string(),
                workflow_id: workflow_id.to_string(),
            })
            .await;
        info!(mission_id = %mission_id, "Mission created");
        Ok(mission_id)
    }

    /// Start (or restart) driving a mission; returns once it is spawned
    pub fn start_mission(self: &Arc<Self>, mission_id: &str) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.clone();
        let mission_id = mission_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.drive(&mission_id).await {
                error!(mission_id = %mission_id, error = %e, "Mission drive failed");
            }
        })
    }

    /// Pause a running mission; no-op otherwise
    pub async fn pause_mission(&self, mission_id: &str) -> Result<(), OrchestratorError> {
        let row = self.state.get_mission_required(mission_id).await?;
        let status = MissionStatus::parse(&row.status).unwrap_or(MissionStatus::Failed);
        if status != MissionStatus::Running {
            return Ok(());
        }
        if let Some(token) = self.cancel_tokens.lock().unwrap().get(mission_id) {
            token.cancel();
        }
        Ok(())
    }

    /// Resume a paused mission from its cursor
    pub fn resume_mission(self: &Arc<Self>, mission_id: &str) -> tokio::task::JoinHandle<()> {
        self.start_mission(mission_id)
    }

    /// Human decision on a pending checkpoint
    pub async fn approve_checkpoint(
        self: &Arc<Self>,
        mission_id: &str,
        checkpoint_id: &str,
        accept: bool,
    ) -> Result<(), OrchestratorError> {
        let row = self.state.get_mission_required(mission_id).await?;
        let decision = if accept { "accepted" } else { "rejected" };
        let checkpoint = self.state.resolve_checkpoint(checkpoint_id, decision).await?;
        if checkpoint.mission_id != mission_id {
            return Err(OrchestratorError::Conflict(format!(
                "checkpoint {} belongs to mission {}",
                checkpoint_id, checkpoint.mission_id
            )));
        }

        if accept {
            // The gated phase passed; advance past it and resume driving
            self.events
                .emit(CoreEvent::MissionPhaseGate {
                    mission_id: mission_id.to_string(),
                    phase_index: row.phase_index as usize,
                    outcome: "pass".to_string(),
                })
                .await;
            self.state
                .advance_cursor(
                    mission_id,
                    row.phase_index + 1,
                    1,
                    "mission.checkpoint_accepted",
                    serde_json::json!({ "checkpoint_id": checkpoint_id }),
                )
                .await?;
            self.resume_mission(mission_id);
        } else {
            self.state
                .set_mission_status(mission_id, MissionStatus::Failed.as_str())
                .await?;
            self.events
                .emit(CoreEvent::MissionDone {
                    mission_id: mission_id.to_string(),
                    status: MissionStatus::Failed.as_str().to_string(),
                })
                .await;
            info!(mission_id, checkpoint_id, "Checkpoint rejected, mission aborted");
        }
        Ok(())
    }

    /// Full status projection
    pub async fn get_mission(&self, mission_id: &str) -> Result<MissionView, OrchestratorError> {
        let row = self.state.get_mission_required(mission_id).await?;
        let status = MissionStatus::parse(&row.status).unwrap_or(MissionStatus::Failed);
        let phase_name = self
            .workflows
            .get(&row.workflow_id)
            .and_then(|w| w.phase(row.phase_index as usize))
            .map(|p| p.name.clone());
        let pending = self.state.pending_checkpoints(mission_id).await?;
        let cost = self.state.mission_cost(mission_id).await?;
        let events = self.state.replay_journal(Some(mission_id), 0).await?;
        let recent_events = events
            .into_iter()
            .rev()
            .take(RECENT_EVENTS)
            .rev()
            .map(|e| serde_json::json!({ "event_id": e.event_id, "kind": e.kind, "payload": e.payload }))
            .collect();

        Ok(MissionView {
            id: row.id,
            project_id: row.project_id,
            workflow_id: row.workflow_id,
            status,
            phase_index: row.phase_index as usize,
            phase_name,
            sprint: row.sprint.max(1) as u32,
            issues: row.issues,
            pending_checkpoints: pending.into_iter().map(|c| c.id).collect(),
            cost,
            recent_events,
        })
    }

    /// Paginated mission listing
    pub async fn list_missions(
        &self,
        status: Option<MissionStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MissionView>, OrchestratorError> {
        let rows = self
            .state
            .list_missions(status.map(|s| s.as_str().to_string()), limit, offset)
            .await?;
        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            views.push(self.get_mission(&row.id).await?);
        }
        Ok(views)
    }

    // === The phase loop ===

    /// Admit and drive a mission until it pauses or terminates
    async fn drive(self: &Arc<Self>, mission_id: &str) -> Result<(), OrchestratorError> {
        let row = self.state.get_mission_required(mission_id).await?;
        let status = MissionStatus::parse(&row.status).unwrap_or(MissionStatus::Failed);
        if status.is_terminal() {
            return Err(OrchestratorError::AlreadyTerminal(mission_id.to_string()));
        }

        let wsjf = Wsjf {
            business_value: row.business_value,
            time_criticality: row.time_criticality,
            risk_reduction: row.risk_reduction,
            job_duration: row.job_duration,
        };
        debug!(
            mission_id,
            capacity = self.config.admission.concurrency,
            score = wsjf.score_milli(),
            "Waiting for admission"
        );
        self.admission.acquire(mission_id, &row.project_id, wsjf).await;

        let cancel = CancellationToken::new();
        self.cancel_tokens
            .lock()
            .unwrap()
            .insert(mission_id.to_string(), cancel.clone());

        self.state
            .set_mission_status(mission_id, MissionStatus::Running.as_str())
            .await?;

        let outcome = self.run_phases(mission_id, &cancel).await;

        self.cancel_tokens.lock().unwrap().remove(mission_id);
        self.admission.release(mission_id, &row.project_id);

        if let Err(e) = &outcome {
            // Infrastructure failures park the mission for a later resume
            warn!(mission_id, error = %e, "Phase loop errored; marking mission paused");
            let _ = self
                .state
                .set_mission_status(mission_id, MissionStatus::Paused.as_str())
                .await;
        }
        outcome
    }

    async fn run_phases(self: &Arc<Self>, mission_id: &str, cancel: &CancellationToken) -> Result<(), OrchestratorError> {
        loop {
            if cancel.is_cancelled() {
                return self.park(mission_id, "paused by request").await;
            }

            let row = self.state.get_mission_required(mission_id).await?;
            let workflow = self.workflows.get(&row.workflow_id).ok_or_else(|| {
                OrchestratorError::Structural(format!("mission {} references missing workflow {}", mission_id, row.workflow_id))
            })?;
            let phase_index = row.phase_index.max(0) as usize;

            if phase_index >= workflow.phases.len() {
                return self.finish(mission_id, &row).await;
            }

            let phase = workflow.phases[phase_index].clone();
            let disposition = self
                .run_phase(mission_id, &row, phase_index, &phase, cancel)
                .await?;

            match disposition {
                PhaseDisposition::Advance => continue,
                PhaseDisposition::Parked => return Ok(()),
                PhaseDisposition::Aborted => return Ok(()),
            }
        }
    }

    async fn run_phase(
        self: &Arc<Self>,
        mission_id: &str,
        row: &missionstore::MissionRow,
        phase_index: usize,
        phase: &PhaseSpec,
        cancel: &CancellationToken,
    ) -> Result<PhaseDisposition, OrchestratorError> {
        let pattern = match self.patterns.get(&phase.pattern) {
            Some(pattern) => pattern.clone(),
            None => {
                return self
                    .fail_structural(mission_id, &format!("phase '{}' references missing pattern {}", phase.name, phase.pattern))
                    .await;
            }
        };
        let project = match self.projects.get(&row.project_id) {
            Some(project) => project.clone(),
            None => {
                return self
                    .fail_structural(mission_id, &format!("mission references missing project {}", row.project_id))
                    .await;
            }
        };

        if let Err(e) = self.memory.seed_project(&project).await {
            warn!(error = %e, "Project document seeding failed");
        }

        let technology = if phase.technology == "generic" && project.technology != "generic" {
            project.technology.clone()
        } else {
            phase.technology.clone()
        };
        let max_sprints = phase.effective_max_sprints(DEV_MAX_SPRINTS_DEFAULT);
        let mut sprint = row.sprint.max(1) as u32;

        loop {
            if cancel.is_cancelled() {
                self.park(mission_id, "paused by request").await?;
                return Ok(PhaseDisposition::Parked);
            }

            let event_payload = serde_json::json!({ "phase": phase_index, "name": phase.name, "sprint": sprint });
            self.state
                .advance_cursor(mission_id, phase_index as i64, sprint as i64, "mission.phase_started", event_payload)
                .await?;
            self.events.broadcast_only(CoreEvent::MissionPhaseStarted {
                mission_id: mission_id.to_string(),
                phase_index,
                phase_name: phase.name.clone(),
                sprint,
            });

            let sprint_row_id = if phase.is_dev() {
                Some(self.open_sprint(mission_id, phase_index, sprint).await?)
            } else {
                None
            };

            let participants = match self
                .resolve_participants(mission_id, &pattern, &technology, phase)
                .await
            {
                Ok(participants) => participants,
                Err(OrchestratorError::Structural(detail)) => {
                    return self.fail_structural(mission_id, &detail).await;
                }
                Err(e) => return Err(e),
            };
            let adversarial_ids: HashSet<String> = participants
                .iter()
                .filter(|p| p.agent.is_adversarial())
                .map(|p| p.agent.id.clone())
                .collect();

            let phase_ctx = PhaseContext {
                mission_id: mission_id.to_string(),
                project_id: project.id.clone(),
                phase_name: phase.name.clone(),
                phase_type: phase.phase_type.clone(),
                technology: technology.clone(),
                sprint,
                worktree: project.root.clone(),
                session_id: format!("{}-s{}", mission_id, sprint),
                pattern_run_id: String::new(),
                deploy_approved: self.deploy_approved(mission_id),
            };
            let task = format!(
                "Phase '{}' of the mission for project {}. Sprint {} of at most {}. {}",
                phase.name, project.name, sprint, max_sprints, workflow_task_hint(phase)
            );

            let shadow_plans = self.take_shadow_plans(mission_id);

            let result = self
                .engine
                .run(&pattern, participants, &task, &phase_ctx, cancel.child_token())
                .await
                .map_err(|e| OrchestratorError::Structural(format!("pattern run failed: {}", e)))?;

            for plan in shadow_plans {
                self.run_shadow(plan, &task, &phase_ctx, &result).await;
            }

            // Session memory expires with the sprint
            let _ = self
                .memory
                .expire_scope(missionstore::MemoryLayer::Session, &phase_ctx.session_id)
                .await;

            if cancel.is_cancelled() {
                self.park(mission_id, "paused by request").await?;
                return Ok(PhaseDisposition::Parked);
            }

            if result.checkpoint_id.is_some() {
                // The engine already persisted the checkpoint and emitted
                // the pending event; the mission waits off the slot.
                self.park(mission_id, "awaiting human checkpoint").await?;
                return Ok(PhaseDisposition::Parked);
            }

            let gate = evaluate_gate(phase.gate, &result, &adversarial_ids);
            debug!(mission_id, phase = %phase.name, sprint, ?gate, "Gate evaluated");

            match gate {
                GateOutcome::Pass => {
                    self.events
                        .emit(CoreEvent::MissionPhaseGate {
                            mission_id: mission_id.to_string(),
                            phase_index,
                            outcome: "pass".to_string(),
                        })
                        .await;
                    self.darwin
                        .record_outcome(&result.team_keys, &result.model_keys, PhaseOutcome::Pass)
                        .await?;
                    if let Some(sprint_row_id) = sprint_row_id {
                        self.close_sprint_with_retro(mission_id, &project, phase, &sprint_row_id, &result)
                            .await;
                    }
                    self.state
                        .advance_cursor(
                            mission_id,
                            phase_index as i64 + 1,
                            1,
                            "mission.phase_advanced",
                            serde_json::json!({ "from": phase_index }),
                        )
                        .await?;
                    return Ok(PhaseDisposition::Advance);
                }
                GateOutcome::AwaitingApproval => {
                    let checkpoint = missionstore::CheckpointRow {
                        id: generate_id("checkpoint", &phase.name),
                        mission_id: mission_id.to_string(),
                        phase_index: phase_index as i64,
                        status: "pending".to_string(),
                        created_at: chrono::Utc::now().timestamp_millis(),
                        resolved_at: None,
                    };
                    let checkpoint_id = checkpoint.id.clone();
                    self.state.create_checkpoint(checkpoint).await?;
                    self.events
                        .emit(CoreEvent::CheckpointPending {
                            mission_id: mission_id.to_string(),
                            checkpoint_id,
                            phase_index,
                        })
                        .await;
                    self.park(mission_id, "awaiting human checkpoint").await?;
                    return Ok(PhaseDisposition::Parked);
                }
                GateOutcome::Fail => {
                    self.events
                        .emit(CoreEvent::MissionPhaseGate {
                            mission_id: mission_id.to_string(),
                            phase_index,
                            outcome: "fail".to_string(),
                        })
                        .await;
                    let fitness_outcome = if phase.failure_policy == FailurePolicy::Skip {
                        PhaseOutcome::DoneWithIssues
                    } else {
                        PhaseOutcome::Fail
                    };
                    self.darwin
                        .record_outcome(&result.team_keys, &result.model_keys, fitness_outcome)
                        .await?;
                    if let Some(sprint_row_id) = &sprint_row_id {
                        let _ = self
                            .state
                            .close_sprint(sprint_row_id, "failed", Some(completed_nodes(&result)), None)
                            .await;
                    }

                    match phase.failure_policy {
                        FailurePolicy::Retry if sprint < max_sprints => {
                            info!(mission_id, phase = %phase.name, sprint, "Gate failed, retrying with another sprint");
                            sprint += 1;
                            continue;
                        }
                        FailurePolicy::Retry | FailurePolicy::Skip => {
                            self.state
                                .append_issue(mission_id, phase_index as i64, &issue_note(phase, &result))
                                .await?;
                            self.state
                                .advance_cursor(
                                    mission_id,
                                    phase_index as i64 + 1,
                                    1,
                                    "mission.phase_skipped",
                                    serde_json::json!({ "from": phase_index }),
                                )
                                .await?;
                            return Ok(PhaseDisposition::Advance);
                        }
                        FailurePolicy::Abort => {
                            self.state
                                .set_mission_status(mission_id, MissionStatus::Failed.as_str())
                                .await?;
                            self.events
                                .emit(CoreEvent::MissionDone {
                                    mission_id: mission_id.to_string(),
                                    status: MissionStatus::Failed.as_str().to_string(),
                                })
                                .await;
                            return Ok(PhaseDisposition::Aborted);
                        }
                        FailurePolicy::HumanDecide => {
                            let checkpoint = missionstore::CheckpointRow {
                                id: generate_id("checkpoint", &phase.name),
                                mission_id: mission_id.to_string(),
                                phase_index: phase_index as i64,
                                status: "pending".to_string(),
                                created_at: chrono::Utc::now().timestamp_millis(),
                                resolved_at: None,
                            };
                            let checkpoint_id = checkpoint.id.clone();
                            self.state.create_checkpoint(checkpoint).await?;
                            self.events
                                .emit(CoreEvent::CheckpointPending {
                                    mission_id: mission_id.to_string(),
                                    checkpoint_id,
                                    phase_index,
                                })
                                .await;
                            self.park(mission_id, "gate failed, awaiting human decision").await?;
                            return Ok(PhaseDisposition::Parked);
                        }
                    }
                }
            }
        }
    }

    /// Resolve pattern participants: concrete agents by lookup, role slots
    /// through the selector; model bindings for everyone
    async fn resolve_participants(
        self: &Arc<Self>,
        mission_id: &str,
        pattern: &PatternDefinition,
        technology: &str,
        phase: &PhaseSpec,
    ) -> Result<Vec<ResolvedParticipant>, OrchestratorError> {
        let mut participants = Vec::with_capacity(pattern.participants.len());

        for slot in &pattern.participants {
            let agent = match slot {
                ParticipantRef::Agent { agent } => self
                    .registry
                    .get(agent)
                    .cloned()
                    .ok_or_else(|| OrchestratorError::Structural(format!("pattern {} references missing agent {}", pattern.id, agent)))?,
                ParticipantRef::Role { role, technology: slot_technology } => {
                    let technology = slot_technology.as_deref().unwrap_or(technology);
                    let candidates: Vec<_> = self
                        .registry
                        .by_role(*role, Some(technology))
                        .into_iter()
                        .cloned()
                        .collect();
                    if candidates.is_empty() {
                        return Err(OrchestratorError::Structural(format!(
                            "no registered agent can fill role {} in pattern {}",
                            role, pattern.id
                        )));
                    }
                    let choice = self
                        .darwin
                        .select_agent(mission_id, *role, &candidates, &pattern.id, technology, &phase.phase_type)
                        .await?;

                    if self.darwin.wants_shadow(&choice)
                        && let Some((runner_up, _)) = &choice.runner_up
                    {
                        let challenger = missionstore::TeamKey {
                            agent_id: runner_up.clone(),
                            ..choice.key.clone()
                        };
                        match ShadowPlan::schedule(&self.state, challenger, choice.key.clone()).await {
                            Ok(plan) => self
                                .pending_shadows
                                .lock()
                                .unwrap()
                                .entry(mission_id.to_string())
                                .or_default()
                                .push(plan),
                            Err(e) => warn!(error = %e, "Failed to schedule shadow run"),
                        }
                    }

                    candidates
                        .into_iter()
                        .find(|c| c.id == choice.agent_id)
                        .expect("selected agent comes from the candidate set")
                }
            };

            let team_key = missionstore::TeamKey {
                agent_id: agent.id.clone(),
                pattern_id: pattern.id.clone(),
                technology: technology.to_string(),
                phase_type: phase.phase_type.clone(),
            };

            let model_candidates = self.gateway.candidates_for(&agent.llm_category.tag());
            let model_choice = self
                .darwin
                .select_model(mission_id, &agent, &model_candidates, &pattern.id, technology, &phase.phase_type)
                .await?;

            let (binding, model_key) = match model_choice {
                Some(choice) => (Some(choice.binding), Some(choice.key)),
                None => (None, None),
            };

            participants.push(ResolvedParticipant {
                agent,
                binding,
                team_key: Some(team_key),
                model_key,
            });
        }

        Ok(participants)
    }

    fn take_shadow_plans(&self, mission_id: &str) -> Vec<ShadowPlan> {
        self.pending_shadows
            .lock()
            .unwrap()
            .remove(mission_id)
            .unwrap_or_default()
    }

    /// Run a scheduled shadow comparison
    ///
    /// The challenger runs the same task solo; a dedicated `ab-evaluator`
    /// agent (never one of the contenders) names the winner when present,
    /// otherwise the guard outcomes decide. Best-effort throughout: a
    /// broken shadow run never touches the mission itself.
    async fn run_shadow(
        &self,
        plan: ShadowPlan,
        task: &str,
        phase_ctx: &PhaseContext,
        incumbent_result: &PatternRunResult,
    ) {
        let Some(challenger_agent) = self.registry.get(&plan.challenger.agent_id).cloned() else {
            warn!(agent = %plan.challenger.agent_id, "Shadow challenger vanished from the registry");
            return;
        };

        let incumbent_node = incumbent_result
            .nodes
            .iter()
            .find(|n| n.agent_id == plan.incumbent.agent_id);
        let incumbent_passed = incumbent_node
            .map(|n| n.status == crate::pattern::NodeStatus::Completed)
            .unwrap_or(false);
        let incumbent_output = incumbent_node.and_then(|n| n.output.clone()).unwrap_or_default();

        let definition = PatternDefinition::new(
            format!("{}-shadow", plan.incumbent.pattern_id),
            crate::domain::PatternType::Solo,
            vec![PatternDefinition::agent(challenger_agent.id.clone())],
        );
        let shadow_result = match self
            .engine
            .run(
                &definition,
                vec![ResolvedParticipant::new(challenger_agent)],
                task,
                phase_ctx,
                CancellationToken::new(),
            )
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Shadow run failed");
                return;
            }
        };

        let challenger_passed = shadow_result
            .nodes
            .first()
            .map(|n| n.status == crate::pattern::NodeStatus::Completed)
            .unwrap_or(false);
        let challenger_output = shadow_result.final_output.clone().unwrap_or_default();

        let winner_is_challenger = match self.registry.get("ab-evaluator").cloned() {
            Some(evaluator) => {
                self.evaluate_shadow(evaluator, task, &incumbent_output, &challenger_output, phase_ctx)
                    .await
                    .unwrap_or(challenger_passed && !incumbent_passed)
            }
            None => challenger_passed && !incumbent_passed,
        };

        if let Err(e) = plan
            .settle(&self.state, challenger_passed, incumbent_passed, winner_is_challenger)
            .await
        {
            warn!(error = %e, "Failed to settle shadow run");
        }
    }

    /// One evaluator turn over both outputs; parses a WINNER marker
    async fn evaluate_shadow(
        &self,
        evaluator: crate::domain::AgentDefinition,
        task: &str,
        incumbent_output: &str,
        challenger_output: &str,
        phase_ctx: &PhaseContext,
    ) -> Option<bool> {
        let verdict_task = format!(
            "Two agents attempted the same task independently. Compare the results \
             and answer with exactly WINNER: incumbent or WINNER: challenger on the \
             first line, then a short justification.\n\n## Task\n{}\n\n\
             ## Incumbent result\n{}\n\n## Challenger result\n{}",
            task, incumbent_output, challenger_output
        );
        let definition = PatternDefinition::new(
            "shadow-evaluation",
            crate::domain::PatternType::Solo,
            vec![PatternDefinition::agent(evaluator.id.clone())],
        );
        let result = self
            .engine
            .run(
                &definition,
                vec![ResolvedParticipant::new(evaluator)],
                &verdict_task,
                phase_ctx,
                CancellationToken::new(),
            )
            .await
            .ok()?;
        let output = result.final_output?;
        let line = output.lines().next()?.to_ascii_lowercase();
        if line.contains("winner") {
            Some(line.contains("challenger"))
        } else {
            None
        }
    }

    async fn open_sprint(&self, mission_id: &str, phase_index: usize, number: u32) -> Result<String, OrchestratorError> {
        let sprint_id = generate_id("sprint", &format!("phase-{}-{}", phase_index, number));
        self.state
            .create_sprint(missionstore::SprintRow {
                id: sprint_id.clone(),
                mission_id: mission_id.to_string(),
                phase_index: phase_index as i64,
                number: number as i64,
                status: "active".to_string(),
                planned_points: None,
                velocity: None,
                retro: None,
                created_at: chrono::Utc::now().timestamp_millis(),
                closed_at: None,
            })
            .await?;
        self.events
            .emit(CoreEvent::MissionSprintOpened {
                mission_id: mission_id.to_string(),
                sprint_id: sprint_id.clone(),
                phase_index,
                number,
            })
            .await;
        Ok(sprint_id)
    }

    async fn park(&self, mission_id: &str, reason: &str) -> Result<(), OrchestratorError> {
        self.state
            .set_mission_status(mission_id, MissionStatus::Paused.as_str())
            .await?;
        self.events
            .emit(CoreEvent::MissionPaused {
                mission_id: mission_id.to_string(),
                reason: reason.to_string(),
            })
            .await;
        info!(mission_id, reason, "Mission parked");
        Ok(())
    }

    async fn finish(&self, mission_id: &str, row: &missionstore::MissionRow) -> Result<(), OrchestratorError> {
        let has_issues = row.issues.as_array().map(|a| !a.is_empty()).unwrap_or(false);
        let status = if has_issues {
            MissionStatus::DoneWithIssues
        } else {
            MissionStatus::Done
        };
        self.state.set_mission_status(mission_id, status.as_str()).await?;
        self.events
            .emit(CoreEvent::MissionDone {
                mission_id: mission_id.to_string(),
                status: status.as_str().to_string(),
            })
            .await;
        info!(mission_id, %status, "Mission finished");
        Ok(())
    }

    async fn fail_structural(&self, mission_id: &str, detail: &str) -> Result<PhaseDisposition, OrchestratorError> {
        error!(mission_id, detail, "Structural error is fatal to the mission");
        self.state
            .append_issue(mission_id, -1, &format!("structural: {}", detail))
            .await?;
        self.state
            .set_mission_status(mission_id, MissionStatus::Failed.as_str())
            .await?;
        self.events
            .emit(CoreEvent::MissionDone {
                mission_id: mission_id.to_string(),
                status: MissionStatus::Failed.as_str().to_string(),
            })
            .await;
        Ok(PhaseDisposition::Aborted)
    }
}

enum PhaseDisposition {
    Advance,
    Parked,
    Aborted,
}

fn completed_nodes(result: &PatternRunResult) -> i64 {
    result
        .nodes
        .iter()
        .filter(|n| n.status == crate::pattern::NodeStatus::Completed)
        .count() as i64
}

fn issue_note(phase: &PhaseSpec, result: &PatternRunResult) -> String {
    let detail: Vec<String> = result
        .nodes
        .iter()
        .filter(|n| n.status != crate::pattern::NodeStatus::Completed)
        .map(|n| format!("{}: {:?}", n.agent_id, n.status))
        .collect();
    format!("phase '{}' gate failed ({})", phase.name, detail.join(", "))
}

fn workflow_task_hint(phase: &PhaseSpec) -> String {
    match phase.phase_type.as_str() {
        "plan" => "Produce the plan for this phase.".to_string(),
        "review" => "Review the work produced so far.".to_string(),
        _ => "Carry out the work of this phase.".to_string(),
    }
}
