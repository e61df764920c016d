//! StateManager - actor that owns the mission store

use std::path::Path;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use missionstore::{
    AbRecord, CheckpointRow, FitnessRow, JournalRow, LlmTraceRow, MemoryEntry, MemoryLayer, MemoryQuery, MessageRow,
    MissionRow, ModelKey, SearchMode, SprintRow, Store, TeamKey, ToolCallRow,
};

use super::messages::{StateCommand, StateError, StateResponse};

/// Handle to the state actor; cheap to clone
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

macro_rules! request {
    ($self:expr, $variant:ident { $($field:ident $(: $value:expr)?),* $(,)? }) => {{
        let (reply, reply_rx) = oneshot::channel();
        $self
            .tx
            .send(StateCommand::$variant { $($field $(: $value)?,)* reply })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }};
}

impl StateManager {
    /// Open the store and spawn the actor
    pub fn spawn(store_dir: impl AsRef<Path>) -> eyre::Result<Self> {
        let store = Store::open(store_dir.as_ref()).map_err(|e| eyre::eyre!("Failed to open store: {}", e))?;
        Ok(Self::spawn_with(store))
    }

    /// Spawn over an in-memory store (tests)
    pub fn spawn_in_memory() -> eyre::Result<Self> {
        let store = Store::open_in_memory().map_err(|e| eyre::eyre!("Failed to open store: {}", e))?;
        Ok(Self::spawn_with(store))
    }

    fn spawn_with(store: Store) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));
        info!("StateManager spawned");
        Self { tx }
    }

    /// Request shutdown of the actor
    pub async fn shutdown(&self) -> StateResponse<()> {
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }

    // === Missions ===

    pub async fn create_mission(&self, row: MissionRow) -> StateResponse<()> {
        debug!(mission_id = %row.id, "create_mission");
        request!(self, CreateMission { row })
    }

    pub async fn get_mission(&self, id: &str) -> StateResponse<Option<MissionRow>> {
        request!(self, GetMission { id: id.to_string() })
    }

    pub async fn get_mission_required(&self, id: &str) -> StateResponse<MissionRow> {
        self.get_mission(id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("mission {}", id)))
    }

    pub async fn list_missions(
        &self,
        status: Option<String>,
        limit: usize,
        offset: usize,
    ) -> StateResponse<Vec<MissionRow>> {
        request!(self, ListMissions { status, limit, offset })
    }

    pub async fn set_mission_status(&self, id: &str, status: &str) -> StateResponse<()> {
        debug!(mission_id = %id, %status, "set_mission_status");
        request!(
            self,
            SetMissionStatus {
                id: id.to_string(),
                status: status.to_string(),
            }
        )
    }

    /// Advance the resume cursor together with its journal row
    pub async fn advance_cursor(
        &self,
        id: &str,
        phase_index: i64,
        sprint: i64,
        journal_kind: &str,
        journal_payload: serde_json::Value,
    ) -> StateResponse<i64> {
        request!(
            self,
            AdvanceCursor {
                id: id.to_string(),
                phase_index,
                sprint,
                journal_kind: journal_kind.to_string(),
                journal_payload,
            }
        )
    }

    pub async fn append_issue(&self, id: &str, phase_index: i64, note: &str) -> StateResponse<()> {
        request!(
            self,
            AppendIssue {
                id: id.to_string(),
                phase_index,
                note: note.to_string(),
            }
        )
    }

    // === Sprints ===

    pub async fn create_sprint(&self, row: SprintRow) -> StateResponse<()> {
        request!(self, CreateSprint { row })
    }

    pub async fn close_sprint(
        &self,
        id: &str,
        status: &str,
        velocity: Option<i64>,
        retro: Option<String>,
    ) -> StateResponse<()> {
        request!(
            self,
            CloseSprint {
                id: id.to_string(),
                status: status.to_string(),
                velocity,
                retro,
            }
        )
    }

    pub async fn list_sprints(&self, mission_id: &str) -> StateResponse<Vec<SprintRow>> {
        request!(
            self,
            ListSprints {
                mission_id: mission_id.to_string(),
            }
        )
    }

    // === Checkpoints ===

    pub async fn create_checkpoint(&self, row: CheckpointRow) -> StateResponse<()> {
        request!(self, CreateCheckpoint { row })
    }

    pub async fn resolve_checkpoint(&self, id: &str, decision: &str) -> StateResponse<CheckpointRow> {
        request!(
            self,
            ResolveCheckpoint {
                id: id.to_string(),
                decision: decision.to_string(),
            }
        )
    }

    pub async fn pending_checkpoints(&self, mission_id: &str) -> StateResponse<Vec<CheckpointRow>> {
        request!(
            self,
            PendingCheckpoints {
                mission_id: mission_id.to_string(),
            }
        )
    }

    // === Journal ===

    pub async fn append_journal(
        &self,
        mission_id: Option<&str>,
        kind: &str,
        payload: serde_json::Value,
    ) -> StateResponse<i64> {
        request!(
            self,
            AppendJournal {
                mission_id: mission_id.map(|s| s.to_string()),
                kind: kind.to_string(),
                payload,
            }
        )
    }

    pub async fn replay_journal(
        &self,
        mission_id: Option<&str>,
        since_event_id: i64,
    ) -> StateResponse<Vec<JournalRow>> {
        request!(
            self,
            ReplayJournal {
                mission_id: mission_id.map(|s| s.to_string()),
                since_event_id,
            }
        )
    }

    pub async fn count_journal_kind(&self, mission_id: &str, kind: &str) -> StateResponse<i64> {
        request!(
            self,
            CountJournalKind {
                mission_id: mission_id.to_string(),
                kind: kind.to_string(),
            }
        )
    }

    // === Memory ===

    pub async fn put_memory(&self, entry: MemoryEntry) -> StateResponse<()> {
        request!(self, PutMemory { entry })
    }

    pub async fn get_memory(&self, id: &str) -> StateResponse<Option<MemoryEntry>> {
        request!(self, GetMemory { id: id.to_string() })
    }

    pub async fn search_memory(
        &self,
        query: &str,
        filter: MemoryQuery,
    ) -> StateResponse<(Vec<MemoryEntry>, SearchMode)> {
        request!(
            self,
            SearchMemory {
                query: query.to_string(),
                filter,
            }
        )
    }

    pub async fn list_memory_scope(
        &self,
        layer: MemoryLayer,
        scope_id: &str,
        category: Option<&str>,
        limit: usize,
    ) -> StateResponse<Vec<MemoryEntry>> {
        request!(
            self,
            ListMemoryScope {
                layer,
                scope_id: scope_id.to_string(),
                category: category.map(|s| s.to_string()),
                limit,
            }
        )
    }

    pub async fn expire_memory_scope(&self, layer: MemoryLayer, scope_id: &str) -> StateResponse<usize> {
        request!(
            self,
            ExpireMemoryScope {
                layer,
                scope_id: scope_id.to_string(),
            }
        )
    }

    // === Traces, tool calls, messages ===

    pub async fn record_llm_trace(&self, row: LlmTraceRow) -> StateResponse<()> {
        request!(self, RecordLlmTrace { row })
    }

    pub async fn mission_cost(&self, mission_id: &str) -> StateResponse<(i64, i64, i64)> {
        request!(
            self,
            MissionCost {
                mission_id: mission_id.to_string(),
            }
        )
    }

    pub async fn list_llm_traces(&self, mission_id: &str) -> StateResponse<Vec<LlmTraceRow>> {
        request!(
            self,
            ListLlmTraces {
                mission_id: mission_id.to_string(),
            }
        )
    }

    pub async fn record_tool_call(&self, row: ToolCallRow) -> StateResponse<()> {
        request!(self, RecordToolCall { row })
    }

    pub async fn find_tool_call_by_key(&self, key: &str) -> StateResponse<Option<ToolCallRow>> {
        request!(self, FindToolCallByKey { key: key.to_string() })
    }

    pub async fn count_tool_calls_by_key(&self, key: &str) -> StateResponse<i64> {
        request!(self, CountToolCallsByKey { key: key.to_string() })
    }

    pub async fn record_message(&self, row: MessageRow) -> StateResponse<()> {
        request!(self, RecordMessage { row })
    }

    pub async fn record_dead_letter(
        &self,
        recipient: &str,
        message: serde_json::Value,
        reason: &str,
    ) -> StateResponse<()> {
        request!(
            self,
            RecordDeadLetter {
                recipient: recipient.to_string(),
                message,
                reason: reason.to_string(),
            }
        )
    }

    // === Fitness ===

    pub async fn get_team_fitness(&self, key: TeamKey) -> StateResponse<Option<FitnessRow>> {
        request!(self, GetTeamFitness { key })
    }

    pub async fn update_team_fitness(&self, key: TeamKey, win: bool) -> StateResponse<FitnessRow> {
        request!(self, UpdateTeamFitness { key, win })
    }

    pub async fn get_model_fitness(&self, key: ModelKey) -> StateResponse<Option<FitnessRow>> {
        request!(self, GetModelFitness { key })
    }

    pub async fn update_model_fitness(&self, key: ModelKey, win: bool) -> StateResponse<FitnessRow> {
        request!(self, UpdateModelFitness { key, win })
    }

    pub async fn create_ab_record(&self, record: AbRecord) -> StateResponse<()> {
        request!(self, CreateAbRecord { record })
    }

    pub async fn settle_ab_record(
        &self,
        id: &str,
        challenger_outcome: &str,
        incumbent_outcome: &str,
        winner: &str,
    ) -> StateResponse<()> {
        request!(
            self,
            SettleAbRecord {
                id: id.to_string(),
                challenger_outcome: challenger_outcome.to_string(),
                incumbent_outcome: incumbent_outcome.to_string(),
                winner: winner.to_string(),
            }
        )
    }
}

fn send<T>(reply: oneshot::Sender<StateResponse<T>>, result: Result<T, missionstore::StoreError>) {
    if reply.send(result.map_err(StateError::from)).is_err() {
        warn!("State reply receiver dropped");
    }
}

async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    info!("State actor started");

    while let Some(command) = rx.recv().await {
        match command {
            StateCommand::CreateMission { row, reply } => send(reply, store.create_mission(&row)),
            StateCommand::GetMission { id, reply } => send(reply, store.get_mission(&id)),
            StateCommand::ListMissions {
                status,
                limit,
                offset,
                reply,
            } => send(reply, store.list_missions(status.as_deref(), limit, offset)),
            StateCommand::SetMissionStatus { id, status, reply } => send(reply, store.set_mission_status(&id, &status)),
            StateCommand::AdvanceCursor {
                id,
                phase_index,
                sprint,
                journal_kind,
                journal_payload,
                reply,
            } => send(
                reply,
                store.advance_cursor(&id, phase_index, sprint, &journal_kind, &journal_payload),
            ),
            StateCommand::AppendIssue {
                id,
                phase_index,
                note,
                reply,
            } => send(reply, store.append_mission_issue(&id, phase_index, &note)),

            StateCommand::CreateSprint { row, reply } => send(reply, store.create_sprint(&row)),
            StateCommand::CloseSprint {
                id,
                status,
                velocity,
                retro,
                reply,
            } => send(reply, store.close_sprint(&id, &status, velocity, retro.as_deref())),
            StateCommand::ListSprints { mission_id, reply } => send(reply, store.list_sprints(&mission_id)),

            StateCommand::CreateCheckpoint { row, reply } => send(reply, store.create_checkpoint(&row)),
            StateCommand::ResolveCheckpoint { id, decision, reply } => {
                send(reply, store.resolve_checkpoint(&id, &decision))
            }
            StateCommand::PendingCheckpoints { mission_id, reply } => {
                send(reply, store.pending_checkpoints(&mission_id))
            }

            StateCommand::AppendJournal {
                mission_id,
                kind,
                payload,
                reply,
            } => send(reply, store.append_journal(mission_id.as_deref(), &kind, &payload)),
            StateCommand::ReplayJournal {
                mission_id,
                since_event_id,
                reply,
            } => send(reply, store.replay_journal(mission_id.as_deref(), since_event_id)),
            StateCommand::CountJournalKind {
                mission_id,
                kind,
                reply,
            } => send(reply, store.count_journal_kind(&mission_id, &kind)),

            StateCommand::PutMemory { entry, reply } => send(reply, store.put_memory(&entry)),
            StateCommand::GetMemory { id, reply } => send(reply, store.get_memory(&id)),
            StateCommand::SearchMemory { query, filter, reply } => send(reply, store.search_memory(&query, &filter)),
            StateCommand::ListMemoryScope {
                layer,
                scope_id,
                category,
                limit,
                reply,
            } => send(
                reply,
                store.list_memory_scope(layer, &scope_id, category.as_deref(), limit),
            ),
            StateCommand::ExpireMemoryScope { layer, scope_id, reply } => {
                send(reply, store.expire_memory_scope(layer, &scope_id))
            }

            StateCommand::RecordLlmTrace { row, reply } => send(reply, store.record_llm_trace(&row)),
            StateCommand::MissionCost { mission_id, reply } => send(reply, store.mission_cost(&mission_id)),
            StateCommand::ListLlmTraces { mission_id, reply } => send(reply, store.list_llm_traces(&mission_id)),
            StateCommand::RecordToolCall { row, reply } => send(reply, store.record_tool_call(&row)),
            StateCommand::FindToolCallByKey { key, reply } => send(reply, store.find_tool_call_by_key(&key)),
            StateCommand::CountToolCallsByKey { key, reply } => send(reply, store.count_tool_calls_by_key(&key)),
            StateCommand::RecordMessage { row, reply } => send(reply, store.record_message(&row)),
            StateCommand::RecordDeadLetter {
                recipient,
                message,
                reason,
                reply,
            } => send(reply, store.record_dead_letter(&recipient, &message, &reason)),

            StateCommand::GetTeamFitness { key, reply } => send(reply, store.get_team_fitness(&key)),
            StateCommand::UpdateTeamFitness { key, win, reply } => send(reply, store.update_team_fitness(&key, win)),
            StateCommand::GetModelFitness { key, reply } => send(reply, store.get_model_fitness(&key)),
            StateCommand::UpdateModelFitness { key, win, reply } => send(reply, store.update_model_fitness(&key, win)),
            StateCommand::CreateAbRecord { record, reply } => send(reply, store.create_ab_record(&record)),
            StateCommand::SettleAbRecord {
                id,
                challenger_outcome,
                incumbent_outcome,
                winner,
                reply,
            } => send(
                reply,
                store.settle_ab_record(&id, &challenger_outcome, &incumbent_outcome, &winner),
            ),

            StateCommand::Shutdown => {
                info!("State actor shutting down");
                break;
            }
        }
    }

    info!("State actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mission(id: &str) -> MissionRow {
        MissionRow {
            id: id.to_string(),
            project_id: "proj-1".into(),
            workflow_id: "wf-1".into(),
            status: "queued".into(),
            business_value: 5,
            time_criticality: 5,
            risk_reduction: 5,
            job_duration: 5,
            phase_index: 0,
            sprint: 1,
            issues: serde_json::json!([]),
            started_at: None,
            ended_at: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[tokio::test]
    async fn test_mission_round_trip_through_actor() {
        let state = StateManager::spawn_in_memory().unwrap();

        state.create_mission(mission("m-1")).await.unwrap();
        let fetched = state.get_mission_required("m-1").await.unwrap();
        assert_eq!(fetched.status, "queued");

        state.set_mission_status("m-1", "running").await.unwrap();
        let event_id = state
            .advance_cursor("m-1", 1, 1, "mission.phase_started", serde_json::json!({"phase": 1}))
            .await
            .unwrap();
        assert!(event_id > 0);

        state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_not_found_error() {
        let state = StateManager::spawn_in_memory().unwrap();
        let err = state.get_mission_required("missing").await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
        state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_fitness_through_actor() {
        let state = StateManager::spawn_in_memory().unwrap();
        let key = TeamKey {
            agent_id: "dev-alice".into(),
            pattern_id: "sequential".into(),
            technology: "generic".into(),
            phase_type: "dev".into(),
        };

        let row = state.update_team_fitness(key.clone(), true).await.unwrap();
        assert_eq!(row.wins, 1);
        assert_eq!(row.runs, row.wins + row.losses);

        let fetched = state.get_team_fitness(key).await.unwrap().unwrap();
        assert_eq!(fetched.wins, 1);
        state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_through_actor() {
        let state = StateManager::spawn_in_memory().unwrap();
        let entry = MemoryEntry::new(
            MemoryLayer::Project,
            "proj-1",
            "retro",
            "velocity regressed after the schema split",
            serde_json::json!({}),
        );
        state.put_memory(entry).await.unwrap();

        let (hits, _) = state
            .search_memory(
                "velocity",
                MemoryQuery {
                    scopes: vec![(MemoryLayer::Project, "proj-1".into())],
                    category: None,
                    limit: 10,
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        state.shutdown().await.unwrap();
    }
}
