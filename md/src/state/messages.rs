//! Command and error types for the state actor

use thiserror::Error;
use tokio::sync::oneshot;

use missionstore::{
    AbRecord, CheckpointRow, FitnessRow, JournalRow, LlmTraceRow, MemoryEntry, MemoryQuery, MessageRow, MissionRow,
    ModelKey, SearchMode, SprintRow, TeamKey, ToolCallRow,
};

/// Errors surfaced by the state layer
#[derive(Debug, Clone, Error)]
pub enum StateError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("State channel closed")]
    ChannelError,
}

impl From<missionstore::StoreError> for StateError {
    fn from(e: missionstore::StoreError) -> Self {
        match e {
            missionstore::StoreError::NotFound(what) => StateError::NotFound(what),
            missionstore::StoreError::Conflict(what) => StateError::Conflict(what),
            other => StateError::Store(other.to_string()),
        }
    }
}

/// Result alias used by all state operations
pub type StateResponse<T> = Result<T, StateError>;

type Reply<T> = oneshot::Sender<StateResponse<T>>;

/// Commands processed by the state actor
pub enum StateCommand {
    // Missions
    CreateMission {
        row: MissionRow,
        reply: Reply<()>,
    },
    GetMission {
        id: String,
        reply: Reply<Option<MissionRow>>,
    },
    ListMissions {
        status: Option<String>,
        limit: usize,
        offset: usize,
        reply: Reply<Vec<MissionRow>>,
    },
    SetMissionStatus {
        id: String,
        status: String,
        reply: Reply<()>,
    },
    AdvanceCursor {
        id: String,
        phase_index: i64,
        sprint: i64,
        journal_kind: String,
        journal_payload: serde_json::Value,
        reply: Reply<i64>,
    },
    AppendIssue {
        id: String,
        phase_index: i64,
        note: String,
        reply: Reply<()>,
    },

    // Sprints
    CreateSprint {
        row: SprintRow,
        reply: Reply<()>,
    },
    CloseSprint {
        id: String,
        status: String,
        velocity: Option<i64>,
        retro: Option<String>,
        reply: Reply<()>,
    },
    ListSprints {
        mission_id: String,
        reply: Reply<Vec<SprintRow>>,
    },

    // Checkpoints
    CreateCheckpoint {
        row: CheckpointRow,
        reply: Reply<()>,
    },
    ResolveCheckpoint {
        id: String,
        decision: String,
        reply: Reply<CheckpointRow>,
    },
    PendingCheckpoints {
        mission_id: String,
        reply: Reply<Vec<CheckpointRow>>,
    },

    // Journal
    AppendJournal {
        mission_id: Option<String>,
        kind: String,
        payload: serde_json::Value,
        reply: Reply<i64>,
    },
    ReplayJournal {
        mission_id: Option<String>,
        since_event_id: i64,
        reply: Reply<Vec<JournalRow>>,
    },
    CountJournalKind {
        mission_id: String,
        kind: String,
        reply: Reply<i64>,
    },

    // Memory
    PutMemory {
        entry: MemoryEntry,
        reply: Reply<()>,
    },
    GetMemory {
        id: String,
        reply: Reply<Option<MemoryEntry>>,
    },
    SearchMemory {
        query: String,
        filter: MemoryQuery,
        reply: Reply<(Vec<MemoryEntry>, SearchMode)>,
    },
    ListMemoryScope {
        layer: missionstore::MemoryLayer,
        scope_id: String,
        category: Option<String>,
        limit: usize,
        reply: Reply<Vec<MemoryEntry>>,
    },
    ExpireMemoryScope {
        layer: missionstore::MemoryLayer,
        scope_id: String,
        reply: Reply<usize>,
    },

    // Traces, tool calls, messages
    RecordLlmTrace {
        row: LlmTraceRow,
        reply: Reply<()>,
    },
    MissionCost {
        mission_id: String,
        reply: Reply<(i64, i64, i64)>,
    },
    ListLlmTraces {
        mission_id: String,
        reply: Reply<Vec<LlmTraceRow>>,
    },
    RecordToolCall {
        row: ToolCallRow,
        reply: Reply<()>,
    },
    FindToolCallByKey {
        key: String,
        reply: Reply<Option<ToolCallRow>>,
    },
    CountToolCallsByKey {
        key: String,
        reply: Reply<i64>,
    },
    RecordMessage {
        row: MessageRow,
        reply: Reply<()>,
    },
    RecordDeadLetter {
        recipient: String,
        message: serde_json::Value,
        reason: String,
        reply: Reply<()>,
    },

    // Fitness
    GetTeamFitness {
        key: TeamKey,
        reply: Reply<Option<FitnessRow>>,
    },
    UpdateTeamFitness {
        key: TeamKey,
        win: bool,
        reply: Reply<FitnessRow>,
    },
    GetModelFitness {
        key: ModelKey,
        reply: Reply<Option<FitnessRow>>,
    },
    UpdateModelFitness {
        key: ModelKey,
        win: bool,
        reply: Reply<FitnessRow>,
    },
    CreateAbRecord {
        record: AbRecord,
        reply: Reply<()>,
    },
    SettleAbRecord {
        id: String,
        challenger_outcome: String,
        incumbent_outcome: String,
        winner: String,
        reply: Reply<()>,
    },

    Shutdown,
}
