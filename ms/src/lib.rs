//! MissionStore - transactional persistence for missiond
//!
//! A synchronous SQLite (WAL) store holding everything the orchestration core
//! needs to survive a restart: mission runs and their cursors, sprints,
//! checkpoints, the append-only journal, memory entries with a full-text
//! index, team/model fitness counters, A/B shadow records, LLM traces and
//! tool-call records.
//!
//! The store is intentionally synchronous; missiond wraps it in a channel
//! actor so that all writes are serialized through one owner task. The
//! journal row and the mission cursor update commit in the same transaction,
//! which makes the journal the ground truth for recovery.

mod error;
mod fitness;
mod journal;
mod memory;
mod missions;
mod store;
mod traces;

pub use error::StoreError;
pub use fitness::{AbRecord, FitnessRow, ModelKey, TeamKey, beta_mean_score};
pub use journal::JournalRow;
pub use memory::{MemoryEntry, MemoryLayer, MemoryQuery, SearchMode};
pub use missions::{CheckpointRow, MissionRow, SprintRow};
pub use store::Store;
pub use traces::{DeadLetterRow, LlmTraceRow, MessageRow, ToolCallRow};

/// Result alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Default SQLite busy timeout in milliseconds
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Current schema version, bumped on any DDL change
pub const SCHEMA_VERSION: i64 = 1;

/// Current unix timestamp in milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
