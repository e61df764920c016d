//! Store open/close and schema management

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::{DEFAULT_BUSY_TIMEOUT_MS, Result, SCHEMA_VERSION, StoreError};

/// The mission store, owning one SQLite connection
///
/// Callers are expected to funnel access through a single owner (missiond
/// uses a channel actor); the store itself does not synchronize.
pub struct Store {
    pub(crate) conn: Connection,
    #[allow(dead_code)]
    path: PathBuf,
}

impl Store {
    /// Open or create a store at the given directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| StoreError::InvalidArgument(format!("cannot create {}: {}", dir.display(), e)))?;
        let path = dir.join("missions.db");
        let conn = Connection::open(&path)?;
        Self::init(conn, path)
    }

    /// Open an in-memory store (tests)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;

        let store = Self { conn, path };
        store.migrate()?;
        debug!(path = %store.path.display(), "Opened mission store");
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self.conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version >= SCHEMA_VERSION {
            return Ok(());
        }

        info!(from = version, to = SCHEMA_VERSION, "Migrating store schema");
        self.conn.execute_batch(SCHEMA)?;
        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS missions (
    id               TEXT PRIMARY KEY,
    project_id       TEXT NOT NULL,
    workflow_id      TEXT NOT NULL,
    status           TEXT NOT NULL,
    business_value   INTEGER NOT NULL,
    time_criticality INTEGER NOT NULL,
    risk_reduction   INTEGER NOT NULL,
    job_duration     INTEGER NOT NULL,
    phase_index      INTEGER NOT NULL DEFAULT 0,
    sprint           INTEGER NOT NULL DEFAULT 1,
    issues           TEXT NOT NULL DEFAULT '[]',
    started_at       INTEGER,
    ended_at         INTEGER,
    created_at       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_missions_status ON missions(status);

CREATE TABLE IF NOT EXISTS sprints (
    id          TEXT PRIMARY KEY,
    mission_id  TEXT NOT NULL REFERENCES missions(id) ON DELETE CASCADE,
    phase_index INTEGER NOT NULL,
    number      INTEGER NOT NULL,
    status      TEXT NOT NULL,
    planned_points INTEGER,
    velocity    INTEGER,
    retro       TEXT,
    created_at  INTEGER NOT NULL,
    closed_at   INTEGER
);
CREATE INDEX IF NOT EXISTS idx_sprints_mission ON sprints(mission_id);

CREATE TABLE IF NOT EXISTS checkpoints (
    id          TEXT PRIMARY KEY,
    mission_id  TEXT NOT NULL REFERENCES missions(id) ON DELETE CASCADE,
    phase_index INTEGER NOT NULL,
    status      TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    resolved_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_checkpoints_mission ON checkpoints(mission_id, status);

CREATE TABLE IF NOT EXISTS journal (
    event_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    mission_id TEXT,
    kind       TEXT NOT NULL,
    payload    TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_journal_mission ON journal(mission_id, event_id);

CREATE TABLE IF NOT EXISTS memory_entries (
    id         TEXT PRIMARY KEY,
    layer      TEXT NOT NULL,
    scope_id   TEXT NOT NULL,
    category   TEXT NOT NULL,
    body       TEXT NOT NULL,
    metadata   TEXT NOT NULL DEFAULT '{}',
    deleted    INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memory_scope ON memory_entries(layer, scope_id, category);

CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
    body,
    content='memory_entries',
    content_rowid='rowid'
);
CREATE TRIGGER IF NOT EXISTS memory_ai AFTER INSERT ON memory_entries BEGIN
    INSERT INTO memory_fts(rowid, body) VALUES (new.rowid, new.body);
END;
CREATE TRIGGER IF NOT EXISTS memory_ad AFTER DELETE ON memory_entries BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, body) VALUES ('delete', old.rowid, old.body);
END;
CREATE TRIGGER IF NOT EXISTS memory_au AFTER UPDATE OF body ON memory_entries BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, body) VALUES ('delete', old.rowid, old.body);
    INSERT INTO memory_fts(rowid, body) VALUES (new.rowid, new.body);
END;

CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY,
    sender     TEXT NOT NULL,
    recipients TEXT NOT NULL,
    kind       TEXT NOT NULL,
    priority   INTEGER NOT NULL,
    body       TEXT NOT NULL,
    parent_id  TEXT,
    created_at INTEGER NOT NULL
);
CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    body,
    content='messages',
    content_rowid='rowid'
);
CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
    INSERT INTO messages_fts(rowid, body) VALUES (new.rowid, new.body);
END;

CREATE TABLE IF NOT EXISTS dead_letters (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    recipient  TEXT NOT NULL,
    message    TEXT NOT NULL,
    reason     TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tool_calls (
    id              TEXT PRIMARY KEY,
    agent_id        TEXT NOT NULL,
    tool            TEXT NOT NULL,
    args            TEXT NOT NULL,
    idempotency_key TEXT NOT NULL,
    result          TEXT,
    is_error        INTEGER NOT NULL DEFAULT 0,
    duration_ms     INTEGER NOT NULL DEFAULT 0,
    created_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tool_calls_idem ON tool_calls(idempotency_key);

CREATE TABLE IF NOT EXISTS llm_traces (
    id            TEXT PRIMARY KEY,
    mission_id    TEXT,
    agent_id      TEXT NOT NULL,
    phase         TEXT NOT NULL,
    provider      TEXT NOT NULL,
    model         TEXT NOT NULL,
    input_tokens  INTEGER NOT NULL,
    output_tokens INTEGER NOT NULL,
    latency_ms    INTEGER NOT NULL,
    cost_microusd INTEGER NOT NULL DEFAULT 0,
    prompt_hash   TEXT NOT NULL,
    created_at    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_llm_traces_mission ON llm_traces(mission_id);

CREATE TABLE IF NOT EXISTS fitness_team (
    agent_id   TEXT NOT NULL,
    pattern_id TEXT NOT NULL,
    technology TEXT NOT NULL,
    phase_type TEXT NOT NULL,
    runs       INTEGER NOT NULL DEFAULT 0,
    wins       INTEGER NOT NULL DEFAULT 0,
    losses     INTEGER NOT NULL DEFAULT 0,
    last_updated INTEGER NOT NULL,
    PRIMARY KEY (agent_id, pattern_id, technology, phase_type)
);

CREATE TABLE IF NOT EXISTS fitness_model (
    agent_id     TEXT NOT NULL,
    pattern_id   TEXT NOT NULL,
    technology   TEXT NOT NULL,
    phase_type   TEXT NOT NULL,
    llm_model    TEXT NOT NULL,
    llm_provider TEXT NOT NULL,
    runs         INTEGER NOT NULL DEFAULT 0,
    wins         INTEGER NOT NULL DEFAULT 0,
    losses       INTEGER NOT NULL DEFAULT 0,
    last_updated INTEGER NOT NULL,
    PRIMARY KEY (agent_id, pattern_id, technology, phase_type, llm_model)
);

CREATE TABLE IF NOT EXISTS ab_records (
    id         TEXT PRIMARY KEY,
    challenger TEXT NOT NULL,
    incumbent  TEXT NOT NULL,
    challenger_outcome TEXT,
    incumbent_outcome  TEXT,
    winner     TEXT,
    created_at INTEGER NOT NULL
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        let version: i64 = store
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_open_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        {
            let _store = Store::open(temp.path()).unwrap();
        }
        // Reopening against the same file must not re-run DDL destructively
        let store = Store::open(temp.path()).unwrap();
        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM missions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
