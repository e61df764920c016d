//! Append-only journal - the ground truth for recovery and event replay

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::{Result, Store, now_millis};

/// One journal row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRow {
    pub event_id: i64,
    pub mission_id: Option<String>,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: i64,
}

impl Store {
    /// Append an event to the journal, returning its id
    pub fn append_journal(
        &self,
        mission_id: Option<&str>,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO journal (mission_id, kind, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![mission_id, kind, payload.to_string(), now_millis()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Replay journal rows after `since_event_id`, oldest first
    ///
    /// With a mission filter only that mission's rows are returned; the
    /// event stream uses this to backfill subscribers that missed live
    /// broadcasts.
    pub fn replay_journal(&self, mission_id: Option<&str>, since_event_id: i64) -> Result<Vec<JournalRow>> {
        let mut rows = Vec::new();
        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<JournalRow> {
            let payload: String = row.get("payload")?;
            Ok(JournalRow {
                event_id: row.get("event_id")?,
                mission_id: row.get("mission_id")?,
                kind: row.get("kind")?,
                payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
                created_at: row.get("created_at")?,
            })
        };
        match mission_id {
            Some(mission_id) => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM journal WHERE mission_id = ?1 AND event_id > ?2 ORDER BY event_id ASC",
                )?;
                let iter = stmt.query_map(params![mission_id, since_event_id], map)?;
                for row in iter {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare("SELECT * FROM journal WHERE event_id > ?1 ORDER BY event_id ASC")?;
                let iter = stmt.query_map(params![since_event_id], map)?;
                for row in iter {
                    rows.push(row?);
                }
            }
        }
        Ok(rows)
    }

    /// Count journal rows of a kind for one mission
    pub fn count_journal_kind(&self, mission_id: &str, kind: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM journal WHERE mission_id = ?1 AND kind = ?2",
            params![mission_id, kind],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_replay() {
        let store = Store::open_in_memory().unwrap();

        let first = store
            .append_journal(Some("m-1"), "mission.created", &serde_json::json!({"project": "p"}))
            .unwrap();
        store
            .append_journal(Some("m-1"), "mission.phase_started", &serde_json::json!({"phase": 0}))
            .unwrap();
        store
            .append_journal(Some("m-2"), "mission.created", &serde_json::json!({}))
            .unwrap();

        let all = store.replay_journal(Some("m-1"), 0).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].kind, "mission.created");

        let tail = store.replay_journal(Some("m-1"), first).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].kind, "mission.phase_started");
    }

    #[test]
    fn test_event_ids_are_monotonic() {
        let store = Store::open_in_memory().unwrap();
        let a = store.append_journal(None, "a", &serde_json::json!({})).unwrap();
        let b = store.append_journal(None, "b", &serde_json::json!({})).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_count_kind() {
        let store = Store::open_in_memory().unwrap();
        store
            .append_journal(Some("m-1"), "mission.phase_started", &serde_json::json!({}))
            .unwrap();
        store
            .append_journal(Some("m-1"), "mission.phase_started", &serde_json::json!({}))
            .unwrap();
        assert_eq!(store.count_journal_kind("m-1", "mission.phase_started").unwrap(), 2);
        assert_eq!(store.count_journal_kind("m-1", "mission.phase_gate").unwrap(), 0);
    }
}
