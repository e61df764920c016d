//! Mission runs, sprints and checkpoints

use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::{Result, Store, StoreError, now_millis};

/// Persisted mission run state
///
/// The `(phase_index, sprint)` pair is the resume cursor; it is only ever
/// advanced together with a journal row in [`Store::advance_cursor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionRow {
    pub id: String,
    pub project_id: String,
    pub workflow_id: String,
    pub status: String,
    pub business_value: i64,
    pub time_criticality: i64,
    pub risk_reduction: i64,
    pub job_duration: i64,
    pub phase_index: i64,
    pub sprint: i64,
    /// Per-phase issue lists, JSON array of arrays
    pub issues: serde_json::Value,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub created_at: i64,
}

/// Persisted sprint record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprintRow {
    pub id: String,
    pub mission_id: String,
    pub phase_index: i64,
    pub number: i64,
    pub status: String,
    pub planned_points: Option<i64>,
    pub velocity: Option<i64>,
    pub retro: Option<String>,
    pub created_at: i64,
    pub closed_at: Option<i64>,
}

/// Persisted human checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRow {
    pub id: String,
    pub mission_id: String,
    pub phase_index: i64,
    pub status: String,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

fn mission_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MissionRow> {
    let issues: String = row.get("issues")?;
    Ok(MissionRow {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        workflow_id: row.get("workflow_id")?,
        status: row.get("status")?,
        business_value: row.get("business_value")?,
        time_criticality: row.get("time_criticality")?,
        risk_reduction: row.get("risk_reduction")?,
        job_duration: row.get("job_duration")?,
        phase_index: row.get("phase_index")?,
        sprint: row.get("sprint")?,
        issues: serde_json::from_str(&issues).unwrap_or(serde_json::Value::Array(vec![])),
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        created_at: row.get("created_at")?,
    })
}

fn sprint_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SprintRow> {
    Ok(SprintRow {
        id: row.get("id")?,
        mission_id: row.get("mission_id")?,
        phase_index: row.get("phase_index")?,
        number: row.get("number")?,
        status: row.get("status")?,
        planned_points: row.get("planned_points")?,
        velocity: row.get("velocity")?,
        retro: row.get("retro")?,
        created_at: row.get("created_at")?,
        closed_at: row.get("closed_at")?,
    })
}

impl Store {
    /// Insert a new mission run in `queued` status
    pub fn create_mission(&self, row: &MissionRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO missions (id, project_id, workflow_id, status, business_value, \
             time_criticality, risk_reduction, job_duration, phase_index, sprint, issues, \
             started_at, ended_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                row.id,
                row.project_id,
                row.workflow_id,
                row.status,
                row.business_value,
                row.time_criticality,
                row.risk_reduction,
                row.job_duration,
                row.phase_index,
                row.sprint,
                row.issues.to_string(),
                row.started_at,
                row.ended_at,
                row.created_at,
            ],
        )?;
        Ok(())
    }

    /// Fetch one mission run
    pub fn get_mission(&self, id: &str) -> Result<Option<MissionRow>> {
        self.conn
            .query_row("SELECT * FROM missions WHERE id = ?1", params![id], mission_from_row)
            .optional()
            .map_err(StoreError::from)
    }

    /// Fetch one mission run, erroring when absent
    pub fn get_mission_required(&self, id: &str) -> Result<MissionRow> {
        self.get_mission(id)?
            .ok_or_else(|| StoreError::NotFound(format!("mission {}", id)))
    }

    /// List missions, optionally filtered by status, newest first
    pub fn list_missions(&self, status: Option<&str>, limit: usize, offset: usize) -> Result<Vec<MissionRow>> {
        let mut rows = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM missions WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                )?;
                let iter = stmt.query_map(params![status, limit as i64, offset as i64], mission_from_row)?;
                for row in iter {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare("SELECT * FROM missions ORDER BY created_at DESC LIMIT ?1 OFFSET ?2")?;
                let iter = stmt.query_map(params![limit as i64, offset as i64], mission_from_row)?;
                for row in iter {
                    rows.push(row?);
                }
            }
        }
        Ok(rows)
    }

    /// Update mission status (and start/end stamps where relevant)
    pub fn set_mission_status(&self, id: &str, status: &str) -> Result<()> {
        let now = now_millis();
        let (started, ended) = match status {
            "running" => (Some(now), None),
            "done" | "done_with_issues" | "failed" => (None, Some(now)),
            _ => (None, None),
        };
        let changed = self.conn.execute(
            "UPDATE missions SET status = ?2, \
             started_at = COALESCE(?3, started_at), \
             ended_at = COALESCE(?4, ended_at) \
             WHERE id = ?1",
            params![id, status, started, ended],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("mission {}", id)));
        }
        Ok(())
    }

    /// Advance the resume cursor and journal the transition atomically
    ///
    /// The cursor is the single source of truth for resume, so it must never
    /// drift from the journal; both rows commit or neither does.
    pub fn advance_cursor(
        &mut self,
        id: &str,
        phase_index: i64,
        sprint: i64,
        journal_kind: &str,
        journal_payload: &serde_json::Value,
    ) -> Result<i64> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE missions SET phase_index = ?2, sprint = ?3 WHERE id = ?1",
            params![id, phase_index, sprint],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("mission {}", id)));
        }
        tx.execute(
            "INSERT INTO journal (mission_id, kind, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, journal_kind, journal_payload.to_string(), now_millis()],
        )?;
        let event_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(event_id)
    }

    /// Append a per-phase issue note to the mission's issue list
    pub fn append_mission_issue(&self, id: &str, phase_index: i64, note: &str) -> Result<()> {
        let mission = self.get_mission_required(id)?;
        let mut issues = match mission.issues {
            serde_json::Value::Array(v) => v,
            _ => vec![],
        };
        issues.push(serde_json::json!({ "phase": phase_index, "note": note }));
        self.conn.execute(
            "UPDATE missions SET issues = ?2 WHERE id = ?1",
            params![id, serde_json::Value::Array(issues).to_string()],
        )?;
        Ok(())
    }

    // === Sprints ===

    /// Insert a sprint record
    pub fn create_sprint(&self, row: &SprintRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sprints (id, mission_id, phase_index, number, status, planned_points, \
             velocity, retro, created_at, closed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.id,
                row.mission_id,
                row.phase_index,
                row.number,
                row.status,
                row.planned_points,
                row.velocity,
                row.retro,
                row.created_at,
                row.closed_at,
            ],
        )?;
        Ok(())
    }

    /// Close a sprint: set terminal status, velocity and retro notes
    pub fn close_sprint(&self, id: &str, status: &str, velocity: Option<i64>, retro: Option<&str>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE sprints SET status = ?2, velocity = ?3, retro = ?4, closed_at = ?5 WHERE id = ?1",
            params![id, status, velocity, retro, now_millis()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("sprint {}", id)));
        }
        Ok(())
    }

    /// All sprints of a mission, oldest first
    pub fn list_sprints(&self, mission_id: &str) -> Result<Vec<SprintRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM sprints WHERE mission_id = ?1 ORDER BY created_at ASC")?;
        let iter = stmt.query_map(params![mission_id], sprint_from_row)?;
        let mut rows = Vec::new();
        for row in iter {
            rows.push(row?);
        }
        Ok(rows)
    }

    // === Checkpoints ===

    /// Insert a pending checkpoint
    pub fn create_checkpoint(&self, row: &CheckpointRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO checkpoints (id, mission_id, phase_index, status, created_at, resolved_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.id,
                row.mission_id,
                row.phase_index,
                row.status,
                row.created_at,
                row.resolved_at
            ],
        )?;
        Ok(())
    }

    /// Resolve a checkpoint; errors if it is not pending
    pub fn resolve_checkpoint(&self, id: &str, decision: &str) -> Result<CheckpointRow> {
        let changed = self.conn.execute(
            "UPDATE checkpoints SET status = ?2, resolved_at = ?3 WHERE id = ?1 AND status = 'pending'",
            params![id, decision, now_millis()],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!("checkpoint {} is not pending", id)));
        }
        self.conn
            .query_row("SELECT * FROM checkpoints WHERE id = ?1", params![id], |row| {
                Ok(CheckpointRow {
                    id: row.get("id")?,
                    mission_id: row.get("mission_id")?,
                    phase_index: row.get("phase_index")?,
                    status: row.get("status")?,
                    created_at: row.get("created_at")?,
                    resolved_at: row.get("resolved_at")?,
                })
            })
            .map_err(StoreError::from)
    }

    /// Pending checkpoints for a mission
    pub fn pending_checkpoints(&self, mission_id: &str) -> Result<Vec<CheckpointRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM checkpoints WHERE mission_id = ?1 AND status = 'pending' ORDER BY created_at")?;
        let iter = stmt.query_map(params![mission_id], |row| {
            Ok(CheckpointRow {
                id: row.get("id")?,
                mission_id: row.get("mission_id")?,
                phase_index: row.get("phase_index")?,
                status: row.get("status")?,
                created_at: row.get("created_at")?,
                resolved_at: row.get("resolved_at")?,
            })
        })?;
        let mut rows = Vec::new();
        for row in iter {
            rows.push(row?);
        }
        Ok(rows)
    }
}
