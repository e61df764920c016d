//! LLM traces, tool-call records, bus messages and dead letters

use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::{Result, Store, StoreError, now_millis};

/// One LLM call trace
///
/// Token counts are mandatory; fitness and budget accounting read them back.
/// Cost is fixed-point micro-dollars, never a float.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmTraceRow {
    pub id: String,
    pub mission_id: Option<String>,
    pub agent_id: String,
    pub phase: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub latency_ms: i64,
    pub cost_microusd: i64,
    pub prompt_hash: String,
    pub created_at: i64,
}

/// One executed tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRow {
    pub id: String,
    pub agent_id: String,
    pub tool: String,
    pub args: serde_json::Value,
    pub idempotency_key: String,
    pub result: Option<String>,
    pub is_error: bool,
    pub duration_ms: i64,
    pub created_at: i64,
}

/// A bus message mirrored into the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub kind: String,
    pub priority: i64,
    pub body: serde_json::Value,
    pub parent_id: Option<String>,
    pub created_at: i64,
}

/// A message dropped from an overflowing inbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRow {
    pub id: i64,
    pub recipient: String,
    pub message: serde_json::Value,
    pub reason: String,
    pub created_at: i64,
}

impl Store {
    /// Record an LLM trace
    pub fn record_llm_trace(&self, row: &LlmTraceRow) -> Result<()> {
        if row.input_tokens < 0 || row.output_tokens < 0 {
            return Err(StoreError::InvalidArgument("negative token count".into()));
        }
        self.conn.execute(
            "INSERT INTO llm_traces (id, mission_id, agent_id, phase, provider, model, input_tokens, \
             output_tokens, latency_ms, cost_microusd, prompt_hash, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                row.id,
                row.mission_id,
                row.agent_id,
                row.phase,
                row.provider,
                row.model,
                row.input_tokens,
                row.output_tokens,
                row.latency_ms,
                row.cost_microusd,
                row.prompt_hash,
                row.created_at,
            ],
        )?;
        Ok(())
    }

    /// Traces for one mission, oldest first
    pub fn list_llm_traces(&self, mission_id: &str) -> Result<Vec<LlmTraceRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM llm_traces WHERE mission_id = ?1 ORDER BY created_at ASC")?;
        let iter = stmt.query_map(params![mission_id], |row| {
            Ok(LlmTraceRow {
                id: row.get("id")?,
                mission_id: row.get("mission_id")?,
                agent_id: row.get("agent_id")?,
                phase: row.get("phase")?,
                provider: row.get("provider")?,
                model: row.get("model")?,
                input_tokens: row.get("input_tokens")?,
                output_tokens: row.get("output_tokens")?,
                latency_ms: row.get("latency_ms")?,
                cost_microusd: row.get("cost_microusd")?,
                prompt_hash: row.get("prompt_hash")?,
                created_at: row.get("created_at")?,
            })
        })?;
        let mut rows = Vec::new();
        for row in iter {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Sum of (input_tokens, output_tokens, cost_microusd) for a mission
    ///
    /// Attribution survives mission failure; nothing here filters by status.
    pub fn mission_cost(&self, mission_id: &str) -> Result<(i64, i64, i64)> {
        let sums = self.conn.query_row(
            "SELECT COALESCE(SUM(input_tokens), 0), COALESCE(SUM(output_tokens), 0), \
             COALESCE(SUM(cost_microusd), 0) FROM llm_traces WHERE mission_id = ?1",
            params![mission_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(sums)
    }

    /// Record a tool call execution
    pub fn record_tool_call(&self, row: &ToolCallRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tool_calls (id, agent_id, tool, args, idempotency_key, result, is_error, duration_ms, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.id,
                row.agent_id,
                row.tool,
                row.args.to_string(),
                row.idempotency_key,
                row.result,
                row.is_error as i64,
                row.duration_ms,
                row.created_at,
            ],
        )?;
        Ok(())
    }

    /// Most recent execution under an idempotency key, if any
    pub fn find_tool_call_by_key(&self, idempotency_key: &str) -> Result<Option<ToolCallRow>> {
        self.conn
            .query_row(
                "SELECT * FROM tool_calls WHERE idempotency_key = ?1 ORDER BY created_at DESC LIMIT 1",
                params![idempotency_key],
                |row| {
                    let args: String = row.get("args")?;
                    Ok(ToolCallRow {
                        id: row.get("id")?,
                        agent_id: row.get("agent_id")?,
                        tool: row.get("tool")?,
                        args: serde_json::from_str(&args).unwrap_or(serde_json::Value::Null),
                        idempotency_key: row.get("idempotency_key")?,
                        result: row.get("result")?,
                        is_error: row.get::<_, i64>("is_error")? != 0,
                        duration_ms: row.get("duration_ms")?,
                        created_at: row.get("created_at")?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Count journaled executions under an idempotency key
    pub fn count_tool_calls_by_key(&self, idempotency_key: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM tool_calls WHERE idempotency_key = ?1",
            params![idempotency_key],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Mirror a bus message into the store (full-text indexed)
    pub fn record_message(&self, row: &MessageRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO messages (id, sender, recipients, kind, priority, body, parent_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.id,
                row.sender,
                serde_json::to_string(&row.recipients)?,
                row.kind,
                row.priority,
                row.body.to_string(),
                row.parent_id,
                row.created_at,
            ],
        )?;
        Ok(())
    }

    /// Record a dropped message in the dead-letter log
    pub fn record_dead_letter(&self, recipient: &str, message: &serde_json::Value, reason: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO dead_letters (recipient, message, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![recipient, message.to_string(), reason, now_millis()],
        )?;
        Ok(())
    }

    /// Recent dead letters, newest first
    pub fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM dead_letters ORDER BY id DESC LIMIT ?1")?;
        let iter = stmt.query_map(params![limit as i64], |row| {
            let message: String = row.get("message")?;
            Ok(DeadLetterRow {
                id: row.get("id")?,
                recipient: row.get("recipient")?,
                message: serde_json::from_str(&message).unwrap_or(serde_json::Value::Null),
                reason: row.get("reason")?,
                created_at: row.get("created_at")?,
            })
        })?;
        let mut rows = Vec::new();
        for row in iter {
            rows.push(row?);
        }
        Ok(rows)
    }
}
