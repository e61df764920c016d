//! Team and model fitness rows
//!
//! Counters obey `runs = wins + losses`; the score is never stored, it is the
//! Beta posterior mean projected on read. Updates run read-increment-write in
//! one transaction so concurrent outcomes for the same key serialize.

use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::{Result, Store, now_millis};

/// Key for a team fitness row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamKey {
    pub agent_id: String,
    pub pattern_id: String,
    pub technology: String,
    pub phase_type: String,
}

/// Key for a model fitness row - extends the team key with the LLM dimension
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub agent_id: String,
    pub pattern_id: String,
    pub technology: String,
    pub phase_type: String,
    pub llm_model: String,
    pub llm_provider: String,
}

/// One fitness row with its derived score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitnessRow {
    pub runs: i64,
    pub wins: i64,
    pub losses: i64,
    pub score: f64,
    pub last_updated: i64,
}

/// Beta posterior mean on a 0..100 scale: `(wins+1)/(wins+losses+2) * 100`
pub fn beta_mean_score(wins: i64, losses: i64) -> f64 {
    (wins as f64 + 1.0) / ((wins + losses) as f64 + 2.0) * 100.0
}

fn row_from(wins: i64, losses: i64, last_updated: i64) -> FitnessRow {
    FitnessRow {
        runs: wins + losses,
        wins,
        losses,
        score: beta_mean_score(wins, losses),
        last_updated,
    }
}

impl Store {
    /// Fetch a team fitness row
    pub fn get_team_fitness(&self, key: &TeamKey) -> Result<Option<FitnessRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT wins, losses, last_updated FROM fitness_team \
                 WHERE agent_id = ?1 AND pattern_id = ?2 AND technology = ?3 AND phase_type = ?4",
                params![key.agent_id, key.pattern_id, key.technology, key.phase_type],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
            )
            .optional()?;
        Ok(row.map(|(w, l, t)| row_from(w, l, t)))
    }

    /// Record one team outcome (win or loss) transactionally
    ///
    /// `done_with_issues` phases call neither; the row is simply not touched.
    pub fn update_team_fitness(&mut self, key: &TeamKey, win: bool) -> Result<FitnessRow> {
        let tx = self.conn.transaction()?;
        let existing: Option<(i64, i64)> = tx
            .query_row(
                "SELECT wins, losses FROM fitness_team \
                 WHERE agent_id = ?1 AND pattern_id = ?2 AND technology = ?3 AND phase_type = ?4",
                params![key.agent_id, key.pattern_id, key.technology, key.phase_type],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (mut wins, mut losses) = existing.unwrap_or((0, 0));
        if win {
            wins += 1;
        } else {
            losses += 1;
        }
        let now = now_millis();
        tx.execute(
            "INSERT INTO fitness_team (agent_id, pattern_id, technology, phase_type, runs, wins, losses, last_updated) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT (agent_id, pattern_id, technology, phase_type) \
             DO UPDATE SET runs = ?5, wins = ?6, losses = ?7, last_updated = ?8",
            params![
                key.agent_id,
                key.pattern_id,
                key.technology,
                key.phase_type,
                wins + losses,
                wins,
                losses,
                now
            ],
        )?;
        tx.commit()?;
        Ok(row_from(wins, losses, now))
    }

    /// Fetch fitness rows for a set of candidate agents under one context
    pub fn team_fitness_for_candidates(
        &self,
        agent_ids: &[String],
        pattern_id: &str,
        technology: &str,
        phase_type: &str,
    ) -> Result<Vec<(String, FitnessRow)>> {
        let mut out = Vec::new();
        for agent_id in agent_ids {
            let key = TeamKey {
                agent_id: agent_id.clone(),
                pattern_id: pattern_id.to_string(),
                technology: technology.to_string(),
                phase_type: phase_type.to_string(),
            };
            if let Some(row) = self.get_team_fitness(&key)? {
                out.push((agent_id.clone(), row));
            }
        }
        Ok(out)
    }

    /// Fetch a model fitness row
    pub fn get_model_fitness(&self, key: &ModelKey) -> Result<Option<FitnessRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT wins, losses, last_updated FROM fitness_model \
                 WHERE agent_id = ?1 AND pattern_id = ?2 AND technology = ?3 AND phase_type = ?4 AND llm_model = ?5",
                params![key.agent_id, key.pattern_id, key.technology, key.phase_type, key.llm_model],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
            )
            .optional()?;
        Ok(row.map(|(w, l, t)| row_from(w, l, t)))
    }

    /// Record one model outcome transactionally
    pub fn update_model_fitness(&mut self, key: &ModelKey, win: bool) -> Result<FitnessRow> {
        let tx = self.conn.transaction()?;
        let existing: Option<(i64, i64)> = tx
            .query_row(
                "SELECT wins, losses FROM fitness_model \
                 WHERE agent_id = ?1 AND pattern_id = ?2 AND technology = ?3 AND phase_type = ?4 AND llm_model = ?5",
                params![key.agent_id, key.pattern_id, key.technology, key.phase_type, key.llm_model],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (mut wins, mut losses) = existing.unwrap_or((0, 0));
        if win {
            wins += 1;
        } else {
            losses += 1;
        }
        let now = now_millis();
        tx.execute(
            "INSERT INTO fitness_model (agent_id, pattern_id, technology, phase_type, llm_model, llm_provider, \
             runs, wins, losses, last_updated) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT (agent_id, pattern_id, technology, phase_type, llm_model) \
             DO UPDATE SET runs = ?7, wins = ?8, losses = ?9, last_updated = ?10",
            params![
                key.agent_id,
                key.pattern_id,
                key.technology,
                key.phase_type,
                key.llm_model,
                key.llm_provider,
                wins + losses,
                wins,
                losses,
                now
            ],
        )?;
        tx.commit()?;
        Ok(row_from(wins, losses, now))
    }
}

/// A journaled A/B shadow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbRecord {
    pub id: String,
    pub challenger: serde_json::Value,
    pub incumbent: serde_json::Value,
    pub challenger_outcome: Option<String>,
    pub incumbent_outcome: Option<String>,
    pub winner: Option<String>,
    pub created_at: i64,
}

impl Store {
    /// Insert an A/B shadow record
    pub fn create_ab_record(&self, record: &AbRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO ab_records (id, challenger, incumbent, challenger_outcome, incumbent_outcome, winner, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.challenger.to_string(),
                record.incumbent.to_string(),
                record.challenger_outcome,
                record.incumbent_outcome,
                record.winner,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    /// Record the evaluator verdict on an A/B shadow run
    pub fn settle_ab_record(
        &self,
        id: &str,
        challenger_outcome: &str,
        incumbent_outcome: &str,
        winner: &str,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE ab_records SET challenger_outcome = ?2, incumbent_outcome = ?3, winner = ?4 WHERE id = ?1",
            params![id, challenger_outcome, incumbent_outcome, winner],
        )?;
        Ok(())
    }
}
