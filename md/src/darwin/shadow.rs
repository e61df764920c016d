//! A/B shadow runs
//!
//! When two candidates sample too close to call, the challenger runs the
//! same task in the shadow of the incumbent. A dedicated evaluator agent -
//! never one of the two contenders - names the winner, which is journaled
//! and biases future selection through an extra fitness outcome.

use tracing::info;

use missionstore::{AbRecord, TeamKey};

use crate::state::{StateError, StateManager};

/// A scheduled shadow comparison
#[derive(Debug, Clone)]
pub struct ShadowPlan {
    pub record_id: String,
    pub challenger: TeamKey,
    pub incumbent: TeamKey,
}

impl ShadowPlan {
    /// Journal a new shadow plan
    pub async fn schedule(
        state: &StateManager,
        challenger: TeamKey,
        incumbent: TeamKey,
    ) -> Result<Self, StateError> {
        let record = AbRecord {
            id: uuid::Uuid::now_v7().to_string(),
            challenger: serde_json::to_value(&challenger).unwrap_or(serde_json::Value::Null),
            incumbent: serde_json::to_value(&incumbent).unwrap_or(serde_json::Value::Null),
            challenger_outcome: None,
            incumbent_outcome: None,
            winner: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        let record_id = record.id.clone();
        state.create_ab_record(record).await?;
        info!(record_id = %record_id, challenger = %challenger.agent_id, incumbent = %incumbent.agent_id, "Shadow run scheduled");
        Ok(Self {
            record_id,
            challenger,
            incumbent,
        })
    }

    /// Settle the comparison with the evaluator's verdict and feed the
    /// winner a win (and the loser a loss) so selection shifts
    pub async fn settle(
        &self,
        state: &StateManager,
        challenger_passed: bool,
        incumbent_passed: bool,
        winner_is_challenger: bool,
    ) -> Result<(), StateError> {
        let winner = if winner_is_challenger { "challenger" } else { "incumbent" };
        state
            .settle_ab_record(
                &self.record_id,
                if challenger_passed { "pass" } else { "fail" },
                if incumbent_passed { "pass" } else { "fail" },
                winner,
            )
            .await?;

        let (winner_key, loser_key) = if winner_is_challenger {
            (&self.challenger, &self.incumbent)
        } else {
            (&self.incumbent, &self.challenger)
        };
        state.update_team_fitness(winner_key.clone(), true).await?;
        state.update_team_fitness(loser_key.clone(), false).await?;
        info!(record_id = %self.record_id, winner, "Shadow run settled");
        Ok(())
    }
}
