//! Resume on restart
//!
//! At boot the orchestrator enumerates every mission in `running` or
//! `paused` and re-admits it. Running missions restart from the persisted
//! cursor, at sprint 1 of the current phase: pattern state is not
//! resumable by itself, the gate is the checkpoint. Paused missions stay
//! parked; their pending checkpoints are what unblocks them.

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::MissionStatus;

use super::api::OrchestratorError;
use super::core::Orchestrator;

/// What a boot-time recovery scan found and did
#[derive(Debug, Default)]
pub struct RecoveryStats {
    /// Missions restarted from their cursor
    pub resumed: usize,
    /// Paused missions left awaiting a human
    pub still_paused: usize,
    /// Pending checkpoints across recovered missions
    pub pending_checkpoints: usize,
}

impl std::fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "resumed: {}, still paused: {}, pending checkpoints: {}",
            self.resumed, self.still_paused, self.pending_checkpoints
        )
    }
}

impl Orchestrator {
    /// Scan for recoverable missions and re-admit them
    pub async fn recover(self: &Arc<Self>) -> Result<RecoveryStats, OrchestratorError> {
        let mut stats = RecoveryStats::default();

        let running = self
            .state
            .list_missions(Some(MissionStatus::Running.as_str().to_string()), 1000, 0)
            .await?;
        for row in running {
            // In-flight phases restart from sprint 1 of the current phase
            self.state
                .advance_cursor(
                    &row.id,
                    row.phase_index,
                    1,
                    "mission.recovered",
                    serde_json::json!({ "phase": row.phase_index }),
                )
                .await?;
            debug!(mission_id = %row.id, phase = row.phase_index, "Re-admitting crashed mission");
            self.start_mission(&row.id);
            stats.resumed += 1;
        }

        let paused = self
            .state
            .list_missions(Some(MissionStatus::Paused.as_str().to_string()), 1000, 0)
            .await?;
        for row in paused {
            let pending = self.state.pending_checkpoints(&row.id).await?;
            stats.pending_checkpoints += pending.len();
            stats.still_paused += 1;
            debug!(mission_id = %row.id, pending = pending.len(), "Paused mission awaits a human");
        }

        if stats.resumed > 0 || stats.still_paused > 0 {
            info!(%stats, "Recovery complete");
        } else {
            debug!("Recovery scan found nothing to do");
        }
        Ok(stats)
    }
}
