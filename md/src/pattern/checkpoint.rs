//! Human-in-the-loop topology
//!
//! The agent set runs like a sequential chain; when it finishes, the engine
//! persists a pending checkpoint, emits the approval-pending event and
//! returns. The mission resumes only on an external acknowledgment through
//! the mission API.

use tracing::info;

use crate::events::CoreEvent;

use super::runner::{PatternEngine, RunCtx};

impl PatternEngine {
    pub(super) async fn drive_checkpoint(&self, ctx: &RunCtx<'_>) -> eyre::Result<(Option<String>, Option<String>)> {
        let output = self.drive_sequential(ctx).await?;

        let checkpoint = missionstore::CheckpointRow {
            id: crate::domain::generate_id("checkpoint", &ctx.phase.phase_name),
            mission_id: ctx.phase.mission_id.clone(),
            phase_index: 0,
            status: "pending".to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
            resolved_at: None,
        };
        let checkpoint_id = checkpoint.id.clone();
        self.state
            .create_checkpoint(checkpoint)
            .await
            .map_err(|e| eyre::eyre!("Failed to persist checkpoint: {}", e))?;

        self.events
            .emit(CoreEvent::CheckpointPending {
                mission_id: ctx.phase.mission_id.clone(),
                checkpoint_id: checkpoint_id.clone(),
                phase_index: 0,
            })
            .await;

        info!(checkpoint_id = %checkpoint_id, "Pattern paused on human checkpoint");
        Ok((output, Some(checkpoint_id)))
    }
}
