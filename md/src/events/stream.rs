//! EventStream - live broadcast mirrored into the journal
//!
//! The broadcast is lossy for laggards; the journal is not. Subscribers that
//! miss events replay them by `(mission_id, since_event_id)`.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::state::StateManager;

use super::CoreEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// The core event stream
pub struct EventStream {
    tx: broadcast::Sender<CoreEvent>,
    state: StateManager,
}

impl EventStream {
    pub fn new(state: StateManager) -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self { tx, state }
    }

    /// Journal the event and fan it out to live subscribers
    ///
    /// Returns the journal event id. Emission never fails the caller: a
    /// journal write error is logged and the broadcast still happens.
    pub async fn emit(&self, event: CoreEvent) -> i64 {
        let event_id = match self
            .state
            .append_journal(event.mission_id(), event.kind(), event.payload())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(kind = event.kind(), error = %e, "Failed to journal event");
                0
            }
        };
        debug!(kind = event.kind(), event_id, "Event emitted");
        let _ = self.tx.send(event);
        event_id
    }

    /// Broadcast without journaling, for transitions already journaled
    /// atomically with their cursor update
    pub fn broadcast_only(&self, event: CoreEvent) {
        debug!(kind = event.kind(), "Event broadcast (pre-journaled)");
        let _ = self.tx.send(event);
    }

    /// Subscribe to live events from this point on
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Replay journaled events for a mission after `since_event_id`
    pub async fn replay(
        &self,
        mission_id: &str,
        since_event_id: i64,
    ) -> Result<Vec<(i64, serde_json::Value)>, crate::state::StateError> {
        let rows = self.state.replay_journal(Some(mission_id), since_event_id).await?;
        Ok(rows.into_iter().map(|r| (r.event_id, r.payload)).collect())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
