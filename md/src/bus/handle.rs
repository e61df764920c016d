//! BusHandle - cloneable client side of the bus actor

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use crate::domain::BusMessage;

use super::core::{BusError, BusRequest};

/// Handle for publishing, receiving and listening
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<BusRequest>,
}

impl BusHandle {
    pub(super) fn new(tx: mpsc::Sender<BusRequest>) -> Self {
        Self { tx }
    }

    /// Register a recipient inbox
    pub async fn register(&self, agent_id: &str) -> Result<(), BusError> {
        self.tx
            .send(BusRequest::Register {
                agent_id: agent_id.to_string(),
            })
            .await
            .map_err(|_| BusError::ChannelError)
    }

    /// Remove a recipient inbox
    pub async fn unregister(&self, agent_id: &str) -> Result<(), BusError> {
        self.tx
            .send(BusRequest::Unregister {
                agent_id: agent_id.to_string(),
            })
            .await
            .map_err(|_| BusError::ChannelError)
    }

    /// Publish a message; resolves once it is queued for all recipients
    pub async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(BusRequest::Publish { message, reply })
            .await
            .map_err(|_| BusError::ChannelError)?;
        reply_rx.await.map_err(|_| BusError::ChannelError)?
    }

    /// Receive the next message, blocking up to `idle_timeout`
    ///
    /// Ok(None) means the idle timeout elapsed with an empty inbox;
    /// Err(Closed) is the terminal signal.
    pub async fn recv(&self, agent_id: &str, idle_timeout: Duration) -> Result<Option<BusMessage>, BusError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(BusRequest::Recv {
                agent_id: agent_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| BusError::ChannelError)?;

        match tokio::time::timeout(idle_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => {
                debug!(agent_id, "recv idle timeout");
                Ok(None)
            }
        }
    }

    /// Attach a read-only live listener with the given lag cutoff
    pub async fn attach_listener(&self, lag_cutoff: u32) -> Result<LiveListener, BusError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(BusRequest::AttachListener { reply })
            .await
            .map_err(|_| BusError::ChannelError)?;
        let rx = reply_rx.await.map_err(|_| BusError::ChannelError)?;
        Ok(LiveListener {
            rx,
            lagged_ticks: 0,
            lag_cutoff,
        })
    }

    /// Close the bus: drain, terminal-signal waiters, refuse new publishes
    pub async fn close(&self) -> Result<(), BusError> {
        self.tx.send(BusRequest::Close).await.map_err(|_| BusError::ChannelError)
    }
}

/// A read-only multiplexer over the public message flow
///
/// A listener that lags behind accumulates skipped ticks; past the cutoff it
/// is cut off (`next` returns None) rather than ever slowing the bus down.
pub struct LiveListener {
    rx: broadcast::Receiver<BusMessage>,
    lagged_ticks: u32,
    lag_cutoff: u32,
}

impl LiveListener {
    /// Next public message; None when the bus closed or this listener was
    /// cut off for lagging
    pub async fn next(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.lagged_ticks += 1;
                    debug!(skipped, ticks = self.lagged_ticks, "Live listener lagging");
                    if self.lagged_ticks >= self.lag_cutoff {
                        return None;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::domain::{MessageKind, Recipients};

    #[tokio::test]
    async fn test_listener_cutoff_after_lag() {
        let bus = MessageBus::new(100);
        let handle = bus.handle();
        let bus_task = tokio::spawn(bus.run());

        handle.register("a").await.unwrap();
        // Cutoff of 1: the first lag tick terminates the listener
        let mut listener = handle.attach_listener(1).await.unwrap();

        // Overrun the broadcast buffer (1024) without the listener reading
        for i in 0..1200 {
            let message = BusMessage::new(
                "s",
                Recipients::One("a".into()),
                MessageKind::Inform,
                serde_json::json!({ "i": i }),
            );
            handle.publish(message).await.unwrap();
        }

        // First recv observes the lag and the listener cuts itself off
        assert!(listener.next().await.is_none());

        handle.close().await.unwrap();
        bus_task.await.unwrap();
    }
}
