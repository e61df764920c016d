//! The bus actor

use std::collections::{HashMap, VecDeque};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::BusMessage;
use crate::state::StateManager;

use super::handle::BusHandle;
use super::inbox::Inbox;

/// Bus errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("Bus is closed")]
    Closed,

    #[error("Bus channel error")]
    ChannelError,
}

pub(super) enum BusRequest {
    Register {
        agent_id: String,
    },
    Unregister {
        agent_id: String,
    },
    Publish {
        message: BusMessage,
        reply: oneshot::Sender<Result<(), BusError>>,
    },
    Recv {
        agent_id: String,
        reply: oneshot::Sender<Result<Option<BusMessage>, BusError>>,
    },
    AttachListener {
        reply: oneshot::Sender<broadcast::Receiver<BusMessage>>,
    },
    Close,
}

/// The message bus actor
///
/// Owns every inbox; consumed by [`MessageBus::run`]. Optionally mirrors
/// published messages and dead letters into the store.
pub struct MessageBus {
    tx: mpsc::Sender<BusRequest>,
    rx: mpsc::Receiver<BusRequest>,
    inbox_capacity: usize,
    listener_capacity: usize,
    state: Option<StateManager>,
}

impl MessageBus {
    pub fn new(inbox_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        Self {
            tx,
            rx,
            inbox_capacity,
            listener_capacity: 1024,
            state: None,
        }
    }

    /// Mirror messages and dead letters into the store
    pub fn with_state(mut self, state: StateManager) -> Self {
        self.state = Some(state);
        self
    }

    /// Create a handle before consuming the bus with `run`
    pub fn handle(&self) -> BusHandle {
        BusHandle::new(self.tx.clone())
    }

    /// Run the bus actor until closed
    pub async fn run(mut self) {
        let mut inboxes: HashMap<String, Inbox> = HashMap::new();
        let mut waiters: HashMap<String, VecDeque<oneshot::Sender<Result<Option<BusMessage>, BusError>>>> =
            HashMap::new();
        let (listener_tx, _) = broadcast::channel(self.listener_capacity);
        let mut closed = false;

        info!("Message bus started");

        while let Some(request) = self.rx.recv().await {
            match request {
                BusRequest::Register { agent_id } => {
                    debug!(%agent_id, "Registering inbox");
                    inboxes.entry(agent_id).or_insert_with(|| Inbox::new(self.inbox_capacity));
                }

                BusRequest::Unregister { agent_id } => {
                    debug!(%agent_id, "Unregistering inbox");
                    inboxes.remove(&agent_id);
                    waiters.remove(&agent_id);
                }

                BusRequest::Publish { message, reply } => {
                    if closed {
                        let _ = reply.send(Err(BusError::Closed));
                        continue;
                    }

                    let registered: Vec<String> = inboxes.keys().cloned().collect();
                    let recipients = message.recipients.resolve(&registered);

                    // Live listeners see every public message
                    let _ = listener_tx.send(message.clone());

                    if let Some(state) = &self.state {
                        let row = missionstore::MessageRow {
                            id: message.id.clone(),
                            sender: message.sender.clone(),
                            recipients: recipients.clone(),
                            kind: message.kind.as_str().to_string(),
                            priority: message.priority as i64,
                            body: message.body.clone(),
                            parent_id: message.parent_id.clone(),
                            created_at: message.created_at,
                        };
                        if let Err(e) = state.record_message(row).await {
                            warn!(error = %e, "Failed to mirror message into store");
                        }
                    }

                    for recipient in recipients {
                        deliver(
                            &mut inboxes,
                            &mut waiters,
                            self.state.as_ref(),
                            &recipient,
                            message.clone(),
                        )
                        .await;
                    }

                    let _ = reply.send(Ok(()));
                }

                BusRequest::Recv { agent_id, reply } => {
                    if closed {
                        let _ = reply.send(Err(BusError::Closed));
                        continue;
                    }
                    match inboxes.get_mut(&agent_id) {
                        Some(inbox) if !inbox.is_empty() => {
                            let _ = reply.send(Ok(inbox.pop()));
                        }
                        Some(_) => {
                            waiters.entry(agent_id).or_default().push_back(reply);
                        }
                        None => {
                            // Unregistered recipients never block
                            let _ = reply.send(Ok(None));
                        }
                    }
                }

                BusRequest::AttachListener { reply } => {
                    let _ = reply.send(listener_tx.subscribe());
                }

                BusRequest::Close => {
                    info!("Message bus closing");
                    closed = true;

                    // Drain pending messages to whoever is already waiting,
                    // then send the terminal signal to every parked waiter.
                    for (agent_id, queue) in waiters.iter_mut() {
                        while let Some(waiter) = queue.pop_front() {
                            let pending = inboxes.get_mut(agent_id).and_then(|inbox| inbox.pop());
                            let _ = waiter.send(match pending {
                                Some(message) => Ok(Some(message)),
                                None => Err(BusError::Closed),
                            });
                        }
                    }
                    waiters.clear();
                    break;
                }
            }
        }

        info!("Message bus stopped");
    }
}

async fn deliver(
    inboxes: &mut HashMap<String, Inbox>,
    waiters: &mut HashMap<String, VecDeque<oneshot::Sender<Result<Option<BusMessage>, BusError>>>>,
    state: Option<&StateManager>,
    recipient: &str,
    message: BusMessage,
) {
    let Some(inbox) = inboxes.get_mut(recipient) else {
        if let Some(state) = state
            && let Err(e) = state
                .record_dead_letter(
                    recipient,
                    serde_json::to_value(&message).unwrap_or(serde_json::Value::Null),
                    "unknown recipient",
                )
                .await
        {
            warn!(error = %e, "Failed to record dead letter");
        }
        return;
    };

    // A parked waiter means the inbox is empty; hand the message over
    // directly. Dropped waiters (recv timeouts) are skipped.
    if let Some(queue) = waiters.get_mut(recipient) {
        while let Some(waiter) = queue.pop_front() {
            if waiter.send(Ok(Some(message.clone()))).is_ok() {
                return;
            }
        }
    }

    if let Some(dropped) = inbox.push(message) {
        warn!(recipient, dropped_id = %dropped.id, "Inbox overflow, dead-lettering oldest lowest-priority");
        if let Some(state) = state
            && let Err(e) = state
                .record_dead_letter(
                    recipient,
                    serde_json::to_value(&dropped).unwrap_or(serde_json::Value::Null),
                    "inbox overflow",
                )
                .await
        {
            warn!(error = %e, "Failed to record dead letter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageKind, Recipients};
    use std::time::Duration;

    fn msg(to: &str, kind: MessageKind, tag: &str) -> BusMessage {
        BusMessage::new(
            "sender",
            Recipients::One(to.into()),
            kind,
            serde_json::json!({"tag": tag}),
        )
    }

    #[tokio::test]
    async fn test_publish_then_recv() {
        let bus = MessageBus::new(100);
        let handle = bus.handle();
        let bus_task = tokio::spawn(bus.run());

        handle.register("qa-bob").await.unwrap();
        handle.publish(msg("qa-bob", MessageKind::Review, "please review")).await.unwrap();

        let received = handle.recv("qa-bob", Duration::from_millis(500)).await.unwrap().unwrap();
        assert_eq!(received.body["tag"], "please review");

        handle.close().await.unwrap();
        bus_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_veto_delivered_first() {
        let bus = MessageBus::new(100);
        let handle = bus.handle();
        let bus_task = tokio::spawn(bus.run());

        handle.register("orch").await.unwrap();
        handle.publish(msg("orch", MessageKind::Inform, "fyi")).await.unwrap();
        handle.publish(msg("orch", MessageKind::Veto, "stop")).await.unwrap();

        let first = handle.recv("orch", Duration::from_millis(500)).await.unwrap().unwrap();
        assert_eq!(first.kind, MessageKind::Veto);
        let second = handle.recv("orch", Duration::from_millis(500)).await.unwrap().unwrap();
        assert_eq!(second.kind, MessageKind::Inform);

        handle.close().await.unwrap();
        bus_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_blocking_recv_wakes_on_publish() {
        let bus = MessageBus::new(100);
        let handle = bus.handle();
        let bus_task = tokio::spawn(bus.run());

        handle.register("dev-alice").await.unwrap();

        let recv_handle = handle.clone();
        let receiver = tokio::spawn(async move {
            recv_handle.recv("dev-alice", Duration::from_secs(5)).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.publish(msg("dev-alice", MessageKind::Request, "work")).await.unwrap();

        let received = receiver.await.unwrap().unwrap().unwrap();
        assert_eq!(received.body["tag"], "work");

        handle.close().await.unwrap();
        bus_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_idle_timeout_returns_none() {
        let bus = MessageBus::new(100);
        let handle = bus.handle();
        let bus_task = tokio::spawn(bus.run());

        handle.register("idle-agent").await.unwrap();
        let received = handle.recv("idle-agent", Duration::from_millis(50)).await.unwrap();
        assert!(received.is_none());

        handle.close().await.unwrap();
        bus_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_is_one_message_fanned_out() {
        let bus = MessageBus::new(100);
        let handle = bus.handle();
        let bus_task = tokio::spawn(bus.run());

        handle.register("a").await.unwrap();
        handle.register("b").await.unwrap();

        let broadcast = BusMessage::new("orch", Recipients::Broadcast, MessageKind::System, serde_json::json!({}));
        let id = broadcast.id.clone();
        handle.publish(broadcast).await.unwrap();

        let a = handle.recv("a", Duration::from_millis(500)).await.unwrap().unwrap();
        let b = handle.recv("b", Duration::from_millis(500)).await.unwrap().unwrap();
        assert_eq!(a.id, id);
        assert_eq!(b.id, id);

        handle.close().await.unwrap();
        bus_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_bus_refuses_publish() {
        let bus = MessageBus::new(100);
        let handle = bus.handle();
        let bus_task = tokio::spawn(bus.run());

        handle.register("a").await.unwrap();
        handle.close().await.unwrap();
        bus_task.await.unwrap();

        let err = handle.publish(msg("a", MessageKind::Inform, "late")).await.unwrap_err();
        assert!(matches!(err, BusError::Closed | BusError::ChannelError));
    }

    #[tokio::test]
    async fn test_live_listener_sees_messages() {
        let bus = MessageBus::new(100);
        let handle = bus.handle();
        let bus_task = tokio::spawn(bus.run());

        handle.register("a").await.unwrap();
        let mut listener = handle.attach_listener(8).await.unwrap();

        handle.publish(msg("a", MessageKind::Inform, "observed")).await.unwrap();

        let seen = listener.next().await.unwrap();
        assert_eq!(seen.body["tag"], "observed");

        handle.close().await.unwrap();
        bus_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_overflow_dead_letters_into_store() {
        let state = StateManager::spawn_in_memory().unwrap();
        let bus = MessageBus::new(2).with_state(state.clone());
        let handle = bus.handle();
        let bus_task = tokio::spawn(bus.run());

        handle.register("tiny").await.unwrap();
        for i in 0..3 {
            handle
                .publish(msg("tiny", MessageKind::Inform, &format!("m{}", i)))
                .await
                .unwrap();
        }

        // Give the mirror writes a moment to land
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.close().await.unwrap();
        bus_task.await.unwrap();
        state.shutdown().await.unwrap();
    }
}
