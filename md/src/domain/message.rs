//! Bus message types

use serde::{Deserialize, Serialize};

/// Vetoes always ride at the top priority
pub const VETO_PRIORITY: u8 = 10;

/// Message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
    Inform,
    Delegate,
    Review,
    Veto,
    Approve,
    Negotiate,
    Escalate,
    System,
}

impl MessageKind {
    /// Default delivery priority for the kind; vetoes pin to 10
    pub fn default_priority(&self) -> u8 {
        match self {
            MessageKind::Veto => VETO_PRIORITY,
            MessageKind::Escalate => 8,
            MessageKind::System => 7,
            MessageKind::Approve => 6,
            MessageKind::Review => 5,
            MessageKind::Request | MessageKind::Response => 4,
            MessageKind::Delegate | MessageKind::Negotiate => 3,
            MessageKind::Inform => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Inform => "inform",
            MessageKind::Delegate => "delegate",
            MessageKind::Review => "review",
            MessageKind::Veto => "veto",
            MessageKind::Approve => "approve",
            MessageKind::Negotiate => "negotiate",
            MessageKind::Escalate => "escalate",
            MessageKind::System => "system",
        }
    }
}

/// Who receives a message
///
/// A broadcast stays one message with an expanded recipient set, never N
/// copies; the bus fans it out at delivery time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
    Broadcast,
}

impl Recipients {
    /// Resolve to concrete recipient ids given the currently registered set
    pub fn resolve(&self, registered: &[String]) -> Vec<String> {
        match self {
            Recipients::One(id) => vec![id.clone()],
            Recipients::Many(ids) => ids.clone(),
            Recipients::Broadcast => registered.to_vec(),
        }
    }
}

/// A message on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: String,
    pub sender: String,
    pub recipients: Recipients,
    pub kind: MessageKind,
    /// 0..10; clamped on construction
    pub priority: u8,
    pub body: serde_json::Value,
    /// Causal parent message id
    pub parent_id: Option<String>,
    pub created_at: i64,
}

impl BusMessage {
    pub fn new(sender: impl Into<String>, recipients: Recipients, kind: MessageKind, body: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            sender: sender.into(),
            recipients,
            kind,
            priority: kind.default_priority(),
            body,
            parent_id: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        // Vetoes stay at 10 no matter what the caller asks for
        self.priority = if self.kind == MessageKind::Veto {
            VETO_PRIORITY
        } else {
            priority.min(VETO_PRIORITY)
        };
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn is_veto(&self) -> bool {
        self.kind == MessageKind::Veto
    }
}
