//! Per-recipient bounded priority inbox

use std::collections::{BTreeMap, VecDeque};

use crate::domain::BusMessage;

/// A bounded inbox with per-priority FIFO sub-queues
///
/// Delivery order: highest priority first, FIFO within a priority. When full,
/// the oldest message of the lowest occupied priority is dropped and returned
/// so the caller can dead-letter it.
#[derive(Debug)]
pub struct Inbox {
    queues: BTreeMap<u8, VecDeque<BusMessage>>,
    len: usize,
    capacity: usize,
}

impl Inbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: BTreeMap::new(),
            len: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a message, returning a dropped message on overflow
    ///
    /// Overflow drops the oldest message of the lowest priority, counting
    /// the incoming message itself: a low-priority arrival at a full inbox
    /// of higher-priority traffic bounces instead of evicting better work.
    pub fn push(&mut self, message: BusMessage) -> Option<BusMessage> {
        let mut dropped = None;
        if self.len >= self.capacity {
            let lowest = self.queues.iter().find(|(_, q)| !q.is_empty()).map(|(p, _)| *p);
            if let Some(lowest) = lowest
                && message.priority < lowest
            {
                return Some(message);
            }
            dropped = self.drop_oldest_lowest();
        }
        self.queues.entry(message.priority).or_default().push_back(message);
        self.len += 1;
        dropped
    }

    /// Take the next message: highest priority, FIFO within priority
    pub fn pop(&mut self) -> Option<BusMessage> {
        let (&priority, _) = self.queues.iter().rev().find(|(_, q)| !q.is_empty())?;
        let queue = self.queues.get_mut(&priority)?;
        let message = queue.pop_front();
        if message.is_some() {
            self.len -= 1;
        }
        if queue.is_empty() {
            self.queues.remove(&priority);
        }
        message
    }

    /// Drain everything, delivery order preserved
    pub fn drain(&mut self) -> Vec<BusMessage> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(message) = self.pop() {
            out.push(message);
        }
        out
    }

    fn drop_oldest_lowest(&mut self) -> Option<BusMessage> {
        let (&priority, _) = self.queues.iter().find(|(_, q)| !q.is_empty())?;
        let queue = self.queues.get_mut(&priority)?;
        let dropped = queue.pop_front();
        if dropped.is_some() {
            self.len -= 1;
        }
        if queue.is_empty() {
            self.queues.remove(&priority);
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageKind, Recipients};

    fn msg(kind: MessageKind, priority: u8, tag: &str) -> BusMessage {
        BusMessage::new(
            "sender",
            Recipients::One("r".into()),
            kind,
            serde_json::json!({"tag": tag}),
        )
        .with_priority(priority)
    }

    #[test]
    fn test_priority_overtakes_fifo_within() {
        let mut inbox = Inbox::new(10);
        inbox.push(msg(MessageKind::Inform, 1, "low-a"));
        inbox.push(msg(MessageKind::Inform, 1, "low-b"));
        inbox.push(msg(MessageKind::Veto, 10, "veto"));

        assert_eq!(inbox.pop().unwrap().body["tag"], "veto");
        assert_eq!(inbox.pop().unwrap().body["tag"], "low-a");
        assert_eq!(inbox.pop().unwrap().body["tag"], "low-b");
        assert!(inbox.pop().is_none());
    }

    #[test]
    fn test_overflow_drops_oldest_lowest() {
        let mut inbox = Inbox::new(2);
        inbox.push(msg(MessageKind::Inform, 1, "old-low"));
        inbox.push(msg(MessageKind::Review, 5, "review"));

        let dropped = inbox.push(msg(MessageKind::Veto, 10, "veto")).unwrap();
        assert_eq!(dropped.body["tag"], "old-low");
        assert_eq!(inbox.len(), 2);

        // Remaining delivery order: veto, then review
        assert_eq!(inbox.pop().unwrap().body["tag"], "veto");
        assert_eq!(inbox.pop().unwrap().body["tag"], "review");
    }

    #[test]
    fn test_low_priority_arrival_bounces_off_full_inbox() {
        let mut inbox = Inbox::new(2);
        inbox.push(msg(MessageKind::Veto, 10, "veto-a"));
        inbox.push(msg(MessageKind::Escalate, 8, "escalate"));

        // The arrival is the lowest priority present; it is the drop
        let dropped = inbox.push(msg(MessageKind::Inform, 1, "late-gossip")).unwrap();
        assert_eq!(dropped.body["tag"], "late-gossip");
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox.pop().unwrap().body["tag"], "veto-a");
    }

    #[test]
    fn test_drain_preserves_order() {
        let mut inbox = Inbox::new(10);
        inbox.push(msg(MessageKind::Inform, 1, "a"));
        inbox.push(msg(MessageKind::Escalate, 8, "b"));
        inbox.push(msg(MessageKind::Inform, 1, "c"));

        let drained = inbox.drain();
        let tags: Vec<_> = drained.iter().map(|m| m.body["tag"].as_str().unwrap().to_string()).collect();
        assert_eq!(tags, vec!["b", "a", "c"]);
        assert!(inbox.is_empty());
    }
}
