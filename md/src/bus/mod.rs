//! Message bus: typed in-process pub/sub with priority inboxes
//!
//! One actor owns every inbox; agents hold a [`BusHandle`] and block on
//! `recv` up to an idle timeout. Vetoes (priority 10) overtake everything
//! else queued for the same recipient. Overflow drops the oldest
//! lowest-priority message into the dead-letter log. Live listeners are
//! read-only broadcast taps with a lag cutoff so a slow consumer can never
//! block the bus.

mod core;
mod handle;
mod inbox;

pub use core::{BusError, MessageBus};
pub use handle::{BusHandle, LiveListener};
pub use inbox::Inbox;
