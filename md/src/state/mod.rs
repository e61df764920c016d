//! State management: a channel actor owning the mission store
//!
//! One task owns the `missionstore::Store`; everything else holds a cloneable
//! [`StateManager`] handle and talks through typed commands. This is what
//! serializes writes and keeps SQLite access off the async executors.

mod manager;
mod messages;

pub use manager::StateManager;
pub use messages::{StateCommand, StateError, StateResponse};
