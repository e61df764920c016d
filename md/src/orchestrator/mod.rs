//! Mission orchestrator: admission, the phase loop, recovery, the API
//!
//! The orchestrator is the application root: it owns the registries, the
//! admission gate and the per-mission cancellation tokens, and drives every
//! phase strictly in sequence. A mission is never in two phases at once,
//! and the admission slot is never held across a human pause.

mod admission;
mod api;
mod core;
mod recovery;
mod retro;

pub use admission::Admission;
pub use api::{MissionView, OrchestratorError};
pub use core::Orchestrator;
pub use recovery::RecoveryStats;
