//! Adversarial guard: two-stage veto cascade
//!
//! L0 scores a turn against a deterministic catalogue (no LLM); L1 is one
//! semantic review call, only for execution-flavored patterns. Rejection is
//! a recorded verdict and a fitness signal, never a retry loop.

mod l0;
mod l1;

pub use l0::{DeterministicGuard, Family, FamilyHit, GuardDecision, GuardReport, TurnView};
pub use l1::{SemanticReviewer, SemanticVerdict};
