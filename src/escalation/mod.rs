//! Escalation Manager.
//!
//! Converts a confidence score plus static safety rules into one of four
//! autonomy tiers, keeping an append-only audit history and aggregate
//! statistics. All decisions are deterministic; no I/O on the check path.

pub mod manager;
pub mod tier;

pub use manager::{
    EscalationConfig, EscalationDecision, EscalationManager, EscalationReason, EscalationRecord,
    EscalationStats, HumanDecision,
};
pub use tier::EscalationTier;
