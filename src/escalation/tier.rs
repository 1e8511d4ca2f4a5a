//! Autonomy tiers, ordered by permissiveness.

use serde::{Deserialize, Serialize};

/// How much supervision a task execution requires.
///
/// The derived `Ord` runs from least to most permissive, so
/// `Blocked < ApprovalRequired < Suggest < Autonomous`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTier {
    /// Must not execute.
    Blocked,
    /// Waits for explicit human approval.
    ApprovalRequired,
    /// May execute, but the decision is flagged for review.
    Suggest,
    /// May execute unsupervised.
    Autonomous,
}

impl EscalationTier {
    /// Whether this tier permits execution without a human in the loop.
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Autonomous | Self::Suggest)
    }
}

impl std::fmt::Display for EscalationTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Autonomous => write!(f, "autonomous"),
            Self::Suggest => write!(f, "suggest"),
            Self::ApprovalRequired => write!(f, "approval-required"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}
