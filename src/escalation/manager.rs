//! Confidence-threshold state machine with audit history.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::escalation::tier::EscalationTier;

/// Escalation policy configuration.
///
/// Thresholds are ascending cut points in [0, 1]:
/// `approval_threshold <= suggest_threshold <= autonomous_threshold`.
/// Pattern lists are matched case-insensitively as substrings of a task's
/// action description and override confidence entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// At or above this, execution is fully autonomous.
    pub autonomous_threshold: f64,
    /// At or above this, execution proceeds but is flagged for review.
    pub suggest_threshold: f64,
    /// At or above this, execution waits for approval; below it, blocked.
    pub approval_threshold: f64,
    /// Actions matching any of these always require approval.
    #[serde(default)]
    pub always_require_approval: Vec<String>,
    /// Actions matching any of these are always blocked.
    #[serde(default)]
    pub always_block: Vec<String>,
    /// Audit history bound; oldest records are evicted past this.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_max_history() -> usize {
    1000
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            autonomous_threshold: 0.85,
            suggest_threshold: 0.70,
            approval_threshold: 0.50,
            always_require_approval: vec![
                "delete".to_string(),
                "drop table".to_string(),
                "migration".to_string(),
                "production".to_string(),
            ],
            always_block: vec![
                "rm -rf".to_string(),
                "force push".to_string(),
                "drop database".to_string(),
            ],
            max_history: default_max_history(),
        }
    }
}

/// Why an escalation record was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// Action matched an `always_block` pattern.
    BlockPattern { pattern: String },
    /// Action matched an `always_require_approval` pattern.
    ApprovalPattern { pattern: String },
    /// Confidence permits execution but sits below the autonomous bar.
    SuggestConfidence { confidence: f64, threshold: f64 },
    /// Confidence below the suggest bar; approval needed.
    ApprovalConfidence { confidence: f64, threshold: f64 },
    /// Confidence below the approval bar; blocked.
    BlockedConfidence { confidence: f64, threshold: f64 },
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlockPattern { pattern } => write!(f, "matched block pattern '{pattern}'"),
            Self::ApprovalPattern { pattern } => {
                write!(f, "matched approval pattern '{pattern}'")
            }
            Self::SuggestConfidence {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence:.2} below autonomous {threshold:.2}"),
            Self::ApprovalConfidence {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence:.2} below suggest {threshold:.2}"),
            Self::BlockedConfidence {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence:.2} below approval {threshold:.2}"),
        }
    }
}

/// Human decision attached to a record, at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanDecision {
    pub approved: bool,
    pub timestamp: DateTime<Utc>,
    pub notes: Option<String>,
}

/// One auditable escalation event. Immutable after creation except for the
/// single `decision` attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: String,
    pub tier: EscalationTier,
    pub task_id: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub reason: EscalationReason,
    pub explanation: String,
    #[serde(default)]
    pub recommended_patterns: Vec<String>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub estimated_impact: Option<String>,
    #[serde(default)]
    pub decision: Option<HumanDecision>,
}

/// Outcome of a single escalation check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub approved: bool,
    pub tier: EscalationTier,
    pub message: String,
    /// Present for every tier except Autonomous.
    pub record: Option<EscalationRecord>,
}

/// Aggregate counters over all checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationStats {
    pub total_checks: u64,
    pub tier_counts: HashMap<EscalationTier, u64>,
    pub average_confidence: f64,
    /// Fraction of decided ApprovalRequired records that were approved.
    pub approval_rate: Option<f64>,
}

struct Inner {
    config: EscalationConfig,
    history: VecDeque<EscalationRecord>,
    total_checks: u64,
    confidence_sum: f64,
    tier_counts: HashMap<EscalationTier, u64>,
    approval_rate: Option<f64>,
}

/// Stateful policy engine gating task execution on confidence.
///
/// Explicitly constructed and injected; hold it in an `Arc` to share across
/// concurrently executing tasks. The interior mutex gives the history and
/// counters the single-writer discipline they need.
pub struct EscalationManager {
    inner: Mutex<Inner>,
}

impl EscalationManager {
    /// Manager with default conservative thresholds.
    pub fn new() -> Self {
        Self::with_config(EscalationConfig::default())
    }

    /// Manager with an explicit config. Misordered thresholds are kept as
    /// given (the manager never silently relaxes them) but flagged loudly.
    pub fn with_config(config: EscalationConfig) -> Self {
        if config.approval_threshold > config.suggest_threshold
            || config.suggest_threshold > config.autonomous_threshold
        {
            warn!(
                approval = config.approval_threshold,
                suggest = config.suggest_threshold,
                autonomous = config.autonomous_threshold,
                "escalation thresholds are not ascending; checks will follow them as given"
            );
        }
        Self {
            inner: Mutex::new(Inner {
                config,
                history: VecDeque::new(),
                total_checks: 0,
                confidence_sum: 0.0,
                tier_counts: HashMap::new(),
                approval_rate: None,
            }),
        }
    }

    /// Gate one task execution.
    ///
    /// Safety patterns are consulted first and override confidence; then the
    /// three thresholds are compared in descending order, with `>=` so a
    /// boundary value lands in the more permissive tier. Every branch
    /// updates the running counters; every tier except Autonomous appends an
    /// audit record.
    pub fn check_escalation(
        &self,
        task_id: &str,
        agent_id: &str,
        confidence: f64,
        action_description: Option<&str>,
    ) -> EscalationDecision {
        let confidence = if (0.0..=1.0).contains(&confidence) {
            confidence
        } else {
            warn!(task_id, confidence, "confidence outside [0,1]; clamping");
            confidence.clamp(0.0, 1.0)
        };

        let mut inner = self.inner.lock().expect("escalation state poisoned");
        inner.total_checks += 1;
        inner.confidence_sum += confidence;

        let action = action_description.map(str::to_lowercase);

        if let Some(pattern) = matched_pattern(action.as_deref(), &inner.config.always_block) {
            let reason = EscalationReason::BlockPattern {
                pattern: pattern.clone(),
            };
            let message = format!("blocked: action matches safety pattern '{pattern}'");
            return inner.conclude(task_id, agent_id, confidence, EscalationTier::Blocked, reason, message);
        }

        if let Some(pattern) =
            matched_pattern(action.as_deref(), &inner.config.always_require_approval)
        {
            let reason = EscalationReason::ApprovalPattern {
                pattern: pattern.clone(),
            };
            let message = format!("approval required: action matches pattern '{pattern}'");
            return inner.conclude(
                task_id,
                agent_id,
                confidence,
                EscalationTier::ApprovalRequired,
                reason,
                message,
            );
        }

        if confidence >= inner.config.autonomous_threshold {
            *inner
                .tier_counts
                .entry(EscalationTier::Autonomous)
                .or_insert(0) += 1;
            let message = format!(
                "autonomous: confidence {confidence:.2} meets threshold {:.2}",
                inner.config.autonomous_threshold
            );
            debug!(task_id, agent_id, confidence, "escalation check: autonomous");
            return EscalationDecision {
                approved: true,
                tier: EscalationTier::Autonomous,
                message,
                record: None,
            };
        }

        if confidence >= inner.config.suggest_threshold {
            let threshold = inner.config.autonomous_threshold;
            let reason = EscalationReason::SuggestConfidence {
                confidence,
                threshold,
            };
            let message = format!(
                "suggest: confidence {confidence:.2} below autonomous threshold {threshold:.2}; proceeding flagged"
            );
            return inner.conclude(
                task_id,
                agent_id,
                confidence,
                EscalationTier::Suggest,
                reason,
                message,
            );
        }

        if confidence >= inner.config.approval_threshold {
            let threshold = inner.config.suggest_threshold;
            let reason = EscalationReason::ApprovalConfidence {
                confidence,
                threshold,
            };
            let message =
                format!("approval required: confidence {confidence:.2} below {threshold:.2}");
            return inner.conclude(
                task_id,
                agent_id,
                confidence,
                EscalationTier::ApprovalRequired,
                reason,
                message,
            );
        }

        let threshold = inner.config.approval_threshold;
        let reason = EscalationReason::BlockedConfidence {
            confidence,
            threshold,
        };
        let message = format!("blocked: confidence {confidence:.2} below {threshold:.2}");
        inner.conclude(
            task_id,
            agent_id,
            confidence,
            EscalationTier::Blocked,
            reason,
            message,
        )
    }

    /// Attach a human decision to a stored record.
    ///
    /// Unknown ids and already-decided records are no-ops with a warning:
    /// decisions may legitimately race history eviction in long-running
    /// processes. Returns whether the decision was attached.
    pub fn record_decision(&self, record_id: &str, approved: bool, notes: Option<String>) -> bool {
        let mut inner = self.inner.lock().expect("escalation state poisoned");

        let Some(record) = inner.history.iter_mut().find(|r| r.id == record_id) else {
            warn!(record_id, "record_decision: unknown escalation id; ignoring");
            return false;
        };
        if record.decision.is_some() {
            warn!(record_id, "record_decision: decision already attached; ignoring");
            return false;
        }

        record.decision = Some(HumanDecision {
            approved,
            timestamp: Utc::now(),
            notes,
        });
        info!(record_id, approved, "human decision recorded");

        // Rolling approval rate over decided ApprovalRequired records.
        let decided: Vec<bool> = inner
            .history
            .iter()
            .filter(|r| r.tier == EscalationTier::ApprovalRequired)
            .filter_map(|r| r.decision.as_ref().map(|d| d.approved))
            .collect();
        inner.approval_rate = if decided.is_empty() {
            None
        } else {
            let approved_count = decided.iter().filter(|a| **a).count();
            Some(approved_count as f64 / decided.len() as f64)
        };

        true
    }

    /// Aggregate statistics snapshot.
    pub fn stats(&self) -> EscalationStats {
        let inner = self.inner.lock().expect("escalation state poisoned");
        EscalationStats {
            total_checks: inner.total_checks,
            tier_counts: inner.tier_counts.clone(),
            average_confidence: if inner.total_checks > 0 {
                inner.confidence_sum / inner.total_checks as f64
            } else {
                0.0
            },
            approval_rate: inner.approval_rate,
        }
    }

    /// Full audit history, oldest first.
    pub fn history(&self) -> Vec<EscalationRecord> {
        let inner = self.inner.lock().expect("escalation state poisoned");
        inner.history.iter().cloned().collect()
    }
}

impl Default for EscalationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Record-producing terminal branch shared by every non-autonomous tier.
    fn conclude(
        &mut self,
        task_id: &str,
        agent_id: &str,
        confidence: f64,
        tier: EscalationTier,
        reason: EscalationReason,
        message: String,
    ) -> EscalationDecision {
        *self.tier_counts.entry(tier).or_insert(0) += 1;

        let record = EscalationRecord {
            id: Uuid::new_v4().to_string(),
            tier,
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
            confidence,
            explanation: reason.to_string(),
            reason,
            recommended_patterns: Vec::new(),
            risk_factors: Vec::new(),
            estimated_impact: None,
            decision: None,
        };

        info!(
            task_id,
            agent_id,
            confidence,
            tier = %tier,
            record_id = %record.id,
            "escalation check"
        );

        self.history.push_back(record.clone());
        while self.history.len() > self.config.max_history {
            self.history.pop_front();
        }

        EscalationDecision {
            approved: tier.is_approved(),
            tier,
            message,
            record: Some(record),
        }
    }
}

/// First pattern (lowercased) contained in the action description, if any.
fn matched_pattern(action: Option<&str>, patterns: &[String]) -> Option<String> {
    let action = action?;
    patterns
        .iter()
        .find(|p| action.contains(&p.to_lowercase()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(manager: &EscalationManager, confidence: f64) -> EscalationDecision {
        manager.check_escalation("task-1", "agent-1", confidence, None)
    }

    #[test]
    fn test_threshold_table() {
        let m = EscalationManager::new();

        let d = check(&m, 0.90);
        assert_eq!(d.tier, EscalationTier::Autonomous);
        assert!(d.approved);
        assert!(d.record.is_none());

        let d = check(&m, 0.75);
        assert_eq!(d.tier, EscalationTier::Suggest);
        assert!(d.approved);
        assert!(d.record.is_some(), "suggest must leave an audit record");

        let d = check(&m, 0.55);
        assert_eq!(d.tier, EscalationTier::ApprovalRequired);
        assert!(!d.approved);
        assert!(d.record.is_some());

        let d = check(&m, 0.30);
        assert_eq!(d.tier, EscalationTier::Blocked);
        assert!(!d.approved);
        assert!(d.record.is_some());
    }

    #[test]
    fn test_boundaries_resolve_to_more_permissive_tier() {
        let m = EscalationManager::new();
        assert_eq!(check(&m, 0.85).tier, EscalationTier::Autonomous);
        assert_eq!(check(&m, 0.70).tier, EscalationTier::Suggest);
        assert_eq!(check(&m, 0.50).tier, EscalationTier::ApprovalRequired);
    }

    #[test]
    fn test_block_pattern_overrides_confidence() {
        let config = EscalationConfig {
            always_block: vec!["drop table".to_string()],
            ..Default::default()
        };
        let m = EscalationManager::with_config(config);

        let d = m.check_escalation("t", "a", 0.99, Some("Run DROP TABLE users"));
        assert_eq!(d.tier, EscalationTier::Blocked);
        assert!(!d.approved);
        assert!(matches!(
            d.record.unwrap().reason,
            EscalationReason::BlockPattern { .. }
        ));
    }

    #[test]
    fn test_approval_pattern_overrides_confidence() {
        let m = EscalationManager::new();
        let d = m.check_escalation("t", "a", 0.95, Some("Apply migration to prod schema"));
        assert_eq!(d.tier, EscalationTier::ApprovalRequired);
        assert!(!d.approved);
    }

    #[test]
    fn test_counters_and_running_average() {
        let m = EscalationManager::new();
        check(&m, 0.90);
        check(&m, 0.30);

        let stats = m.stats();
        assert_eq!(stats.total_checks, 2);
        assert_eq!(stats.tier_counts[&EscalationTier::Autonomous], 1);
        assert_eq!(stats.tier_counts[&EscalationTier::Blocked], 1);
        assert!((stats.average_confidence - 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_record_decision_attaches_once() {
        let m = EscalationManager::new();
        let d = check(&m, 0.55);
        let id = d.record.unwrap().id;

        assert!(m.record_decision(&id, true, Some("looks safe".to_string())));
        // Second attempt is a no-op.
        assert!(!m.record_decision(&id, false, None));

        let history = m.history();
        let decision = history[0].decision.as_ref().unwrap();
        assert!(decision.approved);
        assert_eq!(decision.notes.as_deref(), Some("looks safe"));
    }

    #[test]
    fn test_record_decision_unknown_id_is_noop() {
        let m = EscalationManager::new();
        assert!(!m.record_decision("no-such-id", true, None));
    }

    #[test]
    fn test_approval_rate() {
        let m = EscalationManager::new();
        let a = check(&m, 0.55).record.unwrap().id;
        let b = check(&m, 0.60).record.unwrap().id;
        // A suggest record should not count toward the approval rate.
        let s = check(&m, 0.75).record.unwrap().id;

        m.record_decision(&a, true, None);
        m.record_decision(&b, false, None);
        m.record_decision(&s, true, None);

        let stats = m.stats();
        assert_eq!(stats.approval_rate, Some(0.5));
    }

    #[test]
    fn test_history_eviction() {
        let config = EscalationConfig {
            max_history: 2,
            ..Default::default()
        };
        let m = EscalationManager::with_config(config);
        let first = check(&m, 0.30).record.unwrap().id;
        check(&m, 0.31);
        check(&m, 0.32);

        assert_eq!(m.history().len(), 2);
        // Evicted record: decision becomes the documented no-op.
        assert!(!m.record_decision(&first, true, None));
    }

    #[test]
    fn test_parallel_instances_have_independent_histories() {
        let a = EscalationManager::new();
        let b = EscalationManager::new();
        check(&a, 0.30);
        assert_eq!(a.history().len(), 1);
        assert!(b.history().is_empty());
    }
}
