//! Core task and completion payload types.
//!
//! `CompletionSignal` is wire-exact: agents on the other side of the signal
//! channel emit camelCase JSON, so the serde renames here are load-bearing.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of work with an id, duration estimate, and dependency set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within a working set.
    pub id: String,
    /// Free-text title, also used by the dependency classifier.
    pub title: String,
    /// Ids of tasks this task declares a dependency on.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Estimated duration in hours (>= 0).
    #[serde(default)]
    pub estimated_hours: f64,
    /// Heuristic-only metadata; the scheduler never acts on it directly.
    #[serde(default)]
    pub metadata: TaskMetadata,
}

/// Metadata consumed only by dependency inference heuristics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Files this task is expected to touch.
    #[serde(default)]
    pub files: Vec<String>,
    /// Owning agent class (e.g. "backend", "frontend").
    #[serde(default)]
    pub agent_type: Option<String>,
}

impl Task {
    /// Convenience constructor for tests and plan builders.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            depends_on: Vec::new(),
            estimated_hours: 0.0,
            metadata: TaskMetadata::default(),
        }
    }

    /// Builder-style dependency declaration.
    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Builder-style duration estimate.
    pub fn hours(mut self, hours: f64) -> Self {
        self.estimated_hours = hours;
        self
    }

    /// Builder-style file list.
    pub fn files(mut self, files: &[&str]) -> Self {
        self.metadata.files = files.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Terminal status a worker reports for its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Success,
    Failed,
    Blocked,
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// The one message a worker emits when it finishes.
///
/// Field names follow the agreed wire format exactly; `timestamp` is epoch
/// milliseconds as emitted by the worker side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSignal {
    pub task_id: String,
    pub agent_type: String,
    pub status: SignalStatus,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub design_decisions: Vec<String>,
    #[serde(default)]
    pub next_stages: Vec<String>,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompletionSignal {
    /// Build a success signal stamped with the current time.
    pub fn success(task_id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent_type: agent_type.into(),
            status: SignalStatus::Success,
            files_changed: Vec::new(),
            design_decisions: Vec::new(),
            next_stages: Vec::new(),
            timestamp: Utc::now().timestamp_millis(),
            error: None,
        }
    }

    /// Build a failure signal stamped with the current time.
    pub fn failed(
        task_id: impl Into<String>,
        agent_type: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: SignalStatus::Failed,
            error: Some(error.into()),
            ..Self::success(task_id, agent_type)
        }
    }

    /// Signal timestamp as a `DateTime<Utc>`, if representable.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

/// Handle to a running, isolated worker.
///
/// Opaque to the core beyond addressing and the spawn timestamp used for
/// duration accounting. What it physically represents (terminal, subprocess,
/// container) is the provider's business.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHandle {
    /// Unique handle id.
    pub id: String,
    /// Task this worker is executing.
    pub task_id: String,
    /// Agent class the provider assigned.
    pub agent_type: String,
    /// When the worker was spawned.
    pub spawned_at: DateTime<Utc>,
}

impl AgentHandle {
    pub fn new(task_id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            agent_type: agent_type.into(),
            spawned_at: Utc::now(),
        }
    }
}

/// Normalized outcome of one task, produced exactly once by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub agent_type: String,
    pub success: bool,
    pub error: Option<String>,
    /// Signal timestamp minus spawn timestamp, clamped at zero.
    pub duration_ms: i64,
    pub files_changed: Vec<String>,
    pub decision_notes: Vec<String>,
    pub completed_at: DateTime<Utc>,
}
