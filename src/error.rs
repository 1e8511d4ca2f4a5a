//! Error taxonomy shared across the crate.
//!
//! Three classes matter to callers: graph errors abort resolution, signal
//! validation errors mean the plumbing is broken (distinct from a worker
//! reporting its own failure), and monitor errors cover timeouts and channel
//! loss. Cycle diagnostics are values, not errors; see `graph::resolver`.

use std::time::Duration;
use thiserror::Error;

/// Fatal errors from dependency resolution.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// A task declares a dependency on an id that is not in the working set.
    #[error("task '{task_id}' depends on unknown task '{dependency}'")]
    UnknownDependency { task_id: String, dependency: String },

    /// Duplicate task ids violate the working-set invariant.
    #[error("duplicate task id '{task_id}' in working set")]
    DuplicateTaskId { task_id: String },
}

/// A completion signal that fails structural or identity validation.
#[derive(Debug, Clone, Error)]
pub enum SignalError {
    /// The payload's task id does not match the awaited task id.
    #[error("signal task id '{got}' does not match awaited task '{expected}'")]
    TaskIdMismatch { expected: String, got: String },

    /// A structurally required field is empty or absent.
    #[error("signal for task '{task_id}' is missing required field '{field}'")]
    MissingField { task_id: String, field: String },

    /// The signal timestamp is not a representable instant.
    #[error("signal for task '{task_id}' has invalid timestamp {timestamp}")]
    BadTimestamp { task_id: String, timestamp: i64 },
}

/// Errors from awaiting task completion.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// No valid signal arrived within the window.
    #[error("task '{task_id}' produced no completion signal within {elapsed:?}")]
    Timeout { task_id: String, elapsed: Duration },

    /// The signal arrived but failed validation.
    #[error("invalid completion signal: {0}")]
    Validation(#[from] SignalError),

    /// The signal channel dropped the subscription before delivery.
    #[error("signal channel closed while awaiting task '{task_id}'")]
    ChannelClosed { task_id: String },
}
