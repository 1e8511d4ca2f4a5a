//! Awaiting and validating task completion.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{select_all, try_join_all};
use tracing::{debug, warn};

use crate::error::{MonitorError, SignalError};
use crate::monitor::channel::{ChannelError, SignalChannel};
use crate::task::{AgentHandle, CompletionSignal, SignalStatus, TaskResult};

/// Awaits one, all, or any of a set of task completions via the signal
/// channel, enforcing a timeout and normalizing payloads into `TaskResult`s.
///
/// Stateless per invocation; clone-cheap because the channel is shared.
#[derive(Clone)]
pub struct CompletionMonitor {
    channel: Arc<dyn SignalChannel>,
}

impl CompletionMonitor {
    pub fn new(channel: Arc<dyn SignalChannel>) -> Self {
        Self { channel }
    }

    /// Wait for the completion signal of one task.
    ///
    /// A signal published before this call resolves immediately. A timeout
    /// is a plumbing-level failure distinct from the worker reporting its
    /// own failure, which resolves as `Ok` with `success == false`.
    pub async fn await_completion(
        &self,
        handle: &AgentHandle,
        timeout: Duration,
    ) -> Result<TaskResult, MonitorError> {
        let mut subscription = self.channel.subscribe(&handle.task_id);

        let signal = match tokio::time::timeout(timeout, subscription.recv()).await {
            Ok(Ok(signal)) => signal,
            Ok(Err(ChannelError::Closed { task_id })) => {
                return Err(MonitorError::ChannelClosed { task_id })
            }
            Err(_elapsed) => {
                warn!(
                    task_id = %handle.task_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "no completion signal within window"
                );
                return Err(MonitorError::Timeout {
                    task_id: handle.task_id.clone(),
                    elapsed: timeout,
                });
            }
        };

        let result = validate(handle, signal)?;
        debug!(
            task_id = %result.task_id,
            success = result.success,
            duration_ms = result.duration_ms,
            "completion signal normalized"
        );
        Ok(result)
    }

    /// Wait for every handle's completion; the conjunction of individually
    /// monitored waits, so the first plumbing error aborts the set.
    pub async fn await_all(
        &self,
        handles: &[AgentHandle],
        timeout: Duration,
    ) -> Result<Vec<TaskResult>, MonitorError> {
        try_join_all(
            handles
                .iter()
                .map(|handle| self.await_completion(handle, timeout)),
        )
        .await
    }

    /// Resolve on the first completion of a set.
    ///
    /// The losing waiters' subscriptions are dropped with their futures,
    /// which deregisters them from the channel; any worker cleanup beyond
    /// that is the caller's responsibility.
    pub async fn await_any(
        &self,
        handles: &[AgentHandle],
        timeout: Duration,
    ) -> Result<TaskResult, MonitorError> {
        assert!(!handles.is_empty(), "await_any needs at least one handle");

        let futures = handles
            .iter()
            .map(|handle| Box::pin(self.await_completion(handle, timeout)))
            .collect::<Vec<_>>();

        let (result, _index, _rest) = select_all(futures).await;
        result
    }

    /// Derived liveness: true while no signal has been observed. Cannot
    /// detect a hung-but-not-crashed worker beyond elapsed time.
    pub fn is_running(&self, handle: &AgentHandle) -> bool {
        !self.channel.has_signal(&handle.task_id)
    }

    /// Wall-clock time since the worker was spawned.
    pub fn elapsed(&self, handle: &AgentHandle) -> Duration {
        (Utc::now() - handle.spawned_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Structural and identity validation, then normalization.
fn validate(handle: &AgentHandle, signal: CompletionSignal) -> Result<TaskResult, SignalError> {
    if signal.task_id.is_empty() {
        return Err(SignalError::MissingField {
            task_id: handle.task_id.clone(),
            field: "taskId".to_string(),
        });
    }
    if signal.task_id != handle.task_id {
        return Err(SignalError::TaskIdMismatch {
            expected: handle.task_id.clone(),
            got: signal.task_id,
        });
    }
    let Some(completed_at) = signal.completed_at() else {
        return Err(SignalError::BadTimestamp {
            task_id: signal.task_id,
            timestamp: signal.timestamp,
        });
    };

    let duration_ms = (signal.timestamp - handle.spawned_at.timestamp_millis()).max(0);
    let success = signal.status == SignalStatus::Success;
    let error = match (&signal.status, signal.error) {
        (SignalStatus::Success, _) => None,
        (_, Some(error)) => Some(error),
        (status, None) => Some(format!("worker reported status '{status}'")),
    };

    Ok(TaskResult {
        task_id: signal.task_id,
        agent_type: signal.agent_type,
        success,
        error,
        duration_ms,
        files_changed: signal.files_changed,
        decision_notes: signal.design_decisions,
        completed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::channel::InMemorySignalChannel;

    fn monitor() -> (CompletionMonitor, Arc<InMemorySignalChannel>) {
        let channel = Arc::new(InMemorySignalChannel::new());
        (CompletionMonitor::new(channel.clone()), channel)
    }

    #[tokio::test]
    async fn test_pre_delivered_signal_resolves_immediately() {
        let (monitor, channel) = monitor();
        let handle = AgentHandle::new("t1", "backend");

        let mut signal = CompletionSignal::success("t1", "backend");
        signal.timestamp = handle.spawned_at.timestamp_millis() + 1500;
        channel.publish("t1", signal);

        let result = monitor
            .await_completion(&handle, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.duration_ms, 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_window() {
        let (monitor, _channel) = monitor();
        let handle = AgentHandle::new("t1", "backend");

        let err = monitor
            .await_completion(&handle, Duration::from_millis(100))
            .await
            .unwrap_err();
        match err {
            MonitorError::Timeout { task_id, elapsed } => {
                assert_eq!(task_id, "t1");
                assert_eq!(elapsed, Duration::from_millis(100));
            }
            other => panic!("expected timeout, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mismatched_task_id_is_validation_error() {
        let (monitor, channel) = monitor();
        let handle = AgentHandle::new("t1", "backend");

        // Misrouted: published under t1 but the payload claims t2.
        channel.publish("t1", CompletionSignal::success("t2", "backend"));

        let err = monitor
            .await_completion(&handle, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Validation(SignalError::TaskIdMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_worker_failure_is_a_result_not_an_error() {
        let (monitor, channel) = monitor();
        let handle = AgentHandle::new("t1", "backend");
        channel.publish("t1", CompletionSignal::failed("t1", "backend", "tests red"));

        let result = monitor
            .await_completion(&handle, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("tests red"));
    }

    #[tokio::test]
    async fn test_bad_timestamp_rejected() {
        let (monitor, channel) = monitor();
        let handle = AgentHandle::new("t1", "backend");

        let mut signal = CompletionSignal::success("t1", "backend");
        signal.timestamp = i64::MAX;
        channel.publish("t1", signal);

        let err = monitor
            .await_completion(&handle, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Validation(SignalError::BadTimestamp { .. })
        ));
    }

    #[tokio::test]
    async fn test_await_all_collects_every_result() {
        let (monitor, channel) = monitor();
        let handles = vec![AgentHandle::new("a", "x"), AgentHandle::new("b", "x")];
        channel.publish("a", CompletionSignal::success("a", "x"));
        channel.publish("b", CompletionSignal::failed("b", "x", "boom"));

        let results = monitor
            .await_all(&handles, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.task_id == "a" && r.success));
        assert!(results.iter().any(|r| r.task_id == "b" && !r.success));
    }

    #[tokio::test]
    async fn test_await_any_resolves_on_first() {
        let (monitor, channel) = monitor();
        let handles = vec![AgentHandle::new("a", "x"), AgentHandle::new("b", "x")];
        channel.publish("b", CompletionSignal::success("b", "x"));

        let result = monitor
            .await_any(&handles, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.task_id, "b");

        // The loser's waiter was deregistered when its future dropped, so a
        // late publish for "a" buffers.
        channel.publish("a", CompletionSignal::success("a", "x"));
        assert!(channel.has_signal("a"));
    }

    #[tokio::test]
    async fn test_duration_clamped_at_zero() {
        let (monitor, channel) = monitor();
        let handle = AgentHandle::new("t1", "backend");

        let mut signal = CompletionSignal::success("t1", "backend");
        signal.timestamp = handle.spawned_at.timestamp_millis() - 5000; // skewed clock
        channel.publish("t1", signal);

        let result = monitor
            .await_completion(&handle, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.duration_ms, 0);
    }
}
