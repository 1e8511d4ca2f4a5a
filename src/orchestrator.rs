//! Composition root: sequences resolver levels through escalation gating,
//! dispatches approved tasks to the execution context provider, and collects
//! results via the completion monitor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::GraphError;
use crate::escalation::{EscalationManager, EscalationStats, EscalationTier};
use crate::graph::{CycleDiagnostic, DependencyResolver};
use crate::monitor::CompletionMonitor;
use crate::task::{AgentHandle, Task, TaskResult};

/// Produces an isolated running worker for a task.
///
/// Opaque to the core: the handle may represent a terminal, a subprocess,
/// or a container.
#[async_trait]
pub trait ExecutionContextProvider: Send + Sync {
    async fn spawn(&self, task: &Task) -> anyhow::Result<AgentHandle>;
    async fn dispose(&self, handle: AgentHandle) -> anyhow::Result<()>;
}

/// Supplies the opaque confidence score for a task. The scoring algorithm
/// itself lives in an external pattern-matching subsystem.
pub trait ConfidenceSource: Send + Sync {
    fn confidence_for(&self, task: &Task) -> f64;
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Completion window per task.
    pub task_timeout: Duration,
    /// Agent id recorded on escalation checks.
    pub agent_id: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(300),
            agent_id: "conductor".to_string(),
        }
    }
}

/// Per-task outcome of one orchestration run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The worker ran and reported completion (which may be a failure).
    Completed(TaskResult),
    /// Escalation gating withheld execution.
    Gated {
        tier: EscalationTier,
        record_id: Option<String>,
        message: String,
    },
    /// A declared dependency did not complete successfully.
    SkippedDependency { dependency: String },
    /// The provider could not spawn a worker.
    SpawnFailed { error: String },
    /// Timeout or broken signal plumbing while awaiting completion.
    MonitorFailed { error: String },
}

/// Everything a run produced, keyed by task id.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationReport {
    pub outcomes: HashMap<String, TaskOutcome>,
    pub diagnostics: Vec<CycleDiagnostic>,
    pub escalation: EscalationStats,
}

impl OrchestrationReport {
    /// Tasks whose workers completed successfully.
    pub fn succeeded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| match outcome {
                TaskOutcome::Completed(result) if result.success => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Drives a task set end to end.
pub struct Orchestrator {
    resolver: DependencyResolver,
    escalation: Arc<EscalationManager>,
    provider: Arc<dyn ExecutionContextProvider>,
    monitor: CompletionMonitor,
    confidence: Arc<dyn ConfidenceSource>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        resolver: DependencyResolver,
        escalation: Arc<EscalationManager>,
        provider: Arc<dyn ExecutionContextProvider>,
        monitor: CompletionMonitor,
        confidence: Arc<dyn ConfidenceSource>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            resolver,
            escalation,
            provider,
            monitor,
            confidence,
            config,
        }
    }

    /// Execute a task set level by level.
    ///
    /// All tasks in a level dispatch together; the orchestrator suspends
    /// until the level's completions are all in before moving on. Escalation
    /// checks run inline (they are synchronous and fast). A task whose
    /// declared dependency failed, timed out, or was gated is skipped with
    /// the dependency named.
    pub async fn run(&self, tasks: &[Task]) -> Result<OrchestrationReport, GraphError> {
        let resolution = self.resolver.resolve(tasks)?;
        let groups = self.resolver.parallel_groups(tasks)?;

        let mut outcomes: HashMap<String, TaskOutcome> = HashMap::new();
        let mut succeeded: HashSet<String> = HashSet::new();

        for (level, group) in groups.into_iter().enumerate() {
            info!(level, tasks = group.len(), "dispatching level");
            let mut in_flight: Vec<(Task, AgentHandle)> = Vec::new();

            for task in group {
                if let Some(dependency) = task
                    .depends_on
                    .iter()
                    .find(|dep| outcomes.contains_key(*dep) && !succeeded.contains(*dep))
                {
                    warn!(task_id = %task.id, dependency = %dependency, "skipping: dependency did not succeed");
                    outcomes.insert(
                        task.id.clone(),
                        TaskOutcome::SkippedDependency {
                            dependency: dependency.clone(),
                        },
                    );
                    continue;
                }

                let confidence = self.confidence.confidence_for(&task);
                let decision = self.escalation.check_escalation(
                    &task.id,
                    &self.config.agent_id,
                    confidence,
                    Some(&task.title),
                );

                if !decision.approved {
                    info!(task_id = %task.id, tier = %decision.tier, "task gated");
                    outcomes.insert(
                        task.id.clone(),
                        TaskOutcome::Gated {
                            tier: decision.tier,
                            record_id: decision.record.map(|r| r.id),
                            message: decision.message,
                        },
                    );
                    continue;
                }

                match self.provider.spawn(&task).await {
                    Ok(handle) => in_flight.push((task, handle)),
                    Err(error) => {
                        warn!(task_id = %task.id, %error, "provider failed to spawn worker");
                        outcomes.insert(
                            task.id.clone(),
                            TaskOutcome::SpawnFailed {
                                error: error.to_string(),
                            },
                        );
                    }
                }
            }

            // One waiter per in-flight task; the level completes when all of
            // them have resolved one way or the other.
            let waits = in_flight.iter().map(|(task, handle)| {
                let monitor = self.monitor.clone();
                let timeout = self.config.task_timeout;
                async move {
                    (
                        task.id.clone(),
                        monitor.await_completion(handle, timeout).await,
                    )
                }
            });
            let level_results = join_all(waits).await;

            for (task_id, result) in level_results {
                match result {
                    Ok(result) => {
                        if result.success {
                            succeeded.insert(task_id.clone());
                        }
                        outcomes.insert(task_id, TaskOutcome::Completed(result));
                    }
                    Err(error) => {
                        warn!(task_id = %task_id, %error, "completion monitoring failed");
                        outcomes.insert(
                            task_id,
                            TaskOutcome::MonitorFailed {
                                error: error.to_string(),
                            },
                        );
                    }
                }
            }

            for (_, handle) in in_flight {
                if let Err(error) = self.provider.dispose(handle).await {
                    warn!(%error, "failed to dispose worker handle");
                }
            }
        }

        Ok(OrchestrationReport {
            outcomes,
            diagnostics: resolution.diagnostics,
            escalation: self.escalation.stats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::channel::{InMemorySignalChannel, SignalChannel};
    use crate::task::CompletionSignal;

    /// Provider that runs each "worker" as a tokio task publishing a
    /// success signal after a short delay.
    struct LoopbackProvider {
        channel: InMemorySignalChannel,
        fail_tasks: Vec<String>,
    }

    #[async_trait]
    impl ExecutionContextProvider for LoopbackProvider {
        async fn spawn(&self, task: &Task) -> anyhow::Result<AgentHandle> {
            let handle = AgentHandle::new(&task.id, "loopback");
            let channel = self.channel.clone();
            let task_id = task.id.clone();
            let fail = self.fail_tasks.contains(&task.id);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let signal = if fail {
                    CompletionSignal::failed(&task_id, "loopback", "worker error")
                } else {
                    CompletionSignal::success(&task_id, "loopback")
                };
                channel.publish(&task_id, signal);
            });
            Ok(handle)
        }

        async fn dispose(&self, _handle: AgentHandle) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FixedConfidence(HashMap<String, f64>);

    impl ConfidenceSource for FixedConfidence {
        fn confidence_for(&self, task: &Task) -> f64 {
            self.0.get(&task.id).copied().unwrap_or(0.9)
        }
    }

    fn orchestrator(
        fail_tasks: &[&str],
        confidences: &[(&str, f64)],
    ) -> (Orchestrator, Arc<EscalationManager>) {
        let channel = InMemorySignalChannel::new();
        let escalation = Arc::new(EscalationManager::new());
        let provider = Arc::new(LoopbackProvider {
            channel: channel.clone(),
            fail_tasks: fail_tasks.iter().map(|s| s.to_string()).collect(),
        });
        let monitor = CompletionMonitor::new(Arc::new(channel));
        let confidence = Arc::new(FixedConfidence(
            confidences
                .iter()
                .map(|(id, c)| (id.to_string(), *c))
                .collect(),
        ));
        let orch = Orchestrator::new(
            DependencyResolver::new(),
            escalation.clone(),
            provider,
            monitor,
            confidence,
            OrchestratorConfig {
                task_timeout: Duration::from_secs(2),
                agent_id: "test".to_string(),
            },
        );
        (orch, escalation)
    }

    #[tokio::test]
    async fn test_run_completes_dependent_tasks_in_order() {
        let tasks = vec![
            Task::new("a", "Groundwork"),
            Task::new("b", "Follow-up").depends_on(&["a"]),
        ];
        let (orch, _) = orchestrator(&[], &[]);

        let report = orch.run(&tasks).await.unwrap();
        assert_eq!(report.succeeded().len(), 2);
    }

    #[tokio::test]
    async fn test_low_confidence_task_is_gated() {
        let tasks = vec![Task::new("risky", "Touch everything")];
        let (orch, escalation) = orchestrator(&[], &[("risky", 0.40)]);

        let report = orch.run(&tasks).await.unwrap();
        match &report.outcomes["risky"] {
            TaskOutcome::Gated { tier, record_id, .. } => {
                assert_eq!(*tier, EscalationTier::Blocked);
                assert!(record_id.is_some());
            }
            other => panic!("expected gated outcome, got: {other:?}"),
        }
        assert_eq!(escalation.history().len(), 1);
    }

    #[tokio::test]
    async fn test_dependent_of_failed_task_is_skipped() {
        let tasks = vec![
            Task::new("a", "Groundwork"),
            Task::new("b", "Follow-up").depends_on(&["a"]),
        ];
        let (orch, _) = orchestrator(&["a"], &[]);

        let report = orch.run(&tasks).await.unwrap();
        assert!(matches!(
            &report.outcomes["a"],
            TaskOutcome::Completed(r) if !r.success
        ));
        assert!(matches!(
            &report.outcomes["b"],
            TaskOutcome::SkippedDependency { dependency } if dependency == "a"
        ));
    }

    #[tokio::test]
    async fn test_dependent_of_gated_task_is_skipped() {
        let tasks = vec![
            Task::new("a", "Groundwork"),
            Task::new("b", "Follow-up").depends_on(&["a"]),
        ];
        let (orch, _) = orchestrator(&[], &[("a", 0.40)]);

        let report = orch.run(&tasks).await.unwrap();
        assert!(matches!(&report.outcomes["a"], TaskOutcome::Gated { .. }));
        assert!(matches!(
            &report.outcomes["b"],
            TaskOutcome::SkippedDependency { .. }
        ));
    }
}
