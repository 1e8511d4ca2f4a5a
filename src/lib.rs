//! Coordination core for autonomous coding agents.
//!
//! This library provides:
//! - A dependency graph resolver with cycle repair, parallel level grouping,
//!   and critical-path analysis
//! - A confidence-gated escalation manager with a full audit trail
//! - A completion monitor that awaits isolated workers over an abstract
//!   signal channel
//! - An orchestrator that composes the three into a level-by-level run loop
//!
//! The execution context provider (how a worker is physically spawned) and
//! the confidence scorer are injected at the trait seams in `orchestrator`;
//! the core never assumes a terminal, a filesystem, or a particular scoring
//! algorithm.

pub mod config;
pub mod error;
pub mod escalation;
pub mod graph;
pub mod monitor;
pub mod orchestrator;
pub mod task;

// Re-export key graph types
pub use graph::{
    CycleDiagnostic, DependencyResolver, ExecutionStats, KeywordClassifier, Resolution,
    TaskCategory, TaskClassifier,
};

// Re-export key escalation types
pub use escalation::{
    EscalationConfig, EscalationDecision, EscalationManager, EscalationRecord, EscalationStats,
    EscalationTier, HumanDecision,
};

// Re-export key monitor types
pub use monitor::{
    ChannelError, CompletionMonitor, InMemorySignalChannel, SignalChannel, SignalSubscription,
};

// Re-export orchestration types
pub use orchestrator::{
    ConfidenceSource, ExecutionContextProvider, OrchestrationReport, Orchestrator,
    OrchestratorConfig, TaskOutcome,
};

// Re-export core data types and errors
pub use config::ConductorConfig;
pub use error::{GraphError, MonitorError, SignalError};
pub use task::{AgentHandle, CompletionSignal, SignalStatus, Task, TaskMetadata, TaskResult};
