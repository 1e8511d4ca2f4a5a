//! Dependency Graph Resolver.
//!
//! Builds a directed graph from declared plus heuristically inferred
//! dependencies, repairs cycles, and produces a topological execution order,
//! parallel levels, and critical-path estimates.

pub mod classifier;
pub mod resolver;

pub use classifier::{KeywordClassifier, TaskCategory, TaskClassifier};
pub use resolver::{
    CycleDiagnostic, DependencyResolver, ExecutionStats, Resolution,
};
