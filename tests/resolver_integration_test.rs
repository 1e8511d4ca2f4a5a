//! Integration tests for dependency resolution over a realistic plan.
//!
//! Exercises the full classify -> infer -> repair -> order pipeline the way
//! a sprint plan would hit it, rather than one algorithm at a time.

use conductor::{DependencyResolver, GraphError, Task};

/// A small feature plan mixing declared and inferable dependencies.
fn feature_plan() -> Vec<Task> {
    vec![
        Task::new("schema", "Create database schema for accounts").hours(2.0),
        Task::new("repo", "Implement account repository")
            .hours(3.0)
            .depends_on(&["schema"]),
        Task::new("api", "Build account API endpoints")
            .hours(4.0)
            .depends_on(&["repo"]),
        Task::new("ui", "Render account settings page")
            .hours(3.0)
            .files(&["web/settings.tsx"]),
        Task::new("tests", "Write tests for account API")
            .hours(2.0)
            .files(&["src/api/accounts.rs"]),
        Task::new("impl-api-file", "Implement API handlers")
            .hours(1.0)
            .files(&["src/api/accounts.rs"]),
    ]
}

fn position(order: &[Task], id: &str) -> usize {
    order
        .iter()
        .position(|t| t.id == id)
        .unwrap_or_else(|| panic!("task '{id}' missing from order"))
}

#[test]
fn resolve_returns_dependency_respecting_permutation() {
    let tasks = feature_plan();
    let res = DependencyResolver::new().resolve(&tasks).unwrap();

    // Permutation: same ids, each exactly once.
    assert_eq!(res.tasks.len(), tasks.len());
    for task in &tasks {
        position(&res.tasks, &task.id);
    }

    // Declared chain.
    assert!(position(&res.tasks, "schema") < position(&res.tasks, "repo"));
    assert!(position(&res.tasks, "repo") < position(&res.tasks, "api"));

    // Inferred: the test task follows the implementation sharing its file.
    assert!(position(&res.tasks, "impl-api-file") < position(&res.tasks, "tests"));
}

#[test]
fn every_transitive_dependency_appears_earlier() {
    let tasks = feature_plan();
    let res = DependencyResolver::new().resolve(&tasks).unwrap();

    for task in &res.tasks {
        let own = position(&res.tasks, &task.id);
        for dep in &task.depends_on {
            assert!(
                position(&res.tasks, dep) < own,
                "'{}' scheduled before its dependency '{dep}'",
                task.id
            );
        }
    }
}

#[test]
fn cyclic_plan_terminates_with_full_permutation_and_diagnostic() {
    let tasks = vec![
        Task::new("x", "Refactor module X").depends_on(&["y"]),
        Task::new("y", "Refactor module Y").depends_on(&["z"]),
        Task::new("z", "Refactor module Z").depends_on(&["x"]),
        Task::new("w", "Unrelated cleanup"),
    ];

    let res = DependencyResolver::new().resolve(&tasks).unwrap();
    assert_eq!(res.tasks.len(), 4, "repair must keep every task");
    assert!(
        !res.diagnostics.is_empty(),
        "a repaired cycle must be reported"
    );
    let diag = &res.diagnostics[0];
    assert!(diag.removed_edge.is_some(), "the cut edge must be named");
}

#[test]
fn groups_concatenated_form_topological_order() {
    let tasks = feature_plan();
    let resolver = DependencyResolver::new();
    let groups = resolver.parallel_groups(&tasks).unwrap();

    let flat: Vec<Task> = groups.iter().flatten().cloned().collect();
    assert_eq!(flat.len(), tasks.len());
    for task in &flat {
        let own = position(&flat, &task.id);
        for dep in &task.depends_on {
            assert!(position(&flat, dep) < own);
        }
    }

    // Each group's dependencies sit in strictly earlier groups.
    let mut earlier: Vec<&str> = Vec::new();
    for group in &groups {
        for task in group {
            for dep in &task.depends_on {
                assert!(
                    earlier.contains(&dep.as_str()),
                    "'{}' groups alongside its dependency '{dep}'",
                    task.id
                );
            }
        }
        earlier.extend(group.iter().map(|t| t.id.as_str()));
    }
}

#[test]
fn execution_stats_are_consistent() {
    let tasks = feature_plan();
    let stats = DependencyResolver::new().execution_stats(&tasks).unwrap();

    let sequential: f64 = tasks.iter().map(|t| t.estimated_hours).sum();
    assert!((stats.sequential_hours - sequential).abs() < 1e-9);
    assert!(stats.parallel_hours <= stats.sequential_hours);
    assert!(stats.speedup >= 1.0);
    assert!(!stats.critical_path.is_empty());
    assert!(stats.critical_path_hours <= stats.sequential_hours);

    // The critical path itself is a dependency chain ending at its last task.
    let first = &stats.critical_path[0];
    assert!(tasks.iter().any(|t| &t.id == first));
}

#[test]
fn unknown_dependency_aborts_resolution() {
    let tasks = vec![Task::new("a", "Depends on nothing real").depends_on(&["phantom"])];
    let err = DependencyResolver::new().resolve(&tasks).unwrap_err();
    match err {
        GraphError::UnknownDependency {
            task_id,
            dependency,
        } => {
            assert_eq!(task_id, "a");
            assert_eq!(dependency, "phantom");
        }
        other => panic!("expected UnknownDependency, got: {other:?}"),
    }
}
