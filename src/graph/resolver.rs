//! Graph construction, cycle repair, topological ordering, parallel
//! grouping, and critical-path analysis.
//!
//! Edges are stored as task → the tasks it depends on, and in-degree is the
//! number of dependencies a task has. That convention is self-consistent
//! throughout this module: nodes with in-degree 0 have no outstanding
//! prerequisites and are immediately runnable.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::GraphError;
use crate::graph::classifier::{extract_ordinal, KeywordClassifier, TaskCategory, TaskClassifier};
use crate::task::Task;

/// Dependency map: task id → ids it depends on.
type DepGraph = HashMap<String, HashSet<String>>;

/// A detected dependency cycle and, when auto-repaired, the edge that was
/// cut to break it. `removed_edge` is `None` for residual cycles found
/// during the topological sort (surfaced, never silently dropped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleDiagnostic {
    /// The cycle path, from the repeated node to the node that closed it.
    pub cycle: Vec<String>,
    /// The cut edge as (from, dependency), if this cycle was repaired.
    pub removed_edge: Option<(String, String)>,
}

impl std::fmt::Display for CycleDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.removed_edge {
            Some((from, to)) => write!(
                f,
                "cycle [{}] repaired by cutting dependency {} -> {}",
                self.cycle.join(" -> "),
                from,
                to
            ),
            None => write!(f, "residual cycle among [{}]", self.cycle.join(", ")),
        }
    }
}

/// Output of `DependencyResolver::resolve`.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The input tasks, reordered so every task follows its dependencies.
    pub tasks: Vec<Task>,
    /// Cycles that were detected and repaired (or left residual).
    pub diagnostics: Vec<CycleDiagnostic>,
}

/// Derived scheduling metrics for a task set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Sum of all task durations.
    pub sequential_hours: f64,
    /// Sum over parallel groups of each group's longest task.
    pub parallel_hours: f64,
    /// sequential / parallel (1.0 when parallel time is zero).
    pub speedup: f64,
    /// Number of parallel groups.
    pub group_count: usize,
    /// Task ids along the longest duration-weighted chain, start to end.
    pub critical_path: Vec<String>,
    /// Total duration of the critical path.
    pub critical_path_hours: f64,
}

/// Dependency-respecting scheduler front end.
///
/// Stateless per invocation; the injected classifier supplies the
/// category heuristics used for inferred edges.
pub struct DependencyResolver {
    classifier: Box<dyn TaskClassifier>,
}

impl DependencyResolver {
    /// Resolver with the default keyword classifier.
    pub fn new() -> Self {
        Self {
            classifier: Box::new(KeywordClassifier),
        }
    }

    /// Resolver with a custom classifier.
    pub fn with_classifier(classifier: Box<dyn TaskClassifier>) -> Self {
        Self { classifier }
    }

    /// Compute a dependency-respecting execution order.
    ///
    /// Returns a permutation of the input where every task appears after all
    /// tasks it transitively depends on. Cycles are repaired (never fatal);
    /// an unknown or duplicate task id is.
    pub fn resolve(&self, tasks: &[Task]) -> Result<Resolution, GraphError> {
        let (graph, diagnostics) = self.prepare(tasks)?;
        let (order, residual) = kahn_sort(tasks, &graph);

        let mut diagnostics = diagnostics;
        if let Some(diag) = residual {
            warn!(%diag, "topological sort left a residual cycle");
            diagnostics.push(diag);
        }

        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let ordered = order
            .iter()
            .map(|id| (*by_id.get(id.as_str()).expect("order is a permutation")).clone())
            .collect();

        Ok(Resolution {
            tasks: ordered,
            diagnostics,
        })
    }

    /// Partition tasks into levels that can execute concurrently.
    ///
    /// Each level contains only tasks whose dependencies all sit in strictly
    /// earlier levels; concatenating the levels yields a valid topological
    /// order.
    pub fn parallel_groups(&self, tasks: &[Task]) -> Result<Vec<Vec<Task>>, GraphError> {
        let (graph, _) = self.prepare(tasks)?;

        let mut groups: Vec<Vec<Task>> = Vec::new();
        let mut processed: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&Task> = tasks.iter().collect();

        while !remaining.is_empty() {
            let (ready, rest): (Vec<&Task>, Vec<&Task>) = remaining.into_iter().partition(|t| {
                graph
                    .get(&t.id)
                    .map(|deps| deps.iter().all(|d| processed.contains(d.as_str())))
                    .unwrap_or(true)
            });

            if ready.is_empty() {
                // Residual cycle: flush the remainder as one final group so
                // every task is still scheduled.
                warn!(
                    tasks = ?rest.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
                    "residual cycle while grouping; flushing remaining tasks as one group"
                );
                groups.push(rest.into_iter().cloned().collect());
                break;
            }

            for task in &ready {
                processed.insert(task.id.as_str());
            }
            groups.push(ready.into_iter().cloned().collect());
            remaining = rest;
        }

        Ok(groups)
    }

    /// Sequential/parallel runtime estimates and the critical path.
    pub fn execution_stats(&self, tasks: &[Task]) -> Result<ExecutionStats, GraphError> {
        let (graph, _) = self.prepare(tasks)?;
        let groups = self.parallel_groups(tasks)?;

        let sequential_hours: f64 = tasks.iter().map(|t| t.estimated_hours).sum();
        let parallel_hours: f64 = groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|t| t.estimated_hours)
                    .fold(0.0, f64::max)
            })
            .sum();
        let speedup = if parallel_hours > 0.0 {
            sequential_hours / parallel_hours
        } else {
            1.0
        };

        let (critical_path, critical_path_hours) = critical_path(tasks, &graph);

        Ok(ExecutionStats {
            sequential_hours,
            parallel_hours,
            speedup,
            group_count: groups.len(),
            critical_path,
            critical_path_hours,
        })
    }

    /// Build the dependency graph and repair any cycles.
    fn prepare(&self, tasks: &[Task]) -> Result<(DepGraph, Vec<CycleDiagnostic>), GraphError> {
        let mut graph = build_graph(tasks)?;
        self.infer_edges(tasks, &mut graph);

        let cycles = detect_cycles(tasks, &graph);
        let diagnostics = repair_cycles(&mut graph, cycles);
        Ok((graph, diagnostics))
    }

    /// Union heuristic edges into the declared graph. Additive only: edges
    /// are added, never removed, and set semantics deduplicate.
    fn infer_edges(&self, tasks: &[Task], graph: &mut DepGraph) {
        let categories: HashMap<&str, TaskCategory> = tasks
            .iter()
            .map(|t| (t.id.as_str(), self.classifier.classify(t)))
            .collect();

        let ids_in = |category: TaskCategory| -> Vec<&str> {
            tasks
                .iter()
                .filter(|t| categories[t.id.as_str()] == category)
                .map(|t| t.id.as_str())
                .collect()
        };

        let data = ids_in(TaskCategory::DataLayer);
        let services = ids_in(TaskCategory::ServiceLayer);
        let presentation = ids_in(TaskCategory::PresentationLayer);

        // Layering: presentation waits on services, services wait on data.
        for id in &presentation {
            for dep in &services {
                add_edge(graph, id, dep);
            }
        }
        for id in &services {
            for dep in &data {
                add_edge(graph, id, dep);
            }
        }

        // Tests wait on any implementation task touching the same files.
        for task in tasks {
            if categories[task.id.as_str()] != TaskCategory::Test {
                continue;
            }
            let test_files: HashSet<&str> =
                task.metadata.files.iter().map(String::as_str).collect();
            if test_files.is_empty() {
                continue;
            }
            for other in tasks {
                if other.id == task.id || categories[other.id.as_str()] == TaskCategory::Test {
                    continue;
                }
                let shares_file = other
                    .metadata
                    .files
                    .iter()
                    .any(|f| test_files.contains(f.as_str()));
                if shares_file {
                    add_edge(graph, &task.id, &other.id);
                }
            }
        }

        // Explicit ordinal sequences within a category: phase n waits on
        // phase n-1.
        let mut ordinals: HashMap<(TaskCategory, u32), &str> = HashMap::new();
        for task in tasks {
            if let Some(n) = extract_ordinal(&task.title) {
                ordinals.insert((categories[task.id.as_str()], n), task.id.as_str());
            }
        }
        for task in tasks {
            if let Some(n) = extract_ordinal(&task.title) {
                if n == 0 {
                    continue;
                }
                let category = categories[task.id.as_str()];
                if let Some(prev) = ordinals.get(&(category, n - 1)) {
                    add_edge(graph, &task.id, prev);
                }
            }
        }
    }
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Add an inferred edge, skipping self-dependencies.
fn add_edge(graph: &mut DepGraph, from: &str, dep: &str) {
    if from == dep {
        return;
    }
    if graph
        .get_mut(from)
        .map(|deps| deps.insert(dep.to_string()))
        .unwrap_or(false)
    {
        debug!(from, dep, "inferred dependency edge");
    }
}

/// Build the declared dependency graph, validating ids.
fn build_graph(tasks: &[Task]) -> Result<DepGraph, GraphError> {
    let mut known: HashSet<&str> = HashSet::new();
    for task in tasks {
        if !known.insert(task.id.as_str()) {
            return Err(GraphError::DuplicateTaskId {
                task_id: task.id.clone(),
            });
        }
    }

    let mut graph: DepGraph = HashMap::new();
    for task in tasks {
        let mut deps = HashSet::new();
        for dep in &task.depends_on {
            if !known.contains(dep.as_str()) {
                return Err(GraphError::UnknownDependency {
                    task_id: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
            deps.insert(dep.clone());
        }
        graph.insert(task.id.clone(), deps);
    }
    Ok(graph)
}

/// Depth-first cycle detection with an explicit recursion stack.
///
/// Every back-edge to an on-stack node records the stack slice from the
/// repeated node to the current node. One pass over all roots; repairs
/// happen afterwards.
fn detect_cycles(tasks: &[Task], graph: &DepGraph) -> Vec<Vec<String>> {
    fn visit(
        node: &str,
        graph: &DepGraph,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
        on_stack: &mut HashSet<String>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(node.to_string());
        stack.push(node.to_string());
        on_stack.insert(node.to_string());

        // Sorted neighbors keep cycle paths (and therefore repairs)
        // deterministic across runs.
        let mut deps: Vec<&String> = graph.get(node).into_iter().flatten().collect();
        deps.sort();

        for dep in deps {
            if on_stack.contains(dep.as_str()) {
                let start = stack
                    .iter()
                    .position(|n| n == dep)
                    .expect("on-stack node is on the stack");
                cycles.push(stack[start..].to_vec());
            } else if !visited.contains(dep.as_str()) {
                visit(dep, graph, visited, stack, on_stack, cycles);
            }
        }

        stack.pop();
        on_stack.remove(node);
    }

    let mut visited = HashSet::new();
    let mut cycles = Vec::new();
    for task in tasks {
        if !visited.contains(task.id.as_str()) {
            let mut stack = Vec::new();
            let mut on_stack = HashSet::new();
            visit(
                &task.id,
                graph,
                &mut visited,
                &mut stack,
                &mut on_stack,
                &mut cycles,
            );
        }
    }
    cycles
}

/// Break each recorded cycle by cutting its last edge: the dependency from
/// the second-to-last node to the last node of the recorded path. Lossy but
/// idempotent and always terminating; the diagnostic names the cut edge so
/// the underlying declaration can be fixed.
fn repair_cycles(graph: &mut DepGraph, cycles: Vec<Vec<String>>) -> Vec<CycleDiagnostic> {
    let mut diagnostics = Vec::new();
    for cycle in cycles {
        let (from, dep) = match cycle.len() {
            0 => continue,
            1 => (cycle[0].clone(), cycle[0].clone()),
            n => (cycle[n - 2].clone(), cycle[n - 1].clone()),
        };

        let removed = graph
            .get_mut(&from)
            .map(|deps| deps.remove(&dep))
            .unwrap_or(false);
        if removed {
            warn!(
                cycle = %cycle.join(" -> "),
                from = %from,
                dep = %dep,
                "dependency cycle repaired by cutting edge"
            );
            diagnostics.push(CycleDiagnostic {
                cycle,
                removed_edge: Some((from, dep)),
            });
        }
    }
    diagnostics
}

/// Kahn's algorithm with in-degree defined as dependency count.
///
/// Returns the order plus a residual-cycle diagnostic if fewer nodes were
/// emitted than exist; stragglers are appended in input order so the result
/// is always a full permutation.
fn kahn_sort(tasks: &[Task], graph: &DepGraph) -> (Vec<String>, Option<CycleDiagnostic>) {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in tasks {
        let deps = graph.get(&task.id);
        in_degree.insert(task.id.as_str(), deps.map(|d| d.len()).unwrap_or(0));
        if let Some(deps) = deps {
            for dep in deps {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(task.id.as_str());
            }
        }
    }

    // Seed in input order for a deterministic result.
    let mut queue: VecDeque<&str> = tasks
        .iter()
        .filter(|t| in_degree[t.id.as_str()] == 0)
        .map(|t| t.id.as_str())
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(tasks.len());
    while let Some(node) = queue.pop_front() {
        order.push(node.to_string());
        if let Some(deps) = dependents.get(node) {
            for &dependent in deps {
                let remaining = in_degree.get_mut(dependent).expect("known task");
                *remaining -= 1;
                if *remaining == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    if order.len() < tasks.len() {
        let emitted: HashSet<&str> = order.iter().map(String::as_str).collect();
        let stragglers: Vec<String> = tasks
            .iter()
            .filter(|t| !emitted.contains(t.id.as_str()))
            .map(|t| t.id.clone())
            .collect();
        let diag = CycleDiagnostic {
            cycle: stragglers.clone(),
            removed_edge: None,
        };
        order.extend(stragglers);
        return (order, Some(diag));
    }

    (order, None)
}

/// Longest duration-weighted path ending at each task, memoized, with an
/// on-path set guarding against revisits (cycle valve returns 0).
fn critical_path(tasks: &[Task], graph: &DepGraph) -> (Vec<String>, f64) {
    fn longest(
        id: &str,
        durations: &HashMap<&str, f64>,
        graph: &DepGraph,
        memo: &mut HashMap<String, f64>,
        best_pred: &mut HashMap<String, Option<String>>,
        on_path: &mut HashSet<String>,
    ) -> f64 {
        if on_path.contains(id) {
            return 0.0;
        }
        if let Some(value) = memo.get(id) {
            return *value;
        }

        on_path.insert(id.to_string());

        let mut deps: Vec<&String> = graph.get(id).into_iter().flatten().collect();
        deps.sort();

        let mut best = 0.0_f64;
        let mut pred: Option<String> = None;
        for dep in deps {
            let len = longest(dep, durations, graph, memo, best_pred, on_path);
            if len > best {
                best = len;
                pred = Some(dep.clone());
            }
        }

        on_path.remove(id);

        let value = durations.get(id).copied().unwrap_or(0.0) + best;
        memo.insert(id.to_string(), value);
        best_pred.insert(id.to_string(), pred);
        value
    }

    let durations: HashMap<&str, f64> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.estimated_hours))
        .collect();

    let mut memo = HashMap::new();
    let mut best_pred = HashMap::new();
    let mut end: Option<(&str, f64)> = None;

    for task in tasks {
        let mut on_path = HashSet::new();
        let value = longest(
            &task.id,
            &durations,
            graph,
            &mut memo,
            &mut best_pred,
            &mut on_path,
        );
        let better = match end {
            Some((_, best)) => value > best,
            None => true,
        };
        if better {
            end = Some((&task.id, value));
        }
    }

    let Some((end_id, total)) = end else {
        return (Vec::new(), 0.0);
    };

    // Walk the best-predecessor links back to the start, then flip.
    let mut path = vec![end_id.to_string()];
    let mut cursor = end_id.to_string();
    while let Some(Some(pred)) = best_pred.get(&cursor) {
        path.push(pred.clone());
        cursor = pred.clone();
    }
    path.reverse();

    (path, total)
}
