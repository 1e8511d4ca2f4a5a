//! Task classification for dependency inference.
//!
//! The resolver only asks "what category is this task"; the rules that map
//! categories to inferred edges live in the resolver. Keeping the classifier
//! behind a trait means the keyword tables can be swapped for a smarter
//! model without touching the graph algorithms.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Architectural layer a task belongs to, as inferred from its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    /// Schema, storage, migrations.
    DataLayer,
    /// Business logic, APIs, services.
    ServiceLayer,
    /// UI, views, rendering.
    PresentationLayer,
    /// Test authoring or fixing.
    Test,
    /// Build/deploy/environment configuration.
    Configuration,
    /// No layer signal found.
    General,
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataLayer => write!(f, "data-layer"),
            Self::ServiceLayer => write!(f, "service-layer"),
            Self::PresentationLayer => write!(f, "presentation-layer"),
            Self::Test => write!(f, "test"),
            Self::Configuration => write!(f, "configuration"),
            Self::General => write!(f, "general"),
        }
    }
}

/// Pluggable task categorizer.
pub trait TaskClassifier: Send + Sync {
    fn classify(&self, task: &Task) -> TaskCategory;
}

/// Keywords indicating data-layer work.
const DATA_KEYWORDS: &[&str] = &[
    "database",
    "schema",
    "migration",
    "model",
    "repository",
    "storage",
    "sql",
    "table",
    "index",
];

/// Keywords indicating service-layer work.
const SERVICE_KEYWORDS: &[&str] = &[
    "api",
    "service",
    "endpoint",
    "handler",
    "controller",
    "business logic",
    "auth",
    "middleware",
];

/// Keywords indicating presentation-layer work.
const PRESENTATION_KEYWORDS: &[&str] = &[
    "ui",
    "view",
    "component",
    "page",
    "frontend",
    "render",
    "layout",
    "style",
    "dialog",
];

/// Keywords indicating test work.
const TEST_KEYWORDS: &[&str] = &["test", "spec", "coverage", "e2e", "regression"];

/// Keywords indicating configuration work.
const CONFIG_KEYWORDS: &[&str] = &[
    "config",
    "setup",
    "deploy",
    "pipeline",
    "ci",
    "docker",
    "environment",
    "infra",
];

/// Default classifier: case-insensitive keyword hits over title, files, and
/// agent type, most-hits wins. Test keywords dominate (a "test the API
/// endpoint" task is a test task, not a service task).
pub struct KeywordClassifier;

impl KeywordClassifier {
    fn content(task: &Task) -> String {
        let mut content = task.title.to_lowercase();
        for file in &task.metadata.files {
            content.push(' ');
            content.push_str(&file.to_lowercase());
        }
        if let Some(agent) = &task.metadata.agent_type {
            content.push(' ');
            content.push_str(&agent.to_lowercase());
        }
        content
    }

    fn hits(content: &str, keywords: &[&str]) -> usize {
        keywords.iter().filter(|kw| content.contains(*kw)).count()
    }
}

impl TaskClassifier for KeywordClassifier {
    fn classify(&self, task: &Task) -> TaskCategory {
        let content = Self::content(task);

        if Self::hits(&content, TEST_KEYWORDS) > 0 {
            return TaskCategory::Test;
        }

        let scored = [
            (TaskCategory::DataLayer, Self::hits(&content, DATA_KEYWORDS)),
            (
                TaskCategory::ServiceLayer,
                Self::hits(&content, SERVICE_KEYWORDS),
            ),
            (
                TaskCategory::PresentationLayer,
                Self::hits(&content, PRESENTATION_KEYWORDS),
            ),
            (
                TaskCategory::Configuration,
                Self::hits(&content, CONFIG_KEYWORDS),
            ),
        ];

        let best = scored.iter().max_by_key(|(_, hits)| *hits);
        match best {
            Some((category, hits)) if *hits > 0 => *category,
            _ => TaskCategory::General,
        }
    }
}

/// Extract a trailing ordinal from a task title ("phase 2", "step 3",
/// "part 1 of 4" takes the first number after the keywordless tail).
///
/// Used for same-category sequencing: ordinal n is made to depend on the
/// same-category task carrying ordinal n-1.
pub fn extract_ordinal(title: &str) -> Option<u32> {
    // Compiled per call; plans are small and this runs once per resolve.
    let re = Regex::new(r"(?i)\b(?:phase|step|part|stage)\s*(\d+)").expect("static regex");
    re.captures(title)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
