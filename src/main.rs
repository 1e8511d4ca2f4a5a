//! `conductor` binary: inspect a task plan without executing it.
//!
//! Loads tasks from a TOML plan file and prints the resolved execution
//! order, parallel groups, cycle diagnostics, and runtime estimates.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use conductor::{ConductorConfig, DependencyResolver, EscalationManager, Task};

#[derive(Parser)]
#[command(name = "conductor", about = "Agent coordination plan tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a plan: execution order, parallel groups, and estimates.
    Inspect {
        /// Path to a TOML plan file with a [[tasks]] array.
        #[arg(long)]
        plan: PathBuf,
        /// Emit machine-readable JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Run a one-off escalation check against the configured thresholds.
    Gate {
        #[arg(long)]
        task_id: String,
        /// Confidence score in [0, 1].
        #[arg(long)]
        confidence: f64,
        /// Action description matched against the safety pattern lists.
        #[arg(long)]
        action: Option<String>,
        /// Optional config file; defaults plus env otherwise.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(serde::Deserialize)]
struct PlanFile {
    tasks: Vec<Task>,
}

fn load_plan(path: &PathBuf) -> Result<Vec<Task>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading plan {}", path.display()))?;
    let plan: PlanFile =
        toml::from_str(&raw).with_context(|| format!("parsing plan {}", path.display()))?;
    Ok(plan.tasks)
}

fn inspect(plan: PathBuf, json: bool) -> Result<()> {
    let tasks = load_plan(&plan)?;
    let resolver = DependencyResolver::new();

    let resolution = resolver.resolve(&tasks)?;
    let groups = resolver.parallel_groups(&tasks)?;
    let stats = resolver.execution_stats(&tasks)?;

    if json {
        let order: Vec<&str> = resolution.tasks.iter().map(|t| t.id.as_str()).collect();
        let group_ids: Vec<Vec<&str>> = groups
            .iter()
            .map(|g| g.iter().map(|t| t.id.as_str()).collect())
            .collect();
        let out = serde_json::json!({
            "order": order,
            "groups": group_ids,
            "diagnostics": resolution.diagnostics,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Execution order:");
    for (i, task) in resolution.tasks.iter().enumerate() {
        println!("  {:>3}. {}: {}", i + 1, task.id, task.title);
    }

    println!("\nParallel groups:");
    for (i, group) in groups.iter().enumerate() {
        let ids: Vec<&str> = group.iter().map(|t| t.id.as_str()).collect();
        println!("  level {}: {}", i, ids.join(", "));
    }

    if !resolution.diagnostics.is_empty() {
        println!("\nCycle diagnostics:");
        for diag in &resolution.diagnostics {
            println!("  {diag}");
        }
    }

    println!("\nEstimates:");
    println!("  sequential: {:.1}h", stats.sequential_hours);
    println!("  parallel:   {:.1}h", stats.parallel_hours);
    println!("  speedup:    {:.2}x", stats.speedup);
    println!(
        "  critical path ({:.1}h): {}",
        stats.critical_path_hours,
        stats.critical_path.join(" -> ")
    );

    Ok(())
}

fn gate(
    task_id: String,
    confidence: f64,
    action: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    let config = match config {
        Some(path) => ConductorConfig::load(path)?,
        None => ConductorConfig::from_env(),
    };
    let manager = EscalationManager::with_config(config.escalation);
    let decision =
        manager.check_escalation(&task_id, &config.agent_id, confidence, action.as_deref());

    println!("tier:     {}", decision.tier);
    println!("approved: {}", decision.approved);
    println!("message:  {}", decision.message);
    if let Some(record) = decision.record {
        println!("record:   {}", record.id);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Command::Inspect { plan, json } => inspect(plan, json),
        Command::Gate {
            task_id,
            confidence,
            action,
            config,
        } => gate(task_id, confidence, action, config),
    }
}
