//! Top-level configuration, loadable from TOML with environment overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::escalation::EscalationConfig;

/// Configuration for a conductor process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Escalation policy (thresholds and safety patterns).
    pub escalation: EscalationConfig,
    /// Completion window per task, in seconds.
    pub task_timeout_secs: u64,
    /// Agent id recorded on escalation checks.
    pub agent_id: String,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            escalation: EscalationConfig::default(),
            task_timeout_secs: 300,
            agent_id: "conductor".to_string(),
        }
    }
}

impl ConductorConfig {
    /// Load from a TOML file. Missing sections fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(secs) = std::env::var("CONDUCTOR_TASK_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.task_timeout_secs = secs;
            }
        }
        if let Ok(agent_id) = std::env::var("CONDUCTOR_AGENT_ID") {
            self.agent_id = agent_id;
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}
