//! Trust gate process configuration

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Process configuration, read from `GATE_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Instance name attached to every log event
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Port for the HTTP surface
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between scheduled evaluation cycles
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_secs: u64,

    /// Per-scope evaluation budget in seconds
    #[serde(default = "default_evaluation_timeout")]
    pub evaluation_timeout_secs: u64,

    /// Scopes evaluated at once
    #[serde(default = "default_max_concurrent_evaluations")]
    pub max_concurrent_evaluations: usize,

    /// JSON-lines mirror of the audit log; in-memory only when unset
    #[serde(default)]
    pub audit_log_path: Option<PathBuf>,

    /// Observations and anomalies older than this are pruned
    #[serde(default = "default_observation_retention_days")]
    pub observation_retention_days: u32,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "trust-gate".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_evaluation_interval() -> u64 {
    300
}

fn default_evaluation_timeout() -> u64 {
    30
}

fn default_max_concurrent_evaluations() -> usize {
    8
}

fn default_observation_retention_days() -> u32 {
    90
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            evaluation_interval_secs: default_evaluation_interval(),
            evaluation_timeout_secs: default_evaluation_timeout(),
            max_concurrent_evaluations: default_max_concurrent_evaluations(),
            audit_log_path: None,
            observation_retention_days: default_observation_retention_days(),
        }
    }
}

impl GateConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("GATE").try_parsing(true))
            .build()
            .context("Failed to read GATE_* environment")?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid trust gate configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.evaluation_interval_secs == 0 {
            bail!("evaluation_interval_secs must be positive");
        }
        if self.evaluation_timeout_secs == 0 {
            bail!("evaluation_timeout_secs must be positive");
        }
        if self.max_concurrent_evaluations == 0 {
            bail!("max_concurrent_evaluations must be positive");
        }
        // Retention must cover the longest anomaly lookback
        if self.observation_retention_days < 90 {
            bail!(
                "observation_retention_days {} is shorter than the 90-day lookback",
                self.observation_retention_days
            );
        }
        Ok(())
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation_timeout_secs)
    }
}
