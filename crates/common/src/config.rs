//! Configuration loading for the orchestration engine.

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, assembled from defaults, an optional
/// `config.toml`, and `ORION__`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub observability: ObservabilityConfig,
}

/// Tunables for the orchestration engine and planning agent. Field names
/// mirror the durations and limits referenced throughout the component
/// design: per-task timeouts, the modification barrier's timeout, the
/// device heartbeat interval, and the agent's step cap.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    pub max_concurrent_tasks: usize,
    pub task_timeout_secs: u64,
    pub critical_task_timeout_secs: u64,
    pub modification_timeout_secs: u64,
    pub device_heartbeat_interval_secs: u64,
    /// Cap on total MONITOR iterations the planning agent may take in
    /// one session, guaranteeing finite termination.
    pub max_step: u32,
}

impl OrchestratorConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn critical_task_timeout(&self) -> Duration {
        Duration::from_secs(self.critical_task_timeout_secs)
    }

    pub fn modification_timeout(&self) -> Duration {
        Duration::from_secs(self.modification_timeout_secs)
    }

    pub fn device_heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.device_heartbeat_interval_secs)
    }
}

/// Observability configuration, carried regardless of the core's
/// external-surface non-goals.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    pub tracing_enabled: bool,
    pub otlp_endpoint: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
}

/// Log rendering format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Config {
    /// Load configuration from files and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder()
            .set_default("orchestrator.max_concurrent_tasks", 100)?
            .set_default("orchestrator.task_timeout_secs", 60)?
            .set_default("orchestrator.critical_task_timeout_secs", 300)?
            .set_default("orchestrator.modification_timeout_secs", 600)?
            .set_default("orchestrator.device_heartbeat_interval_secs", 30)?
            .set_default("orchestrator.max_step", 50)?
            .set_default("observability.tracing_enabled", true)?
            .set_default("observability.metrics_enabled", true)?
            .set_default("observability.log_level", "info")?
            .set_default("observability.log_format", "json")?;

        if Path::new("config.toml").exists() {
            builder = builder.add_source(File::with_name("config"));
        }

        builder = builder.add_source(
            Environment::with_prefix("ORION")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.orchestrator.max_concurrent_tasks == 0 {
            errors.push("orchestrator.max_concurrent_tasks must be greater than 0".to_string());
        }
        if self.orchestrator.max_step == 0 {
            errors.push("orchestrator.max_step must be greater than 0".to_string());
        }
        if self.orchestrator.task_timeout_secs == 0 {
            errors.push("orchestrator.task_timeout_secs must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig {
                max_concurrent_tasks: 100,
                task_timeout_secs: 60,
                critical_task_timeout_secs: 300,
                modification_timeout_secs: 600,
                device_heartbeat_interval_secs: 30,
                max_step: 50,
            },
            observability: ObservabilityConfig {
                tracing_enabled: true,
                otlp_endpoint: None,
                log_level: "info".to_string(),
                log_format: LogFormat::Json,
                metrics_enabled: true,
            },
        }
    }
}
