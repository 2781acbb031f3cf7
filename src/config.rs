//! Configuration types.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Memory estimate used for task kinds missing from the table.
pub const DEFAULT_KIND_MEMORY_MB: u64 = 256;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of tasks running at once.
    pub max_concurrent: usize,
    /// Total memory budget shared by running tasks, in MB.
    pub memory_budget_mb: u64,
    /// How long a queued task may wait for admission.
    pub admission_timeout: Duration,
    /// Poll interval for queued submitters (they are also woken on every release).
    pub admission_poll_interval: Duration,
    /// Timeout applied to tasks that don't specify one.
    pub default_task_timeout: Duration,
    /// Retry budget applied to tasks that don't specify one.
    pub default_max_retries: u32,
    /// Fixed delay between execution retries.
    pub retry_delay: Duration,
    /// Utilization at which status reports BUSY.
    pub busy_threshold: f64,
    /// Utilization at which status reports OVERLOADED.
    pub overloaded_threshold: f64,
    /// Finished task records kept for status queries.
    pub task_history_limit: usize,
    /// Base memory estimate per task kind, in MB.
    pub kind_memory_mb: HashMap<String, u64>,
    /// Directory for the file-backed persistence gateway.
    pub data_dir: PathBuf,
    /// Directory for rolling log files (stdout only when unset).
    pub log_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            memory_budget_mb: 2048,
            admission_timeout: Duration::from_secs(300), // 5 minutes
            admission_poll_interval: Duration::from_millis(100),
            default_task_timeout: Duration::from_secs(300),
            default_max_retries: 3,
            retry_delay: Duration::from_secs(1),
            busy_threshold: 0.7,
            overloaded_threshold: 0.9,
            task_history_limit: 1000,
            kind_memory_mb: default_kind_memory(),
            data_dir: PathBuf::from("./data/orchestrator"),
            log_dir: None,
        }
    }
}

fn default_kind_memory() -> HashMap<String, u64> {
    [
        ("intake", 256),
        ("research", 512),
        ("analysis", 384),
        ("synthesis", 384),
        ("report", 256),
        ("chat", 128),
    ]
    .into_iter()
    .map(|(kind, mb)| (kind.to_string(), mb))
    .collect()
}

impl OrchestratorConfig {
    /// Build a config from defaults overlaid with `ORCH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "ORCH_MAX_CONCURRENT")? {
            config.max_concurrent = v;
        }
        if let Some(v) = parse_var(&lookup, "ORCH_MEMORY_BUDGET_MB")? {
            config.memory_budget_mb = v;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "ORCH_ADMISSION_TIMEOUT_MS")? {
            config.admission_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "ORCH_ADMISSION_POLL_MS")? {
            config.admission_poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "ORCH_TASK_TIMEOUT_MS")? {
            config.default_task_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = parse_var(&lookup, "ORCH_MAX_RETRIES")? {
            config.default_max_retries = v;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "ORCH_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("ORCH_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ORCH_LOG_DIR") {
            config.log_dir = Some(PathBuf::from(v));
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.busy_threshold > self.overloaded_threshold {
            return Err(ConfigError::InvalidValue {
                key: "busy_threshold".to_string(),
                message: format!(
                    "{} exceeds overloaded threshold {}",
                    self.busy_threshold, self.overloaded_threshold
                ),
            });
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}
