//! Task data model — specs, tasks, and lifecycle status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque task parameters.
pub type TaskParams = Map<String, Value>;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Built but not yet dispatched.
    Pending,
    /// Waiting in the admission queue.
    Queued,
    /// Executing on a worker.
    Running,
    Completed,
    Failed,
    TimedOut,
    /// Drained from the admission queue before it started.
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Caller-facing description of requested work. Unset values take configured defaults.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub params: TaskParams,
    /// Higher runs first.
    pub priority: i32,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl TaskSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: replace all parameters. Non-object values are stored under `"input"`.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        self
    }

    /// Builder: set a single parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Builder: set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builder: set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A unit of work plus its execution bookkeeping.
///
/// Everything except the bookkeeping fields (`status`, `retry_count`,
/// timestamps, `result`, `error`) is fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: String,
    pub params: TaskParams,
    pub priority: i32,
    pub timeout: Duration,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Build a task from a spec, filling unset values from the given defaults.
    pub fn from_spec(
        kind: impl Into<String>,
        spec: TaskSpec,
        default_timeout: Duration,
        default_max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            params: spec.params,
            priority: spec.priority,
            timeout: spec.timeout.unwrap_or(default_timeout),
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Read a numeric parameter, accepting integers, floats, and numeric strings.
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        match self.params.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn mark_queued(&mut self) {
        self.status = TaskStatus::Queued;
    }

    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn mark_completed(&mut self, result: Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    /// Record a terminal failure with the given status.
    pub fn mark_failed(&mut self, status: TaskStatus, error: impl Into<String>) {
        debug_assert!(status.is_terminal() && status != TaskStatus::Completed);
        self.status = status;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Wall time between start and completion (or now, while running).
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            let end = self.completed_at.unwrap_or_else(Utc::now);
            end.signed_duration_since(start)
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }
}
