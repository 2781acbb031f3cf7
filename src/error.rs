//! Error types for the orchestration core.

use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::workflow::WorkflowState;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Invalid key: {key}")]
    InvalidKey { key: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Workflow state machine errors.
///
/// Rejected transitions are not errors: `transition` reports them as `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow {id} already exists")]
    AlreadyExists { id: String },

    #[error("Workflow {id} not found")]
    NotFound { id: String },

    #[error("Workflow {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: WorkflowState,
        to: WorkflowState,
    },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Failure reported by a worker implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    /// The worker has no capability for this kind. Never retried.
    #[error("Worker does not support task kind {kind}")]
    Unsupported { kind: String },

    /// Any other failure. Retried up to the task's budget.
    #[error("{0}")]
    Failed(String),
}

impl WorkerError {
    /// Shorthand for a retryable failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Per-task failure surfaced by the coordinator and admission controller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Task {task_id} timed out after {timeout:?}")]
    TimedOut { task_id: Uuid, timeout: Duration },

    #[error("Task {task_id} failed after {retry_count} retries: {reason}")]
    Execution {
        task_id: Uuid,
        retry_count: u32,
        reason: String,
    },

    #[error("No worker supports task kind {kind}")]
    UnsupportedOperation { task_id: Uuid, kind: String },

    #[error("Task {task_id} was not admitted within {waited:?}")]
    AdmissionTimeout { task_id: Uuid, waited: Duration },

    #[error("Task {task_id} was cancelled before it started")]
    Cancelled { task_id: Uuid },
}

/// Kind tag for a [`TaskError`], used in structured reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    TimedOut,
    ExecutionError,
    UnsupportedOperation,
    AdmissionTimeout,
    Cancelled,
}

/// Structured failure result: what crosses the per-task boundary instead of a fault.
#[derive(Debug, Clone, Serialize)]
pub struct TaskFailureReport {
    pub task_id: Uuid,
    pub success: bool,
    pub error_kind: TaskErrorKind,
    pub message: String,
    pub retry_count: u32,
}

impl TaskError {
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            Self::TimedOut { .. } => TaskErrorKind::TimedOut,
            Self::Execution { .. } => TaskErrorKind::ExecutionError,
            Self::UnsupportedOperation { .. } => TaskErrorKind::UnsupportedOperation,
            Self::AdmissionTimeout { .. } => TaskErrorKind::AdmissionTimeout,
            Self::Cancelled { .. } => TaskErrorKind::Cancelled,
        }
    }

    pub fn task_id(&self) -> Uuid {
        match self {
            Self::TimedOut { task_id, .. }
            | Self::Execution { task_id, .. }
            | Self::UnsupportedOperation { task_id, .. }
            | Self::AdmissionTimeout { task_id, .. }
            | Self::Cancelled { task_id } => *task_id,
        }
    }

    /// Retries consumed before this error surfaced. Only execution errors retry.
    pub fn retry_count(&self) -> u32 {
        match self {
            Self::Execution { retry_count, .. } => *retry_count,
            _ => 0,
        }
    }

    /// Build the structured `success: false` report for this failure.
    pub fn report(&self) -> TaskFailureReport {
        TaskFailureReport {
            task_id: self.task_id(),
            success: false,
            error_kind: self.kind(),
            message: self.to_string(),
            retry_count: self.retry_count(),
        }
    }
}

/// Result type alias for the orchestration core.
pub type Result<T> = std::result::Result<T, Error>;
