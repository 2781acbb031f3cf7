//! Task coordinator — dispatches tasks to pooled workers with timeout and retry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{TaskError, WorkerError};
use crate::task::{Task, TaskSpec, TaskStatus};
use crate::worker::pool::WorkerPool;

/// Executes tasks against the worker pool and tracks their bookkeeping.
///
/// Timeouts are final for a task: the attempt is dropped and never retried.
/// Worker failures are retried after `retry_delay` until the task's retry
/// budget is spent.
pub struct TaskCoordinator {
    config: OrchestratorConfig,
    pool: Arc<WorkerPool>,
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl TaskCoordinator {
    pub fn new(config: OrchestratorConfig, pool: Arc<WorkerPool>) -> Self {
        Self {
            config,
            pool,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Build a task from a spec using the configured defaults.
    pub fn build_task(&self, kind: impl Into<String>, spec: TaskSpec) -> Task {
        Task::from_spec(
            kind,
            spec,
            self.config.default_task_timeout,
            self.config.default_max_retries,
        )
    }

    /// Build and execute a single task.
    pub async fn run_one(&self, kind: &str, spec: TaskSpec) -> Result<Value, TaskError> {
        let task = self.build_task(kind, spec);
        self.execute(task).await
    }

    /// Execute a batch with at most `max_concurrent` tasks running at once.
    ///
    /// Every task yields its own result, in input order; one failure never
    /// aborts its siblings.
    pub async fn run_many(&self, specs: Vec<(String, TaskSpec)>) -> Vec<Result<Value, TaskError>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        info!(
            tasks = specs.len(),
            max_concurrent = self.config.max_concurrent,
            "Running task batch"
        );

        let runs = specs.into_iter().map(|(kind, spec)| {
            let semaphore = semaphore.clone();
            let task = self.build_task(kind, spec);
            async move {
                self.track(&task);
                // The semaphore is never closed, so acquisition only waits.
                let _permit = semaphore.acquire_owned().await.ok();
                self.execute(task).await
            }
        });

        join_all(runs).await
    }

    /// Run an already-built task through dispatch.
    pub async fn execute(&self, mut task: Task) -> Result<Value, TaskError> {
        task.mark_running();
        self.track(&task);
        debug!(task_id = %task.id, kind = %task.kind, "Dispatching task");

        loop {
            let Some(lease) = self.pool.acquire(&task.kind).await else {
                return Err(self.fail_unsupported(task));
            };

            let attempt =
                tokio::time::timeout(task.timeout, lease.worker().execute(&task.kind, &task.params))
                    .await;

            match attempt {
                Ok(Ok(value)) => {
                    lease.record_success();
                    drop(lease);

                    let result = normalize_result(value);
                    task.mark_completed(result.clone());
                    info!(
                        task_id = %task.id,
                        kind = %task.kind,
                        retries = task.retry_count,
                        "Task completed"
                    );
                    self.track(&task);
                    return Ok(result);
                }
                Ok(Err(WorkerError::Unsupported { .. })) => {
                    drop(lease);
                    return Err(self.fail_unsupported(task));
                }
                Ok(Err(WorkerError::Failed(reason))) => {
                    drop(lease);

                    if task.retry_count >= task.max_retries {
                        let err = TaskError::Execution {
                            task_id: task.id,
                            retry_count: task.retry_count,
                            reason,
                        };
                        warn!(task_id = %task.id, kind = %task.kind, error = %err, "Task failed");
                        task.mark_failed(TaskStatus::Failed, err.to_string());
                        self.track(&task);
                        return Err(err);
                    }

                    task.retry_count += 1;
                    warn!(
                        task_id = %task.id,
                        kind = %task.kind,
                        attempt = task.retry_count,
                        max_retries = task.max_retries,
                        reason = %reason,
                        "Task attempt failed, retrying"
                    );
                    self.track(&task);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(_elapsed) => {
                    drop(lease);

                    let err = TaskError::TimedOut {
                        task_id: task.id,
                        timeout: task.timeout,
                    };
                    warn!(task_id = %task.id, kind = %task.kind, timeout = ?task.timeout, "Task timed out");
                    task.mark_failed(TaskStatus::TimedOut, err.to_string());
                    self.track(&task);
                    return Err(err);
                }
            }
        }
    }

    fn fail_unsupported(&self, mut task: Task) -> TaskError {
        let err = TaskError::UnsupportedOperation {
            task_id: task.id,
            kind: task.kind.clone(),
        };
        warn!(task_id = %task.id, kind = %task.kind, "No worker supports task kind");
        task.mark_failed(TaskStatus::Failed, err.to_string());
        self.track(&task);
        err
    }

    fn read_tasks(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Task>> {
        self.tasks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_tasks(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Task>> {
        self.tasks.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the current bookkeeping for a task, pruning old finished records.
    pub fn track(&self, task: &Task) {
        let mut tasks = self.write_tasks();
        tasks.insert(task.id, task.clone());

        let limit = self.config.task_history_limit;
        let mut finished: Vec<(Uuid, _)> = tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .map(|t| (t.id, t.completed_at))
            .collect();
        if finished.len() > limit {
            finished.sort_by_key(|(_, completed_at)| *completed_at);
            let excess = finished.len() - limit;
            for (id, _) in finished.into_iter().take(excess) {
                tasks.remove(&id);
            }
        }
    }

    /// Snapshot of one tracked task.
    pub fn task(&self, task_id: Uuid) -> Option<Task> {
        self.read_tasks().get(&task_id).cloned()
    }

    /// Snapshot of all tracked tasks, oldest first.
    pub fn task_status(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.read_tasks().values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Task counts by status.
    pub fn summary(&self) -> TaskSummary {
        let tasks = self.read_tasks();

        let mut summary = TaskSummary::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Queued => summary.queued += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::TimedOut => summary.timed_out += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
        }

        summary.total = tasks.len();
        summary
    }
}

/// Wrap non-object worker output as `{result, success: true}`.
fn normalize_result(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => json!({ "result": other, "success": true }),
    }
}

/// Counts of tracked tasks by status.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub pending: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
}
