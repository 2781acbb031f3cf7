//! Orchestrator — owns every component and exposes the submission and status surface.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::admission::{AdmissionController, ResourceStatus};
use crate::config::OrchestratorConfig;
use crate::error::{TaskError, WorkflowError};
use crate::store::PersistenceGateway;
use crate::task::{Task, TaskSpec, TaskStatus};
use crate::worker::{TaskCoordinator, TaskSummary, WorkerFactory, WorkerHandle, WorkerPool};
use crate::workflow::{WorkflowProgress, WorkflowStateMachine};

/// Combined status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub resources: ResourceStatus,
    pub workers: Vec<WorkerHandle>,
    pub tasks: TaskSummary,
}

/// Orchestration context: config, workers, coordinator, admission, and workflows.
pub struct Orchestrator {
    config: OrchestratorConfig,
    pool: Arc<WorkerPool>,
    coordinator: TaskCoordinator,
    admission: AdmissionController,
    workflows: WorkflowStateMachine,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        factory: Arc<dyn WorkerFactory>,
        store: Arc<dyn PersistenceGateway>,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(factory));
        let coordinator = TaskCoordinator::new(config.clone(), pool.clone());
        let admission = AdmissionController::new(&config);
        let workflows = WorkflowStateMachine::new(store);

        info!(
            max_concurrent = config.max_concurrent,
            memory_budget_mb = config.memory_budget_mb,
            "Orchestrator ready"
        );

        Self {
            config,
            pool,
            coordinator,
            admission,
            workflows,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn workflows(&self) -> &WorkflowStateMachine {
        &self.workflows
    }

    pub fn coordinator(&self) -> &TaskCoordinator {
        &self.coordinator
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Admit then execute one task.
    pub async fn submit(&self, kind: &str, spec: TaskSpec) -> Result<Value, TaskError> {
        let task = self.coordinator.build_task(kind, spec);
        self.run_admitted(task).await
    }

    /// Submit tasks concurrently. Results come back in input order, each isolated.
    pub async fn submit_batch(&self, specs: Vec<(String, TaskSpec)>) -> Vec<Result<Value, TaskError>> {
        info!(tasks = specs.len(), "Submitting task batch");
        let runs = specs.into_iter().map(|(kind, spec)| {
            let task = self.coordinator.build_task(kind, spec);
            self.run_admitted(task)
        });
        join_all(runs).await
    }

    async fn run_admitted(&self, task: Task) -> Result<Value, TaskError> {
        self.coordinator.track(&task);

        let queued = {
            let mut queued = task.clone();
            queued.mark_queued();
            queued
        };
        let admitted = self
            .admission
            .submit(
                &task,
                || self.coordinator.track(&queued),
                || self.coordinator.execute(task.clone()),
            )
            .await;

        match admitted {
            Ok(result) => result,
            Err(err) => {
                let mut failed = task.clone();
                let status = match err {
                    TaskError::Cancelled { .. } => TaskStatus::Cancelled,
                    _ => TaskStatus::Failed,
                };
                failed.mark_failed(status, err.to_string());
                self.coordinator.track(&failed);
                Err(err)
            }
        }
    }

    /// Resources, worker handles, and task counts.
    pub async fn get_status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            resources: self.admission.status(),
            workers: self.pool.handles().await,
            tasks: self.coordinator.summary(),
        }
    }

    /// Snapshots of tracked tasks, oldest first.
    pub fn get_task_status(&self) -> Vec<Task> {
        self.coordinator.task_status()
    }

    pub fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.coordinator.task(task_id)
    }

    pub async fn get_workflow_progress(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowProgress, WorkflowError> {
        self.workflows.progress(workflow_id).await
    }

    /// Cancel queued work, wait for running work, then stop every worker.
    pub async fn shutdown(&self) {
        let cancelled = self.admission.cleanup().await;
        self.pool.stop_all().await;
        info!(cancelled, "Orchestrator shut down");
    }
}
