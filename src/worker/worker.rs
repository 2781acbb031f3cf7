//! Worker capability surface and the factories that build workers per kind.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::WorkerError;
use crate::task::TaskParams;

/// Something that can execute tasks of one or more kinds.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Execute a task of `kind`. Return `WorkerError::Unsupported` for kinds
    /// this worker cannot handle; any other error is retried by the coordinator.
    async fn execute(&self, kind: &str, params: &TaskParams) -> Result<Value, WorkerError>;

    /// Release resources held by the worker. Called once on orchestrator shutdown.
    async fn stop(&self) {}
}

/// Builds the worker for a task kind. Resolved once per kind, then memoized by the pool.
pub trait WorkerFactory: Send + Sync {
    /// Return `None` when no worker can handle `kind`.
    fn create(&self, kind: &str) -> Option<Arc<dyn Worker>>;
}

type Constructor = Arc<dyn Fn() -> Arc<dyn Worker> + Send + Sync>;

/// Factory mapping task kinds to worker constructors.
#[derive(Default)]
pub struct WorkerRegistry {
    constructors: RwLock<HashMap<String, Constructor>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `kind`, replacing any previous one.
    pub fn register<F>(&self, kind: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn Worker> + Send + Sync + 'static,
    {
        let kind = kind.into();
        tracing::debug!(kind = %kind, "Registered worker kind");
        self.constructors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, Arc::new(constructor));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(self, kind: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Arc<dyn Worker> + Send + Sync + 'static,
    {
        self.register(kind, constructor);
        self
    }

    /// Check if a kind has a constructor.
    pub fn has(&self, kind: &str) -> bool {
        self.constructors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(kind)
    }

    /// List registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .constructors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        kinds.sort();
        kinds
    }
}

impl WorkerFactory for WorkerRegistry {
    fn create(&self, kind: &str) -> Option<Arc<dyn Worker>> {
        let constructor = self
            .constructors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(kind)
            .cloned()?;
        Some(constructor())
    }
}

/// Adapts an async closure into a [`Worker`].
pub struct FnWorker<F> {
    f: F,
}

impl<F> FnWorker<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Worker for FnWorker<F>
where
    F: Fn(String, TaskParams) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, WorkerError>> + Send,
{
    async fn execute(&self, kind: &str, params: &TaskParams) -> Result<Value, WorkerError> {
        (self.f)(kind.to_string(), params.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registry_builds_registered_kinds() {
        let registry = WorkerRegistry::new().with("research", || {
            Arc::new(FnWorker::new(|kind: String, _params: TaskParams| async move {
                Ok::<_, WorkerError>(json!({ "handled": kind }))
            })) as Arc<dyn Worker>
        });

        assert!(registry.has("research"));
        assert_eq!(registry.kinds(), vec!["research"]);
        assert!(registry.create("report").is_none());

        let worker = registry.create("research").unwrap();
        let out = worker.execute("research", &TaskParams::new()).await.unwrap();
        assert_eq!(out, json!({ "handled": "research" }));
    }

    #[tokio::test]
    async fn fn_worker_receives_params() {
        let worker = FnWorker::new(|_kind: String, params: TaskParams| async move {
            params
                .get("query")
                .cloned()
                .ok_or_else(|| WorkerError::failed("missing query"))
        });

        let mut params = TaskParams::new();
        assert!(worker.execute("search", &params).await.is_err());
        params.insert("query".to_string(), json!("rust"));
        assert_eq!(worker.execute("search", &params).await.unwrap(), json!("rust"));
    }
}
