//! Workflow state machine — validated, persisted transitions for research cases.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{StoreError, WorkflowError};
use crate::store::PersistenceGateway;
use crate::workflow::document::{
    TransitionRecord, WORKFLOW_KEY_PREFIX, WorkflowDocument, WorkflowProgress, workflow_key,
};
use crate::workflow::state::WorkflowState;

/// Tracks workflow documents, caching them in memory and persisting every mutation.
///
/// Mutations on the same workflow id serialize on a per-document lock, so the
/// transition-table check and the persisted write are never interleaved.
/// Different ids proceed independently.
pub struct WorkflowStateMachine {
    store: Arc<dyn PersistenceGateway>,
    cache: RwLock<HashMap<String, WorkflowDocument>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkflowStateMachine {
    pub fn new(store: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, workflow_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(workflow_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the per-document lock once the caller holds the last outside reference.
    async fn release_lock(&self, workflow_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        let idle = locks
            .get(workflow_id)
            .is_some_and(|held| Arc::ptr_eq(held, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(workflow_id);
        }
    }

    async fn persist(&self, doc: &WorkflowDocument) -> Result<(), WorkflowError> {
        let bytes = serde_json::to_vec(doc).map_err(StoreError::from)?;
        self.store
            .write(&workflow_key(&doc.workflow_id), &bytes)
            .await?;
        Ok(())
    }

    async fn hydrate(&self, workflow_id: &str) -> Result<WorkflowDocument, WorkflowError> {
        let bytes = match self.store.read(&workflow_key(workflow_id)).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound { .. }) => {
                return Err(WorkflowError::NotFound {
                    id: workflow_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let doc: WorkflowDocument = serde_json::from_slice(&bytes).map_err(StoreError::from)?;
        debug!(workflow_id, state = %doc.state, "Hydrated workflow from store");
        Ok(doc)
    }

    /// Start a new workflow in CREATED and persist it.
    pub async fn create(
        &self,
        workflow_id: &str,
        metadata: Value,
    ) -> Result<WorkflowDocument, WorkflowError> {
        let lock = self.lock_for(workflow_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.create_locked(workflow_id, metadata).await
        };
        if result.is_err() {
            self.release_lock(workflow_id, lock).await;
        }
        result
    }

    async fn create_locked(
        &self,
        workflow_id: &str,
        metadata: Value,
    ) -> Result<WorkflowDocument, WorkflowError> {
        let in_use = self.cache.read().await.contains_key(workflow_id)
            || self.store.exists(&workflow_key(workflow_id)).await?;
        if in_use {
            return Err(WorkflowError::AlreadyExists {
                id: workflow_id.to_string(),
            });
        }

        let doc = WorkflowDocument::new(workflow_id, metadata);
        self.persist(&doc).await?;
        self.cache
            .write()
            .await
            .insert(workflow_id.to_string(), doc.clone());

        info!(workflow_id, "Workflow created");
        Ok(doc)
    }

    /// Move a workflow to `target`, merging `data` into its outputs.
    ///
    /// Returns `Ok(false)` without touching memory or storage when the edge is
    /// not permitted. The updated document is written to the store before it
    /// replaces the cached copy; a failed write leaves the workflow unchanged.
    pub async fn transition(
        &self,
        workflow_id: &str,
        target: WorkflowState,
        data: Value,
    ) -> Result<bool, WorkflowError> {
        let lock = self.lock_for(workflow_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.transition_locked(workflow_id, target, data).await
        };
        if matches!(result, Err(WorkflowError::NotFound { .. })) {
            self.release_lock(workflow_id, lock).await;
        }
        result
    }

    async fn transition_locked(
        &self,
        workflow_id: &str,
        target: WorkflowState,
        data: Value,
    ) -> Result<bool, WorkflowError> {
        let mut doc = self.read_locked(workflow_id).await?;
        let record = match doc.apply_transition(target, data) {
            Ok(record) => record,
            Err(WorkflowError::InvalidTransition { from, to, .. }) => {
                warn!(workflow_id, %from, %to, "Rejected workflow transition");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        self.persist(&doc).await?;
        self.cache
            .write()
            .await
            .insert(workflow_id.to_string(), doc);

        info!(
            workflow_id,
            from = %record.from,
            to = %record.to,
            keys = ?record.keys,
            "Workflow transitioned"
        );
        Ok(true)
    }

    /// Fetch a workflow, hydrating it from the store on a cache miss.
    ///
    /// Hydration holds the document's lock, so it cannot race a removal.
    pub async fn read(&self, workflow_id: &str) -> Result<WorkflowDocument, WorkflowError> {
        if let Some(doc) = self.cache.read().await.get(workflow_id) {
            return Ok(doc.clone());
        }

        let lock = self.lock_for(workflow_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.read_locked(workflow_id).await
        };
        if matches!(result, Err(WorkflowError::NotFound { .. })) {
            self.release_lock(workflow_id, lock).await;
        }
        result
    }

    /// `read` for callers already holding the document's lock.
    async fn read_locked(&self, workflow_id: &str) -> Result<WorkflowDocument, WorkflowError> {
        if let Some(doc) = self.cache.read().await.get(workflow_id) {
            return Ok(doc.clone());
        }

        let doc = self.hydrate(workflow_id).await?;
        self.cache
            .write()
            .await
            .insert(workflow_id.to_string(), doc.clone());
        Ok(doc)
    }

    /// Canonical phase progress for a workflow.
    pub async fn progress(&self, workflow_id: &str) -> Result<WorkflowProgress, WorkflowError> {
        Ok(self.read(workflow_id).await?.progress())
    }

    /// Transition log for a workflow.
    pub async fn history(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<TransitionRecord>, WorkflowError> {
        Ok(self.read(workflow_id).await?.transitions)
    }

    /// Enumerate persisted workflows, optionally only those in `state`.
    pub async fn list(
        &self,
        state: Option<WorkflowState>,
    ) -> Result<Vec<WorkflowDocument>, WorkflowError> {
        let keys = self.store.keys(WORKFLOW_KEY_PREFIX).await?;
        let mut docs = Vec::with_capacity(keys.len());

        for key in keys {
            let workflow_id = &key[WORKFLOW_KEY_PREFIX.len()..];
            let doc = match self.read(workflow_id).await {
                Ok(doc) => doc,
                // Removed between listing and reading.
                Err(WorkflowError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            if state.is_none_or(|s| s == doc.state) {
                docs.push(doc);
            }
        }

        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(docs)
    }

    /// Delete a workflow from the store and the cache.
    pub async fn remove(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        let lock = self.lock_for(workflow_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.remove_locked(workflow_id).await
        };
        if matches!(result, Ok(()) | Err(WorkflowError::NotFound { .. })) {
            self.release_lock(workflow_id, lock).await;
        }
        result
    }

    async fn remove_locked(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        match self.store.delete(&workflow_key(workflow_id)).await {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {
                return Err(WorkflowError::NotFound {
                    id: workflow_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        self.cache.write().await.remove(workflow_id);

        info!(workflow_id, "Workflow removed");
        Ok(())
    }
}
