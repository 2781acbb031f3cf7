//! Worker pool — one lazily created, memoized worker per task kind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::worker::worker::{Worker, WorkerFactory};

/// Bookkeeping for a pooled worker, readable as a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerHandle {
    pub id: Uuid,
    pub kind: String,
    pub busy: bool,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub tasks_served: u64,
}

/// A pooled worker plus its handle and exclusive lease.
struct WorkerSlot {
    worker: Arc<dyn Worker>,
    handle: Mutex<WorkerHandle>,
    lease: Arc<tokio::sync::Mutex<()>>,
}

impl WorkerSlot {
    fn handle(&self) -> MutexGuard<'_, WorkerHandle> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive use of a kind's worker. The handle is marked idle again on drop.
pub struct WorkerLease {
    slot: Arc<WorkerSlot>,
    _guard: OwnedMutexGuard<()>,
}

impl WorkerLease {
    pub fn worker(&self) -> &Arc<dyn Worker> {
        &self.slot.worker
    }

    pub fn handle_id(&self) -> Uuid {
        self.slot.handle().id
    }

    /// Record a successfully served task.
    pub fn record_success(&self) {
        let mut handle = self.slot.handle();
        handle.tasks_served += 1;
        handle.last_used = Some(Utc::now());
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.slot.handle().busy = false;
    }
}

/// Keyed-by-kind registry of live workers.
pub struct WorkerPool {
    factory: Arc<dyn WorkerFactory>,
    slots: RwLock<HashMap<String, Arc<WorkerSlot>>>,
}

impl WorkerPool {
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            factory,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Obtain the memoized slot for `kind`, building the worker on first use.
    async fn slot_for(&self, kind: &str) -> Option<Arc<WorkerSlot>> {
        if let Some(slot) = self.slots.read().await.get(kind) {
            return Some(slot.clone());
        }

        let mut slots = self.slots.write().await;
        // Another caller may have built it while we waited for the write lock.
        if let Some(slot) = slots.get(kind) {
            return Some(slot.clone());
        }

        let worker = self.factory.create(kind)?;
        let handle = WorkerHandle {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            busy: false,
            created_at: Utc::now(),
            last_used: None,
            tasks_served: 0,
        };
        info!(kind, worker_id = %handle.id, "Created worker");

        let slot = Arc::new(WorkerSlot {
            worker,
            handle: Mutex::new(handle),
            lease: Arc::new(tokio::sync::Mutex::new(())),
        });
        slots.insert(kind.to_string(), slot.clone());
        Some(slot)
    }

    /// Lease the worker for `kind`, waiting while another task holds it.
    ///
    /// Returns `None` when the factory has no worker for the kind.
    pub async fn acquire(&self, kind: &str) -> Option<WorkerLease> {
        let slot = self.slot_for(kind).await?;
        let guard = slot.lease.clone().lock_owned().await;
        slot.handle().busy = true;
        debug!(kind, "Worker leased");
        Some(WorkerLease {
            slot,
            _guard: guard,
        })
    }

    /// Snapshot of every instantiated worker handle, sorted by kind.
    pub async fn handles(&self) -> Vec<WorkerHandle> {
        let mut handles: Vec<WorkerHandle> = self
            .slots
            .read()
            .await
            .values()
            .map(|slot| slot.handle().clone())
            .collect();
        handles.sort_by(|a, b| a.kind.cmp(&b.kind));
        handles
    }

    /// Number of instantiated workers.
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    /// Stop and drop every instantiated worker.
    pub async fn stop_all(&self) {
        let slots: Vec<(String, Arc<WorkerSlot>)> = self.slots.write().await.drain().collect();
        for (kind, slot) in slots {
            slot.worker.stop().await;
            debug!(kind = %kind, "Worker stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::error::WorkerError;
    use crate::task::TaskParams;
    use crate::worker::worker::WorkerRegistry;

    struct CountingWorker {
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        async fn execute(&self, _kind: &str, _params: &TaskParams) -> Result<Value, WorkerError> {
            Ok(Value::Null)
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(builds: Arc<AtomicUsize>, stops: Arc<AtomicUsize>) -> WorkerPool {
        let registry = WorkerRegistry::new().with("research", move || {
            builds.fetch_add(1, Ordering::SeqCst);
            Arc::new(CountingWorker {
                stops: stops.clone(),
            }) as Arc<dyn Worker>
        });
        WorkerPool::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn workers_are_memoized_per_kind() {
        let builds = Arc::new(AtomicUsize::new(0));
        let pool = pool(builds.clone(), Arc::new(AtomicUsize::new(0)));

        let first = pool.acquire("research").await.unwrap().handle_id();
        let second = pool.acquire("research").await.unwrap().handle_id();
        assert_eq!(first, second);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_kind_yields_none() {
        let pool = pool(Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        assert!(pool.acquire("astrology").await.is_none());
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn lease_marks_busy_until_dropped() {
        let pool = pool(Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        let lease = pool.acquire("research").await.unwrap();
        assert!(pool.handles().await[0].busy);

        lease.record_success();
        drop(lease);

        let handles = pool.handles().await;
        let handle = &handles[0];
        assert!(!handle.busy);
        assert_eq!(handle.tasks_served, 1);
        assert!(handle.last_used.is_some());
    }

    #[tokio::test]
    async fn second_lease_waits_for_first() {
        let pool = Arc::new(pool(
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        ));
        let lease = pool.acquire("research").await.unwrap();

        let contender = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire("research").await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(lease);
        assert!(contender.await.unwrap());
    }

    #[tokio::test]
    async fn stop_all_stops_each_worker_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let pool = pool(Arc::new(AtomicUsize::new(0)), stops.clone());
        drop(pool.acquire("research").await);

        pool.stop_all().await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(pool.is_empty().await);
    }
}
