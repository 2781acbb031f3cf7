//! Resource admission — concurrency slots, memory ledger, and the priority wait queue.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::admission::estimate::MemoryEstimator;
use crate::admission::queue::{AdmissionQueue, QueuedEntry};
use crate::config::OrchestratorConfig;
use crate::error::TaskError;
use crate::task::Task;

/// Advisory load level. Never gates admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    Available,
    Busy,
    Overloaded,
}

/// Snapshot of the resource ledger.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub memory_used_mb: u64,
    pub memory_limit_mb: u64,
    /// The larger of slot and memory utilization.
    pub utilization: f64,
    pub state: ResourceState,
}

/// Slots, memory, and the wait queue. Only touched under the controller's lock.
#[derive(Debug)]
struct Ledger {
    running: usize,
    memory_used_mb: u64,
    max_concurrent: usize,
    memory_limit_mb: u64,
    queue: AdmissionQueue,
    next_ticket: u64,
    /// Tickets drained by `cleanup` whose submitters have not yet noticed.
    cancelled: HashSet<u64>,
}

impl Ledger {
    /// Whether a task costing `memory_mb` fits the free slots and memory.
    ///
    /// Work larger than the whole budget fits only on an idle controller.
    fn fits(&self, memory_mb: u64) -> bool {
        self.running < self.max_concurrent
            && (memory_mb <= self.memory_limit_mb.saturating_sub(self.memory_used_mb)
                || self.running == 0)
    }

    /// A new submission may skip the queue only ahead of strictly lower priorities.
    fn admits_newcomer(&self, priority: i32, memory_mb: u64) -> bool {
        self.fits(memory_mb)
            && self
                .queue
                .peek()
                .is_none_or(|head| head.priority < priority)
    }

    fn is_head(&self, ticket: u64) -> bool {
        self.queue.peek().is_some_and(|head| head.ticket == ticket)
    }

    fn reserve(&mut self, memory_mb: u64) {
        self.running += 1;
        self.memory_used_mb = self.memory_used_mb.saturating_add(memory_mb);
    }

    fn release(&mut self, memory_mb: u64) {
        self.running = self.running.saturating_sub(1);
        self.memory_used_mb = self.memory_used_mb.saturating_sub(memory_mb);
    }

    fn utilization(&self) -> f64 {
        let slots = self.running as f64 / self.max_concurrent.max(1) as f64;
        let memory = if self.memory_limit_mb == 0 {
            0.0
        } else {
            self.memory_used_mb as f64 / self.memory_limit_mb as f64
        };
        slots.max(memory)
    }
}

struct Shared {
    ledger: Mutex<Ledger>,
    /// Signalled on every release and limit change.
    changed: Notify,
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A held slot plus memory reservation. Released on drop.
pub struct AdmissionGuard {
    shared: Arc<Shared>,
    memory_mb: u64,
}

impl AdmissionGuard {
    pub fn memory_mb(&self) -> u64 {
        self.memory_mb
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.shared.ledger().release(self.memory_mb);
        self.shared.changed.notify_waiters();
    }
}

/// A submission's place in the wait queue.
///
/// Dropping it while still armed withdraws the entry, so an abandoned
/// submitter never blocks the ones behind it.
struct QueueTicket {
    shared: Arc<Shared>,
    ticket: u64,
    armed: bool,
}

impl QueueTicket {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut ledger = self.shared.ledger();
            ledger.queue.remove(self.ticket);
            ledger.cancelled.remove(&self.ticket);
        }
        self.shared.changed.notify_waiters();
    }
}

/// Decides whether a task runs now or waits, and tracks what running work consumes.
pub struct AdmissionController {
    shared: Arc<Shared>,
    estimator: MemoryEstimator,
    admission_timeout: Duration,
    poll_interval: Duration,
    busy_threshold: f64,
    overloaded_threshold: f64,
}

impl AdmissionController {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                ledger: Mutex::new(Ledger {
                    running: 0,
                    memory_used_mb: 0,
                    max_concurrent: config.max_concurrent.max(1),
                    memory_limit_mb: config.memory_budget_mb,
                    queue: AdmissionQueue::new(),
                    next_ticket: 0,
                    cancelled: HashSet::new(),
                }),
                changed: Notify::new(),
            }),
            estimator: MemoryEstimator::from_config(config),
            admission_timeout: config.admission_timeout,
            poll_interval: config.admission_poll_interval,
            busy_threshold: config.busy_threshold,
            overloaded_threshold: config.overloaded_threshold,
        }
    }

    /// Run `work` once `task` is admitted, releasing its resources afterwards.
    ///
    /// `on_queued` fires when the task has to wait.
    pub async fn submit<F, Fut, T>(
        &self,
        task: &Task,
        on_queued: impl FnOnce(),
        work: F,
    ) -> Result<T, TaskError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.admit(task, on_queued).await?;
        let output = work().await;
        drop(guard);
        Ok(output)
    }

    /// Wait for a slot and memory for `task`.
    pub async fn admit(
        &self,
        task: &Task,
        on_queued: impl FnOnce(),
    ) -> Result<AdmissionGuard, TaskError> {
        let memory_mb = self.estimator.estimate(task);

        let ticket = {
            let mut ledger = self.shared.ledger();
            if ledger.admits_newcomer(task.priority, memory_mb) {
                ledger.reserve(memory_mb);
                debug!(task_id = %task.id, memory_mb, running = ledger.running, "Task admitted");
                return Ok(self.guard(memory_mb));
            }

            let ticket = ledger.next_ticket;
            ledger.next_ticket += 1;
            ledger.queue.push(QueuedEntry {
                ticket,
                task_id: task.id,
                priority: task.priority,
                memory_mb,
            });
            info!(
                task_id = %task.id,
                kind = %task.kind,
                priority = task.priority,
                memory_mb,
                queued = ledger.queue.len(),
                "Task queued for admission"
            );
            QueueTicket {
                shared: self.shared.clone(),
                ticket,
                armed: true,
            }
        };
        on_queued();

        let started = Instant::now();
        let deadline = started + self.admission_timeout;
        loop {
            let changed = self.shared.changed.notified();
            {
                let mut ledger = self.shared.ledger();
                if ledger.cancelled.remove(&ticket.ticket) {
                    drop(ledger);
                    ticket.disarm();
                    return Err(TaskError::Cancelled { task_id: task.id });
                }
                if ledger.is_head(ticket.ticket) && ledger.fits(memory_mb) {
                    ledger.queue.pop();
                    ledger.reserve(memory_mb);
                    drop(ledger);
                    ticket.disarm();
                    // The next entry may fit as well.
                    self.shared.changed.notify_waiters();
                    debug!(task_id = %task.id, waited = ?started.elapsed(), "Queued task admitted");
                    return Ok(self.guard(memory_mb));
                }
                if Instant::now() >= deadline {
                    drop(ledger);
                    // Withdraws the entry and wakes the rest of the queue.
                    drop(ticket);

                    let waited = started.elapsed();
                    warn!(task_id = %task.id, waited = ?waited, "Admission timed out");
                    return Err(TaskError::AdmissionTimeout {
                        task_id: task.id,
                        waited,
                    });
                }
            }

            let wait = self
                .poll_interval
                .min(deadline.saturating_duration_since(Instant::now()));
            let _ = tokio::time::timeout(wait, changed).await;
        }
    }

    fn guard(&self, memory_mb: u64) -> AdmissionGuard {
        AdmissionGuard {
            shared: self.shared.clone(),
            memory_mb,
        }
    }

    /// Resize limits at runtime. Waiting submitters re-check immediately.
    pub fn adjust_limits(&self, max_concurrent: Option<usize>, memory_budget_mb: Option<u64>) {
        {
            let mut ledger = self.shared.ledger();
            if let Some(max) = max_concurrent {
                ledger.max_concurrent = max.max(1);
            }
            if let Some(budget) = memory_budget_mb {
                ledger.memory_limit_mb = budget;
            }
            info!(
                max_concurrent = ledger.max_concurrent,
                memory_limit_mb = ledger.memory_limit_mb,
                "Admission limits adjusted"
            );
        }
        self.shared.changed.notify_waiters();
    }

    pub fn status(&self) -> ResourceStatus {
        let ledger = self.shared.ledger();
        let utilization = ledger.utilization();
        let state = if utilization >= self.overloaded_threshold {
            ResourceState::Overloaded
        } else if utilization >= self.busy_threshold {
            ResourceState::Busy
        } else {
            ResourceState::Available
        };

        ResourceStatus {
            running: ledger.running,
            queued: ledger.queue.len(),
            max_concurrent: ledger.max_concurrent,
            memory_used_mb: ledger.memory_used_mb,
            memory_limit_mb: ledger.memory_limit_mb,
            utilization,
            state,
        }
    }

    /// Cancel every queued submission, then wait for running work to finish.
    ///
    /// Returns how many submissions were cancelled.
    pub async fn cleanup(&self) -> usize {
        let drained = {
            let mut ledger = self.shared.ledger();
            let drained = ledger.queue.drain();
            for entry in &drained {
                ledger.cancelled.insert(entry.ticket);
            }
            drained.len()
        };
        self.shared.changed.notify_waiters();
        if drained > 0 {
            info!(cancelled = drained, "Drained admission queue");
        }

        loop {
            let changed = self.shared.changed.notified();
            if self.shared.ledger().running == 0 {
                break;
            }
            let _ = tokio::time::timeout(self.poll_interval, changed).await;
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::{mpsc, oneshot};

    use crate::task::TaskSpec;

    fn config(max_concurrent: usize, memory_budget_mb: u64) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent,
            memory_budget_mb,
            admission_timeout: Duration::from_secs(5),
            admission_poll_interval: Duration::from_millis(20),
            ..OrchestratorConfig::default()
        }
    }

    fn task(spec: TaskSpec) -> Task {
        Task::from_spec("research", spec, Duration::from_secs(5), 0)
    }

    fn sized(memory_mb: u64) -> Task {
        task(TaskSpec::new().with_param("memory_mb", memory_mb))
    }

    #[tokio::test]
    async fn admits_within_limits_and_releases() {
        let controller = AdmissionController::new(&config(2, 2048));

        let guard = controller.admit(&sized(500), || {}).await.unwrap();
        let status = controller.status();
        assert_eq!(status.running, 1);
        assert_eq!(status.memory_used_mb, 500);

        drop(guard);
        let status = controller.status();
        assert_eq!(status.running, 0);
        assert_eq!(status.memory_used_mb, 0);
        assert_eq!(status.state, ResourceState::Available);
    }

    #[tokio::test]
    async fn memory_budget_queues_third_task() {
        let controller = Arc::new(AdmissionController::new(&config(10, 2048)));
        let first = controller.admit(&sized(800), || {}).await.unwrap();
        let _second = controller.admit(&sized(800), || {}).await.unwrap();

        let third = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .admit(&sized(800), || {})
                    .await
                    .map(|g| g.memory_mb())
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = controller.status();
        assert_eq!(status.running, 2);
        assert_eq!(status.queued, 1);

        drop(first);
        assert_eq!(third.await.unwrap().unwrap(), 800);
    }

    #[tokio::test]
    async fn higher_priority_is_admitted_first() {
        let controller = Arc::new(AdmissionController::new(&config(1, 4096)));
        let blocker = controller.admit(&task(TaskSpec::new()), || {}).await.unwrap();

        let (order_tx, mut order_rx) = mpsc::unbounded_channel();
        let mut handles = Vec::new();
        for (label, priority) in [("B", 1), ("A", 5)] {
            let controller = controller.clone();
            let order_tx = order_tx.clone();
            let (queued_tx, queued_rx) = oneshot::channel();
            handles.push(tokio::spawn(async move {
                let t = task(TaskSpec::new().with_priority(priority));
                controller
                    .submit(
                        &t,
                        move || {
                            let _ = queued_tx.send(());
                        },
                        move || async move {
                            let _ = order_tx.send(label);
                        },
                    )
                    .await
            }));
            queued_rx.await.unwrap();
        }

        drop(blocker);
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(order_rx.recv().await, Some("A"));
        assert_eq!(order_rx.recv().await, Some("B"));
    }

    #[tokio::test]
    async fn newcomer_only_skips_lower_priority_queue() {
        let controller = Arc::new(AdmissionController::new(&config(4, 1024)));
        let _small = controller.admit(&sized(100), || {}).await.unwrap();

        // Queued behind the running task: too large to share the budget.
        let (queued_tx, queued_rx) = oneshot::channel();
        let _big = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .admit(&sized(4000), move || {
                        let _ = queued_tx.send(());
                    })
                    .await
                    .is_ok()
            })
        };
        queued_rx.await.unwrap();

        let queued = Arc::new(AtomicUsize::new(0));
        let equal = {
            let controller = controller.clone();
            let queued = queued.clone();
            tokio::spawn(async move {
                let _ = controller
                    .admit(&sized(100), move || {
                        queued.fetch_add(1, Ordering::SeqCst);
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queued.load(Ordering::SeqCst), 1);
        assert_eq!(controller.status().queued, 2);

        let urgent = task(TaskSpec::new().with_param("memory_mb", 100).with_priority(1));
        let guard = controller
            .admit(&urgent, || panic!("higher priority should not queue"))
            .await
            .unwrap();
        assert_eq!(guard.memory_mb(), 100);
        equal.abort();
    }

    #[tokio::test]
    async fn queued_task_times_out() {
        let controller = AdmissionController::new(&OrchestratorConfig {
            admission_timeout: Duration::from_millis(60),
            ..config(1, 4096)
        });
        let _blocker = controller.admit(&task(TaskSpec::new()), || {}).await.unwrap();

        let err = controller
            .admit(&task(TaskSpec::new()), || {})
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TaskError::AdmissionTimeout { waited, .. } if waited >= Duration::from_millis(60)));
        assert_eq!(controller.status().queued, 0);
    }

    #[tokio::test]
    async fn oversized_task_runs_alone() {
        let controller = Arc::new(AdmissionController::new(&config(4, 1024)));
        let small = controller.admit(&sized(100), || {}).await.unwrap();

        let big = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.admit(&sized(4000), || {}).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.status().queued, 1);

        drop(small);
        assert!(big.await.unwrap());
    }

    #[tokio::test]
    async fn raising_concurrency_wakes_waiters() {
        let controller = Arc::new(AdmissionController::new(&OrchestratorConfig {
            // Long poll so only the wakeup can admit in time.
            admission_poll_interval: Duration::from_secs(30),
            ..config(1, 4096)
        }));
        let _blocker = controller.admit(&task(TaskSpec::new()), || {}).await.unwrap();

        let (queued_tx, queued_rx) = oneshot::channel();
        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .admit(&task(TaskSpec::new()), move || {
                        let _ = queued_tx.send(());
                    })
                    .await
                    .is_ok()
            })
        };
        queued_rx.await.unwrap();

        controller.adjust_limits(Some(2), None);
        let admitted = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(admitted);
        assert_eq!(controller.status().running, 2);
    }

    #[tokio::test]
    async fn cleanup_cancels_queued_and_waits_for_running() {
        let controller = Arc::new(AdmissionController::new(&config(1, 4096)));
        let blocker = controller.admit(&task(TaskSpec::new()), || {}).await.unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        let (queued_tx, queued_rx) = oneshot::channel();
        let waiter = {
            let controller = controller.clone();
            let ran = ran.clone();
            tokio::spawn(async move {
                controller
                    .submit(
                        &task(TaskSpec::new()),
                        move || {
                            let _ = queued_tx.send(());
                        },
                        move || async move {
                            ran.fetch_add(1, Ordering::SeqCst);
                        },
                    )
                    .await
            })
        };
        queued_rx.await.unwrap();

        let cleanup = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.cleanup().await })
        };
        assert!(matches!(
            waiter.await.unwrap(),
            Err(TaskError::Cancelled { .. })
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!cleanup.is_finished());

        drop(blocker);
        assert_eq!(cleanup.await.unwrap(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn abandoned_waiter_leaves_the_queue() {
        let controller = Arc::new(AdmissionController::new(&config(1, 4096)));
        let blocker = controller.admit(&task(TaskSpec::new()), || {}).await.unwrap();

        let (queued_tx, queued_rx) = oneshot::channel();
        let abandoned = {
            let controller = controller.clone();
            tokio::spawn(async move {
                let _ = controller
                    .admit(&task(TaskSpec::new()), move || {
                        let _ = queued_tx.send(());
                    })
                    .await;
            })
        };
        queued_rx.await.unwrap();
        abandoned.abort();
        let _ = abandoned.await;
        assert_eq!(controller.status().queued, 0);

        let (queued_tx, queued_rx) = oneshot::channel();
        let next = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .admit(&task(TaskSpec::new()), move || {
                        let _ = queued_tx.send(());
                    })
                    .await
                    .is_ok()
            })
        };
        queued_rx.await.unwrap();

        drop(blocker);
        let admitted = tokio::time::timeout(Duration::from_secs(1), next)
            .await
            .unwrap()
            .unwrap();
        assert!(admitted);
    }

    #[tokio::test]
    async fn cancelled_ticket_is_forgotten_when_submitter_is_gone() {
        let controller = AdmissionController::new(&config(1, 4096));
        let blocker = controller.admit(&task(TaskSpec::new()), || {}).await.unwrap();

        let queued = task(TaskSpec::new());
        let mut waiter = Box::pin(controller.admit(&queued, || {}));
        assert!(
            tokio::time::timeout(Duration::from_millis(20), &mut waiter)
                .await
                .is_err()
        );
        assert_eq!(controller.status().queued, 1);

        drop(blocker);
        assert_eq!(controller.cleanup().await, 1);
        assert_eq!(controller.shared.ledger().cancelled.len(), 1);

        // The submitter gives up without observing the cancellation.
        drop(waiter);
        assert!(controller.shared.ledger().cancelled.is_empty());
    }

    #[tokio::test]
    async fn huge_reservation_does_not_overflow_the_ledger() {
        let controller = Arc::new(AdmissionController::new(&config(4, 2048)));
        let huge = task(TaskSpec::new().with_param("memory_mb", 1e30));
        let guard = controller.admit(&huge, || {}).await.unwrap();
        assert!(controller.status().memory_used_mb > 2048);

        let small = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .admit(&sized(10), || {})
                    .await
                    .map(|g| g.memory_mb())
            })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(controller.status().queued, 1);
        assert_eq!(controller.status().state, ResourceState::Overloaded);

        drop(guard);
        assert_eq!(small.await.unwrap().unwrap(), 10);
    }

    #[tokio::test]
    async fn raising_memory_budget_wakes_waiters() {
        let controller = Arc::new(AdmissionController::new(&OrchestratorConfig {
            admission_poll_interval: Duration::from_secs(30),
            ..config(10, 1000)
        }));
        let _first = controller.admit(&sized(600), || {}).await.unwrap();

        let (queued_tx, queued_rx) = oneshot::channel();
        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .admit(&sized(600), move || {
                        let _ = queued_tx.send(());
                    })
                    .await
                    .is_ok()
            })
        };
        queued_rx.await.unwrap();

        controller.adjust_limits(None, Some(2000));
        let admitted = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(admitted);
        let status = controller.status();
        assert_eq!(status.memory_limit_mb, 2000);
        assert_eq!(status.memory_used_mb, 1200);
    }

    #[test]
    fn status_thresholds() {
        let controller = AdmissionController::new(&config(10, 1000));
        {
            let mut ledger = controller.shared.ledger();
            ledger.reserve(700);
        }
        assert_eq!(controller.status().state, ResourceState::Busy);
        {
            let mut ledger = controller.shared.ledger();
            ledger.reserve(200);
        }
        let status = controller.status();
        assert_eq!(status.state, ResourceState::Overloaded);
        assert!((status.utilization - 0.9).abs() < 1e-9);
    }
}
