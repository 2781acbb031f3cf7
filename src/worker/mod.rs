//! Worker system — pooled workers with coordinated dispatch.
//!
//! Core components:
//! - `worker` — Worker trait, factories, closure adapter
//! - `pool` — one memoized worker per kind with an exclusive lease
//! - `coordinator` — dispatch with timeout, retry, and bounded batches

pub mod coordinator;
pub mod pool;
pub mod worker;

pub use coordinator::{TaskCoordinator, TaskSummary};
pub use pool::{WorkerHandle, WorkerLease, WorkerPool};
pub use worker::{FnWorker, Worker, WorkerFactory, WorkerRegistry};
