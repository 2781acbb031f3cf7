//! Resource admission for task execution.
//!
//! - `estimate` — per-task memory cost
//! - `queue` — priority-ordered wait queue
//! - `controller` — slots, memory ledger, waiting, cleanup

pub mod controller;
pub mod estimate;
pub mod queue;

pub use controller::{AdmissionController, AdmissionGuard, ResourceState, ResourceStatus};
pub use estimate::MemoryEstimator;
pub use queue::{AdmissionQueue, QueuedEntry};
