//! Tasks — the units of work the orchestrator admits and dispatches.

pub mod model;

pub use model::{Task, TaskParams, TaskSpec, TaskStatus};
