//! Research Orchestrator — workflow tracking, task dispatch, and resource admission.

pub mod admission;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod store;
pub mod task;
pub mod worker;
pub mod workflow;

pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, OrchestratorStatus};
