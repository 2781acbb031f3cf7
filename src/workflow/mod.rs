//! Workflow tracking for multi-phase research cases.
//!
//! - `state` — states, transition table, canonical phases
//! - `document` — the persisted case record and its transition log
//! - `machine` — validated, persisted transitions with per-document locking

pub mod document;
pub mod machine;
pub mod state;

pub use document::{TransitionRecord, WorkflowDocument, WorkflowProgress, workflow_key};
pub use machine::WorkflowStateMachine;
pub use state::{CANONICAL_PHASES, WorkflowState};
