//! Workflow documents — the persisted record of a case and its audit trail.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkflowError;
use crate::workflow::state::{CANONICAL_PHASES, WorkflowState};

/// Prefix for workflow document keys in the persistence gateway.
pub const WORKFLOW_KEY_PREFIX: &str = "workflow_";

/// Gateway key for a workflow id.
pub fn workflow_key(workflow_id: &str) -> String {
    format!("{WORKFLOW_KEY_PREFIX}{workflow_id}")
}

/// One accepted edge in the transition log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub timestamp: DateTime<Utc>,
    /// Output keys merged by this transition.
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Persisted state of one research case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub workflow_id: String,
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Case metadata supplied at creation.
    #[serde(default)]
    pub metadata: Value,
    /// Phase outputs accumulated across transitions.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,
}

impl WorkflowDocument {
    /// Create a document in the initial state.
    pub fn new(workflow_id: impl Into<String>, metadata: Value) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            state: WorkflowState::Created,
            created_at: now,
            updated_at: now,
            metadata,
            outputs: BTreeMap::new(),
            transitions: Vec::new(),
        }
    }

    /// Apply a validated transition, merging `data` into the accumulated outputs.
    ///
    /// Object data merges key by key; any other non-null value is stored under
    /// the target state's name. The document is untouched when the edge is not
    /// in the transition table.
    pub fn apply_transition(
        &mut self,
        target: WorkflowState,
        data: Value,
    ) -> Result<TransitionRecord, WorkflowError> {
        if !self.state.can_transition_to(target) {
            return Err(WorkflowError::InvalidTransition {
                id: self.workflow_id.clone(),
                from: self.state,
                to: target,
            });
        }

        let mut keys = Vec::new();
        match data {
            Value::Null => {}
            Value::Object(map) => {
                for (key, value) in map {
                    keys.push(key.clone());
                    self.outputs.insert(key, value);
                }
            }
            other => {
                let key = target.as_str().to_ascii_lowercase();
                keys.push(key.clone());
                self.outputs.insert(key, other);
            }
        }

        let now = Utc::now();
        let record = TransitionRecord {
            from: self.state,
            to: target,
            timestamp: now,
            keys,
        };
        self.transitions.push(record.clone());
        self.state = target;
        self.updated_at = now;

        Ok(record)
    }

    /// The current state if it is canonical, else the most recent canonical
    /// state in the transition log.
    fn last_canonical_phase(&self) -> Option<WorkflowState> {
        if self.state.canonical_phase().is_some() {
            return Some(self.state);
        }
        self.transitions
            .iter()
            .rev()
            .flat_map(|t| [t.to, t.from])
            .find(|s| s.canonical_phase().is_some())
    }

    /// Position of this case in the canonical phase list.
    pub fn progress(&self) -> WorkflowProgress {
        let phase_state = self.last_canonical_phase();
        let phase = phase_state.and_then(|s| s.canonical_phase()).unwrap_or(0);
        let total_phases = CANONICAL_PHASES.len();

        WorkflowProgress {
            workflow_id: self.workflow_id.clone(),
            state: self.state,
            phase,
            total_phases,
            phase_name: phase_state,
            percent: (phase as f64 / total_phases as f64) * 100.0,
            terminal: self.state.is_terminal(),
        }
    }
}

/// Progress report for a workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowProgress {
    pub workflow_id: String,
    pub state: WorkflowState,
    /// 1-based canonical phase reached, 0 before intake starts.
    pub phase: usize,
    pub total_phases: usize,
    pub phase_name: Option<WorkflowState>,
    pub percent: f64,
    pub terminal: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_document_starts_created() {
        let doc = WorkflowDocument::new("wf-1", json!({"case": "acme"}));
        assert_eq!(doc.state, WorkflowState::Created);
        assert!(doc.transitions.is_empty());
        assert_eq!(doc.progress().phase, 0);
    }

    #[test]
    fn transition_merges_object_outputs() {
        let mut doc = WorkflowDocument::new("wf-1", Value::Null);
        let record = doc
            .apply_transition(
                WorkflowState::IntakeProcessing,
                json!({"intake_summary": "ok", "documents": 3}),
            )
            .unwrap();
        assert_eq!(record.from, WorkflowState::Created);
        assert_eq!(record.keys, vec!["documents", "intake_summary"]);
        assert_eq!(doc.outputs.get("documents"), Some(&json!(3)));
    }

    #[test]
    fn scalar_outputs_keyed_by_target_state() {
        let mut doc = WorkflowDocument::new("wf-1", Value::Null);
        doc.apply_transition(WorkflowState::IntakeProcessing, json!("started"))
            .unwrap();
        assert_eq!(
            doc.outputs.get("intake_processing"),
            Some(&json!("started"))
        );
    }

    #[test]
    fn rejected_transition_leaves_document_untouched() {
        let mut doc = WorkflowDocument::new("wf-1", Value::Null);
        let before = doc.clone();
        let err = doc
            .apply_transition(WorkflowState::Completed, json!({"x": 1}))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert_eq!(doc, before);
    }

    #[test]
    fn off_list_state_reports_last_canonical_phase() {
        let mut doc = WorkflowDocument::new("wf-1", Value::Null);
        doc.apply_transition(WorkflowState::IntakeProcessing, Value::Null)
            .unwrap();
        doc.apply_transition(WorkflowState::IntakeComplete, Value::Null)
            .unwrap();
        doc.apply_transition(WorkflowState::ChatInteractive, Value::Null)
            .unwrap();
        doc.apply_transition(WorkflowState::ManagerReview, Value::Null)
            .unwrap();

        let progress = doc.progress();
        assert_eq!(progress.state, WorkflowState::ManagerReview);
        assert_eq!(progress.phase, 2);
        assert_eq!(progress.phase_name, Some(WorkflowState::IntakeComplete));
    }

    #[test]
    fn completed_reports_full_progress() {
        let mut doc = WorkflowDocument::new("wf-1", Value::Null);
        for state in CANONICAL_PHASES {
            doc.apply_transition(state, Value::Null).unwrap();
        }
        let progress = doc.progress();
        assert_eq!(progress.phase, 7);
        assert!(progress.terminal);
        assert!((progress.percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn document_json_uses_iso_timestamps() {
        let doc = WorkflowDocument::new("wf-1", Value::Null);
        let json = serde_json::to_value(&doc).unwrap();
        let created = json["created_at"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(created).is_ok());
        assert_eq!(json["state"], "CREATED");
        assert_eq!(workflow_key("wf-1"), "workflow_wf-1");
    }
}
