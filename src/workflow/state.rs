//! Workflow state machine — states, the transition table, and canonical phases.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// State of a research case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Created,
    IntakeProcessing,
    IntakeComplete,
    ManagerReview,
    ChatInteractive,
    ResearchInitiated,
    ResearchComplete,
    AnalysisComplete,
    ReportGeneration,
    Completed,
    Failed,
    Cancelled,
}

/// The ordered phases progress is reported against.
pub const CANONICAL_PHASES: [WorkflowState; 7] = [
    WorkflowState::IntakeProcessing,
    WorkflowState::IntakeComplete,
    WorkflowState::ResearchInitiated,
    WorkflowState::ResearchComplete,
    WorkflowState::AnalysisComplete,
    WorkflowState::ReportGeneration,
    WorkflowState::Completed,
];

impl WorkflowState {
    pub const ALL: [WorkflowState; 12] = [
        Self::Created,
        Self::IntakeProcessing,
        Self::IntakeComplete,
        Self::ManagerReview,
        Self::ChatInteractive,
        Self::ResearchInitiated,
        Self::ResearchComplete,
        Self::AnalysisComplete,
        Self::ReportGeneration,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// States reachable in one step from this one.
    pub fn next_states(&self) -> &'static [WorkflowState] {
        use WorkflowState::*;

        match self {
            Created => &[IntakeProcessing, Failed, Cancelled],
            IntakeProcessing => &[IntakeComplete, Failed, Cancelled],
            IntakeComplete => &[
                ManagerReview,
                ChatInteractive,
                ResearchInitiated,
                Failed,
                Cancelled,
            ],
            ManagerReview => &[ChatInteractive, ResearchInitiated, Failed, Cancelled],
            ChatInteractive => &[ManagerReview, ResearchInitiated, Failed, Cancelled],
            ResearchInitiated => &[ResearchComplete, Failed, Cancelled],
            ResearchComplete => &[AnalysisComplete, Failed, Cancelled],
            AnalysisComplete => &[ReportGeneration, Failed, Cancelled],
            ReportGeneration => &[Completed, Failed, Cancelled],
            Completed | Cancelled => &[],
            // Recovery restarts the case from the top.
            Failed => &[Created],
        }
    }

    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkflowState) -> bool {
        self.next_states().contains(&target)
    }

    /// Terminal states have no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// 1-based position in [`CANONICAL_PHASES`], or `None` for off-list states.
    pub fn canonical_phase(&self) -> Option<usize> {
        CANONICAL_PHASES
            .iter()
            .position(|s| s == self)
            .map(|idx| idx + 1)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::IntakeProcessing => "INTAKE_PROCESSING",
            Self::IntakeComplete => "INTAKE_COMPLETE",
            Self::ManagerReview => "MANAGER_REVIEW",
            Self::ChatInteractive => "CHAT_INTERACTIVE",
            Self::ResearchInitiated => "RESEARCH_INITIATED",
            Self::ResearchComplete => "RESEARCH_COMPLETE",
            Self::AnalysisComplete => "ANALYSIS_COMPLETE",
            Self::ReportGeneration => "REPORT_GENERATION",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| format!("Unknown workflow state: {s}"))
    }
}
