//! Review history - immutable records of review decisions.

use serde::{Deserialize, Serialize};
use crate::id::AgentId;
use crate::Time;

/// Decision a reviewer can take on a primary output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    /// Accept the output
    Approve,
    /// Keep the approach, fix specific issues
    Revise,
    /// Discard the approach and start over
    Redo,
}

impl ReviewAction {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Revise => "revise",
            Self::Redo => "redo",
        }
    }
}

impl std::fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One review round. Appended to `Task::review_history`, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewHistoryEntry {
    /// Revision round of the reviewed task
    pub round: u32,

    /// Decision taken
    pub action: ReviewAction,

    /// Short summary of the review
    pub summary: String,

    /// Reviewer confidence (0-1)
    pub confidence_score: f32,

    /// Concrete problems found
    #[serde(default)]
    pub specific_issues: Vec<String>,

    /// Instructions for the follow-up task
    #[serde(default)]
    pub new_instructions: Option<String>,

    /// Who reviewed
    pub reviewer_agent_id: AgentId,

    /// When the review finished
    pub reviewed_at: Time,
}
