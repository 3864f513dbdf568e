//! Pending approval records for the external approver.

use serde::{Deserialize, Serialize};
use crate::agent::AgentLevel;
use crate::id::{AgentId, MissionId, TaskId};
use crate::Time;

/// How an approval request should be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalGate {
    /// A human must approve (levels 1-2)
    HumanRequired,
    /// Guardrail review (level 3)
    GuardrailCheck,
    /// The agent approves itself (level 4)
    SelfApproved,
}

/// A request written to the approval sink. The engine never resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Blocked task
    pub task_id: TaskId,
    /// Mission of the task
    pub mission_id: MissionId,
    /// Agent that needs approval
    pub agent_id: AgentId,
    /// Agent's level at request time
    pub agent_level: AgentLevel,
    /// Why approval is needed
    pub reason: String,
    /// Routing tag
    pub approval_gate: ApprovalGate,
    /// Preferred approver
    #[serde(default)]
    pub escalation_agent_id: Option<AgentId>,
    /// When the request was made
    pub requested_at: Time,
}
