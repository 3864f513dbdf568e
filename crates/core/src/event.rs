//! Activity events - the append-only diagnostic log.

use crate::id::{AgentId, EventId, MissionId, TaskId};
use crate::Time;
use serde::{Deserialize, Serialize};

/// Kinds of activity the engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    TaskStarted,
    TaskBlocked,
    TaskCompleted,
    TaskFailed,
    ReviewStarted,
    ReviewApproved,
    ReviewRevised,
    ReviewRedo,
    RevisionLimitReached,
    CircuitBreaker,
    TaskRecovered,
    RunTimedOut,
    ConnectionLost,
    ConnectionRestored,
    MissionClaimed,
    ClaimLost,
    ApprovalRequested,
    ProofAttached,
    OrphanPurged,
}

/// An event is an atomic record of something the engine did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Unique identifier
    pub id: EventId,

    /// What happened
    pub kind: ActivityKind,

    /// Related task
    pub task_id: Option<TaskId>,

    /// Related mission
    pub mission_id: Option<MissionId>,

    /// Related agent
    pub agent_id: Option<AgentId>,

    /// Human-readable detail
    pub message: String,

    /// When it happened
    pub created_at: Time,
}

impl ActivityEvent {
    /// Create a new event.
    pub fn new(kind: ActivityKind, message: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            kind,
            task_id: None,
            mission_id: None,
            agent_id: None,
            message: message.into(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Attach the task and its mission.
    pub fn for_task(mut self, task: &crate::Task) -> Self {
        self.task_id = Some(task.id.clone());
        self.mission_id = Some(task.mission_id());
        self
    }

    /// Attach a mission.
    pub fn for_mission(mut self, mission: &MissionId) -> Self {
        self.mission_id = Some(mission.clone());
        self
    }

    /// Attach an agent.
    pub fn by_agent(mut self, agent: Option<&AgentId>) -> Self {
        self.agent_id = agent.cloned();
        self
    }
}
