//! Run checkpoints - ephemeral per-task launch records.

use serde::{Deserialize, Serialize};
use crate::id::{AgentId, TaskId};
use crate::task::RunPhase;
use crate::Time;

/// State captured before a run launches, kept until the run ends.
///
/// Used to detect repeated connection loss for the same task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    /// Task being executed
    pub task_id: TaskId,

    /// Phase of the run
    pub phase: RunPhase,

    /// Agent executing the run
    pub agent_id: AgentId,

    /// Prompt sent to the gateway
    pub prompt: String,

    /// Streamed output so far
    pub buffer: String,

    /// Last update
    pub timestamp: Time,

    /// Times the connection dropped while this run was in flight
    pub connection_drops: u32,
}

impl RunCheckpoint {
    /// Checkpoint for a run about to launch.
    pub fn new(task_id: TaskId, phase: RunPhase, agent_id: AgentId, prompt: impl Into<String>) -> Self {
        Self {
            task_id,
            phase,
            agent_id,
            prompt: prompt.into(),
            buffer: String::new(),
            timestamp: chrono::Utc::now(),
            connection_drops: 0,
        }
    }
}
