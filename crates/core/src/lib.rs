//! Mission orchestration core data models.
//!
//! This crate defines the tasks, missions, agents and records shared by the
//! scheduler, the storage layer and the guardrail and proof subsystems.

#![warn(missing_docs)]

// Core identities
mod id;

// Work model
mod task;
mod mission;
mod review;

// Agents and approvals
mod agent;
mod approval;

// Runtime records
mod checkpoint;
mod event;

pub use id::*;

pub use task::{Task, TaskStatus, RunPhase, TaskFilter, TaskPatch};
pub use mission::{
    Mission, MissionStatus, MissionPatch, CircuitBreaker, SessionKey, ClaimRequest,
};
pub use review::{ReviewAction, ReviewHistoryEntry};
pub use agent::{AgentLevel, AgentGuardrails, AgentProfile};
pub use approval::{ApprovalGate, ApprovalRequest};
pub use checkpoint::RunCheckpoint;
pub use event::{ActivityEvent, ActivityKind};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
