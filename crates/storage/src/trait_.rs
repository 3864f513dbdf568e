//! Storage trait abstraction.

use async_trait::async_trait;
use mission_core::{
    AgentId, AgentProfile, ClaimRequest, Mission, MissionId, MissionPatch, Task, TaskFilter,
    TaskId, TaskPatch,
};
use tokio::sync::broadcast;

use crate::change::ChangeEvent;

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP sink error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write rejected because the row changed underneath
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// The backing store the engine reads from and writes to.
///
/// Writes are partial-field patches stamped with the store's clock. Every
/// successful write is published on the change feed.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Task operations ===

    /// Save a task (create or replace).
    async fn save_task(&self, task: &Task) -> Result<()>;

    /// Load a task by ID.
    async fn load_task(&self, id: &TaskId) -> Result<Option<Task>>;

    /// List tasks matching the filter, oldest first.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Apply a partial update and return the updated row.
    async fn patch_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task>;

    // === Mission operations ===

    /// Save a mission (create or replace).
    async fn save_mission(&self, mission: &Mission) -> Result<()>;

    /// Load a mission by ID.
    async fn load_mission(&self, id: &MissionId) -> Result<Option<Mission>>;

    /// List all missions.
    async fn list_missions(&self) -> Result<Vec<Mission>>;

    /// Apply a partial update and return the updated row.
    async fn patch_mission(&self, id: &MissionId, patch: &MissionPatch) -> Result<Mission>;

    /// Conditionally claim a mission.
    ///
    /// Returns the updated row only if the guard held and the write applied;
    /// `None` means another writer already moved the mission.
    async fn claim_mission(&self, id: &MissionId, claim: &ClaimRequest) -> Result<Option<Mission>>;

    // === Agent operations ===

    /// Save an agent profile.
    async fn save_agent(&self, agent: &AgentProfile) -> Result<()>;

    /// Load an agent profile.
    async fn load_agent(&self, id: &AgentId) -> Result<Option<AgentProfile>>;

    /// List all agent profiles.
    async fn list_agents(&self) -> Result<Vec<AgentProfile>>;

    // === Change feed ===

    /// Subscribe to row changes, including writes from other processes.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}
