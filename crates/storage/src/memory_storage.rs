//! In-memory storage implementation.
//!
//! Used by tests and by embedders that supply their own persistence. It also
//! implements both sinks so tests can assert on approvals and activity.

use std::collections::HashMap;
use async_trait::async_trait;
use mission_core::{
    ActivityEvent, AgentId, AgentProfile, ApprovalRequest, ClaimRequest, Mission, MissionId,
    MissionPatch, Task, TaskFilter, TaskId, TaskPatch,
};
use tokio::sync::{broadcast, RwLock};

use crate::change::{ChangeEvent, ChangeFeed};
use crate::sinks::{ActivitySink, ApprovalSink};
use crate::trait_::{Result, Storage, StorageError};

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<TaskId, Task>,
    missions: HashMap<MissionId, Mission>,
    agents: HashMap<AgentId, AgentProfile>,
    approvals: Vec<ApprovalRequest>,
    activity: Vec<ActivityEvent>,
}

/// Storage held entirely in memory.
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
    feed: ChangeFeed,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Approval requests recorded so far.
    pub async fn approvals(&self) -> Vec<ApprovalRequest> {
        self.state.read().await.approvals.clone()
    }

    /// Activity recorded so far.
    pub async fn activity(&self) -> Vec<ActivityEvent> {
        self.state.read().await.activity.clone()
    }

    /// Replace a task row without publishing, as a foreign writer racing the
    /// change feed would.
    pub async fn overwrite_task_silently(&self, task: Task) {
        self.state.write().await.tasks.insert(task.id.clone(), task);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_task(&self, task: &Task) -> Result<()> {
        self.state.write().await.tasks.insert(task.id.clone(), task.clone());
        self.feed.task(task);
        Ok(())
    }

    async fn load_task(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.state.read().await.tasks.get(id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn patch_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task> {
        let updated = {
            let mut state = self.state.write().await;
            let task = state
                .tasks
                .get_mut(id)
                .ok_or_else(|| StorageError::NotFound(format!("task {}", id)))?;
            patch.apply(task, chrono::Utc::now());
            task.clone()
        };
        self.feed.task(&updated);
        Ok(updated)
    }

    async fn save_mission(&self, mission: &Mission) -> Result<()> {
        self.state
            .write()
            .await
            .missions
            .insert(mission.id.clone(), mission.clone());
        self.feed.mission(mission);
        Ok(())
    }

    async fn load_mission(&self, id: &MissionId) -> Result<Option<Mission>> {
        Ok(self.state.read().await.missions.get(id).cloned())
    }

    async fn list_missions(&self) -> Result<Vec<Mission>> {
        let state = self.state.read().await;
        let mut missions: Vec<Mission> = state.missions.values().cloned().collect();
        missions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(missions)
    }

    async fn patch_mission(&self, id: &MissionId, patch: &MissionPatch) -> Result<Mission> {
        let updated = {
            let mut state = self.state.write().await;
            let mission = state
                .missions
                .get_mut(id)
                .ok_or_else(|| StorageError::NotFound(format!("mission {}", id)))?;
            patch.apply(mission, chrono::Utc::now());
            mission.clone()
        };
        self.feed.mission(&updated);
        Ok(updated)
    }

    async fn claim_mission(&self, id: &MissionId, claim: &ClaimRequest) -> Result<Option<Mission>> {
        let claimed = {
            let mut state = self.state.write().await;
            match state.missions.get_mut(id) {
                Some(mission) if claim.guard_holds(mission) => {
                    claim.apply(mission, chrono::Utc::now());
                    Some(mission.clone())
                }
                _ => None,
            }
        };
        if let Some(mission) = &claimed {
            self.feed.mission(mission);
        }
        Ok(claimed)
    }

    async fn save_agent(&self, agent: &AgentProfile) -> Result<()> {
        self.state.write().await.agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn load_agent(&self, id: &AgentId) -> Result<Option<AgentProfile>> {
        Ok(self.state.read().await.agents.get(id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<AgentProfile>> {
        let mut agents: Vec<AgentProfile> =
            self.state.read().await.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }
}

#[async_trait]
impl ApprovalSink for MemoryStorage {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()> {
        self.state.write().await.approvals.push(request.clone());
        Ok(())
    }
}

#[async_trait]
impl ActivitySink for MemoryStorage {
    async fn record(&self, event: &ActivityEvent) -> Result<()> {
        self.state.write().await.activity.push(event.clone());
        Ok(())
    }
}
