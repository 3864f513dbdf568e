//! Progress tracking service.

use std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use mission_core::{Mission, MissionId, MissionStatus, TaskFilter};
use mission_storage::{Storage, Result};

use crate::aggregate::{MissionIndex, MissionProgress, MissionView};

/// Progress tracking service.
#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// Get one mission's progress.
    async fn mission_progress(&self, mission_id: &MissionId) -> Result<Option<MissionSummary>>;

    /// Take a progress snapshot of every mission.
    async fn snapshot(&self) -> Result<ProgressSnapshot>;
}

/// A mission's stored row alongside what its tasks imply.
#[derive(Debug, Clone, Serialize)]
pub struct MissionSummary {
    /// Mission id
    pub mission_id: MissionId,
    /// Title, if a mission row exists
    pub title: Option<String>,
    /// Stored status, if a mission row exists
    pub stored_status: Option<MissionStatus>,
    /// Status implied by the live tasks
    pub derived_status: Option<MissionStatus>,
    /// Task counts
    pub progress: MissionProgress,
}

impl MissionSummary {
    fn new(mission: Option<&Mission>, view: Option<&MissionView>, id: MissionId) -> Self {
        Self {
            mission_id: id,
            title: mission.map(|m| m.title.clone()),
            stored_status: mission.map(|m| m.status),
            derived_status: view.and_then(|v| v.aggregate_status()),
            progress: view.map(|v| v.progress()).unwrap_or_default(),
        }
    }
}

/// A snapshot of progress at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    /// When snapshot was taken
    pub timestamp: DateTime<Utc>,

    /// One entry per mission, including task groups with no mission row
    pub missions: Vec<MissionSummary>,
}

/// Progress tracker reading straight from storage.
pub struct BasicProgressTracker<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> BasicProgressTracker<S> {
    /// Create a new progress tracker.
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl<S: Storage + 'static> ProgressTracker for BasicProgressTracker<S> {
    async fn mission_progress(&self, mission_id: &MissionId) -> Result<Option<MissionSummary>> {
        let mission = self.storage.load_mission(mission_id).await?;
        let tasks = self.storage.list_tasks(&TaskFilter::mission(mission_id)).await?;
        if mission.is_none() && tasks.is_empty() {
            return Ok(None);
        }
        let view = (!tasks.is_empty()).then(|| MissionView::new(mission_id.clone(), tasks));
        Ok(Some(MissionSummary::new(mission.as_ref(), view.as_ref(), mission_id.clone())))
    }

    async fn snapshot(&self) -> Result<ProgressSnapshot> {
        let missions = self.storage.list_missions().await?;
        let tasks = self.storage.list_tasks(&TaskFilter::default()).await?;
        let index = MissionIndex::build(&tasks);

        let mut summaries: Vec<MissionSummary> = missions
            .iter()
            .map(|m| MissionSummary::new(Some(m), index.get(&m.id), m.id.clone()))
            .collect();

        // Legacy task groups that never got a mission row.
        for view in index.views() {
            if !missions.iter().any(|m| m.id == view.mission_id) {
                summaries.push(MissionSummary::new(None, Some(view), view.mission_id.clone()));
            }
        }

        Ok(ProgressSnapshot {
            timestamp: Utc::now(),
            missions: summaries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_core::{Task, TaskStatus};
    use mission_storage::MemoryStorage;

    #[tokio::test]
    async fn snapshot_covers_rows_and_orphan_groups() {
        let storage = Arc::new(MemoryStorage::new());
        let mission = Mission::new(MissionId::from("m1"), "Launch");
        storage.save_mission(&mission).await.unwrap();

        let mut done = Task::new(&mission.id, "a");
        done.status = TaskStatus::Done;
        storage.save_task(&done).await.unwrap();
        storage.save_task(&Task::standalone("legacy")).await.unwrap();

        let tracker = BasicProgressTracker::new(storage);
        let snapshot = tracker.snapshot().await.unwrap();
        assert_eq!(snapshot.missions.len(), 2);

        let launch = &snapshot.missions[0];
        assert_eq!(launch.title.as_deref(), Some("Launch"));
        assert_eq!(launch.stored_status, Some(MissionStatus::Scheduled));
        assert_eq!(launch.derived_status, Some(MissionStatus::Done));
        assert_eq!(launch.progress.percentage(), 100.0);

        assert!(snapshot.missions[1].stored_status.is_none());
    }

    #[tokio::test]
    async fn unknown_mission_has_no_progress() {
        let tracker = BasicProgressTracker::new(Arc::new(MemoryStorage::new()));
        assert!(tracker.mission_progress(&MissionId::from("nope")).await.unwrap().is_none());
    }
}
