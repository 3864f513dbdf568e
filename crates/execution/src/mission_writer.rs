//! Serialized per-mission aggregate writes.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use mission_core::{MissionId, MissionPatch, MissionStatus, TaskFilter};
use mission_progress::MissionView;
use mission_storage::{Result, Storage};

/// Funnels aggregate status writes through one async lock per mission.
#[derive(Default)]
pub struct MissionWriter {
    locks: Mutex<HashMap<MissionId, Arc<Mutex<()>>>>,
}

impl MissionWriter {
    /// Create a writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the mission's write lock.
    pub async fn lock(&self, mission_id: &MissionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(mission_id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Recompute the mission's aggregate from its tasks and store it if it
    /// changed. Returns the status written, if any.
    pub async fn refresh(
        &self,
        storage: &dyn Storage,
        mission_id: &MissionId,
    ) -> Result<Option<MissionStatus>> {
        let _guard = self.lock(mission_id).await;

        let Some(mission) = storage.load_mission(mission_id).await? else {
            return Ok(None);
        };
        if mission.status == MissionStatus::Draft {
            return Ok(None);
        }
        let tasks = storage.list_tasks(&TaskFilter::mission(mission_id)).await?;
        let view = MissionView::new(mission_id.clone(), tasks);

        match view.aggregate_status() {
            Some(status) if status != mission.status => {
                storage
                    .patch_mission(mission_id, &MissionPatch::status(status))
                    .await?;
                tracing::info!("Mission {} is now {}", mission_id, status);
                Ok(Some(status))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_core::{Mission, Task, TaskStatus};
    use mission_storage::MemoryStorage;

    #[tokio::test]
    async fn refresh_writes_only_changes() {
        let storage = MemoryStorage::new();
        let mut mission = Mission::new(MissionId::from("m1"), "M");
        mission.status = MissionStatus::InProgress;
        storage.save_mission(&mission).await.unwrap();

        let mut task = Task::new(&mission.id, "t");
        task.status = TaskStatus::Done;
        storage.save_task(&task).await.unwrap();

        let writer = MissionWriter::new();
        assert_eq!(
            writer.refresh(&storage, &mission.id).await.unwrap(),
            Some(MissionStatus::Done)
        );
        assert_eq!(writer.refresh(&storage, &mission.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_refreshes_serialize() {
        let storage = Arc::new(MemoryStorage::new());
        let mission = Mission::new(MissionId::from("m1"), "M");
        storage.save_mission(&mission).await.unwrap();
        let mut task = Task::new(&mission.id, "t");
        task.status = TaskStatus::Blocked;
        storage.save_task(&task).await.unwrap();

        let writer = Arc::new(MissionWriter::new());
        let mut rx = storage.subscribe();
        let (a, b) = tokio::join!(
            writer.refresh(storage.as_ref(), &mission.id),
            writer.refresh(storage.as_ref(), &mission.id)
        );
        let writes = [a.unwrap(), b.unwrap()].iter().filter(|s| s.is_some()).count();
        assert_eq!(writes, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
