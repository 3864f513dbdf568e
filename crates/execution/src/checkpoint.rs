//! Ephemeral run checkpoints keyed by task.

use std::collections::HashMap;
use mission_core::{RunCheckpoint, TaskId};

/// Checkpoints for runs in flight.
#[derive(Debug, Default)]
pub struct CheckpointStore {
    checkpoints: HashMap<TaskId, RunCheckpoint>,
}

impl CheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a checkpoint before launch, replacing any previous one.
    pub fn create(&mut self, checkpoint: RunCheckpoint) {
        self.checkpoints.insert(checkpoint.task_id.clone(), checkpoint);
    }

    /// Checkpoint for a task.
    pub fn get(&self, task_id: &TaskId) -> Option<&RunCheckpoint> {
        self.checkpoints.get(task_id)
    }

    /// Mirror the streamed buffer.
    pub fn update_buffer(&mut self, task_id: &TaskId, buffer: &str) {
        if let Some(cp) = self.checkpoints.get_mut(task_id) {
            cp.buffer = buffer.to_string();
            cp.timestamp = chrono::Utc::now();
        }
    }

    /// Count a connection drop; returns the new total.
    pub fn record_drop(&mut self, task_id: &TaskId) -> Option<u32> {
        let cp = self.checkpoints.get_mut(task_id)?;
        cp.connection_drops += 1;
        cp.timestamp = chrono::Utc::now();
        Some(cp.connection_drops)
    }

    /// Discard a checkpoint.
    pub fn remove(&mut self, task_id: &TaskId) -> Option<RunCheckpoint> {
        self.checkpoints.remove(task_id)
    }

    /// Tasks with a checkpoint.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.checkpoints.keys().cloned().collect()
    }

    /// Number of checkpoints.
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    /// Whether there are none.
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_core::{AgentId, RunPhase};

    #[test]
    fn drops_accumulate_until_removed() {
        let mut store = CheckpointStore::new();
        let task = TaskId::from("t1");
        store.create(RunCheckpoint::new(task.clone(), RunPhase::Primary, AgentId::from("a"), "do it"));

        assert_eq!(store.record_drop(&task), Some(1));
        assert_eq!(store.record_drop(&task), Some(2));
        store.update_buffer(&task, "partial");
        assert_eq!(store.get(&task).unwrap().buffer, "partial");

        assert!(store.remove(&task).is_some());
        assert_eq!(store.record_drop(&task), None);
        assert!(store.is_empty());
    }
}
