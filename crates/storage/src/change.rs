//! Change feed for row mutations.
//!
//! Wraps `tokio::sync::broadcast` so every subscriber (the orchestrator, a
//! status view) receives its own copy. Slow subscribers lag instead of
//! blocking writers.

use std::sync::Arc;
use mission_core::{Mission, Task};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// A row that changed in the backing store.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A task row was written
    Task(Box<Task>),
    /// A mission row was written
    Mission(Box<Mission>),
}

/// Broadcast sender shared by a store and its clones.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: Arc<broadcast::Sender<ChangeEvent>>,
}

impl ChangeFeed {
    /// Create a feed with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a feed with a specific capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    /// Publish a task write.
    pub fn task(&self, task: &Task) {
        // No receivers is fine.
        let _ = self.tx.send(ChangeEvent::Task(Box::new(task.clone())));
    }

    /// Publish a mission write.
    pub fn mission(&self, mission: &Mission) {
        let _ = self.tx.send(ChangeEvent::Mission(Box::new(mission.clone())));
    }

    /// Subscribe to future changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_task_writes() {
        let feed = ChangeFeed::new();
        let mut rx = feed.subscribe();
        let task = Task::standalone("t");
        feed.task(&task);

        match rx.recv().await.unwrap() {
            ChangeEvent::Task(t) => assert_eq!(t.id, task.id),
            other => panic!("unexpected change: {:?}", other),
        }
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let feed = ChangeFeed::new();
        feed.task(&Task::standalone("t"));
    }
}
