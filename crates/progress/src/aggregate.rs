//! Grouping tasks into missions and deriving aggregate status.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use mission_core::{MissionId, MissionStatus, Task, TaskStatus};

/// Every task of one mission.
#[derive(Debug, Clone)]
pub struct MissionView {
    /// Mission id (the shared `root_task_id`)
    pub mission_id: MissionId,
    /// Tasks sharing the root, oldest first
    pub tasks: Vec<Task>,
}

impl MissionView {
    /// Create a view over a mission's tasks.
    pub fn new(mission_id: MissionId, mut tasks: Vec<Task>) -> Self {
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Self { mission_id, tasks }
    }

    /// Whether `task` is the legacy root placeholder of this mission.
    ///
    /// The root row only stands in for the mission when other tasks exist;
    /// alone, it is the mission's single executable task.
    pub fn is_placeholder(&self, task: &Task) -> bool {
        task.id.as_str() == self.mission_id.as_str() && self.tasks.len() > 1
    }

    /// Executable tasks.
    pub fn work_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |t| !self.is_placeholder(t))
    }

    /// Executable tasks not replaced by a revision or redo.
    pub fn live_tasks(&self) -> impl Iterator<Item = &Task> {
        self.work_tasks().filter(|t| !t.is_superseded())
    }

    /// Aggregate status implied by the live tasks.
    ///
    /// `None` means the tasks do not determine a status and the mission keeps
    /// whatever it has.
    pub fn aggregate_status(&self) -> Option<MissionStatus> {
        let live: Vec<&Task> = self.live_tasks().collect();
        if live.is_empty() {
            return None;
        }
        if live.iter().all(|t| t.status == TaskStatus::Done) {
            return Some(MissionStatus::Done);
        }
        if live.iter().all(|t| t.status.is_terminal()) {
            return Some(MissionStatus::Failed);
        }
        if live.iter().any(|t| t.status.is_running()) {
            return Some(MissionStatus::InProgress);
        }
        if live
            .iter()
            .filter(|t| !t.status.is_terminal())
            .all(|t| t.status == TaskStatus::Blocked)
        {
            return Some(MissionStatus::Blocked);
        }
        None
    }

    /// Counts by status.
    pub fn progress(&self) -> MissionProgress {
        let mut progress = MissionProgress::default();
        for task in self.work_tasks() {
            if task.is_superseded() {
                progress.superseded += 1;
                continue;
            }
            progress.total += 1;
            match task.status {
                TaskStatus::Todo => progress.todo += 1,
                TaskStatus::Blocked => progress.blocked += 1,
                TaskStatus::InProgress => progress.in_progress += 1,
                TaskStatus::Review => progress.review += 1,
                TaskStatus::Done => progress.done += 1,
                TaskStatus::Failed => progress.failed += 1,
            }
        }
        progress
    }
}

/// Task counts for one mission. Superseded tasks are counted separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionProgress {
    /// Live work tasks
    pub total: usize,
    /// Waiting to start
    pub todo: usize,
    /// Gate failed
    pub blocked: usize,
    /// Primary running
    pub in_progress: usize,
    /// In review
    pub review: usize,
    /// Completed
    pub done: usize,
    /// Failed permanently
    pub failed: usize,
    /// Replaced by a revision or redo
    pub superseded: usize,
}

impl MissionProgress {
    /// Share of live tasks that are terminal, 0-100.
    pub fn percentage(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        ((self.done + self.failed) as f32 / self.total as f32) * 100.0
    }
}

/// Tasks grouped by mission.
#[derive(Debug, Clone, Default)]
pub struct MissionIndex {
    missions: BTreeMap<MissionId, MissionView>,
}

impl MissionIndex {
    /// Group a task set by `root_task_id`.
    pub fn build(tasks: &[Task]) -> Self {
        let mut grouped: BTreeMap<MissionId, Vec<Task>> = BTreeMap::new();
        for task in tasks {
            grouped.entry(task.mission_id()).or_default().push(task.clone());
        }
        Self {
            missions: grouped
                .into_iter()
                .map(|(id, tasks)| (id.clone(), MissionView::new(id, tasks)))
                .collect(),
        }
    }

    /// View of one mission.
    pub fn get(&self, id: &MissionId) -> Option<&MissionView> {
        self.missions.get(id)
    }

    /// All mission views.
    pub fn views(&self) -> impl Iterator<Item = &MissionView> {
        self.missions.values()
    }

    /// Whether `task` is a root placeholder in its mission.
    pub fn is_placeholder(&self, task: &Task) -> bool {
        self.get(&task.mission_id())
            .map(|view| view.is_placeholder(task))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_core::TaskId;

    fn mission_with(statuses: &[TaskStatus]) -> MissionView {
        let id = MissionId::from("m1");
        let tasks = statuses
            .iter()
            .map(|s| {
                let mut t = Task::new(&id, "t");
                t.status = *s;
                t
            })
            .collect();
        MissionView::new(id, tasks)
    }

    #[test]
    fn empty_mission_has_no_aggregate() {
        assert_eq!(mission_with(&[]).aggregate_status(), None);
    }

    #[test]
    fn all_done_is_done() {
        let view = mission_with(&[TaskStatus::Done, TaskStatus::Done]);
        assert_eq!(view.aggregate_status(), Some(MissionStatus::Done));
    }

    #[test]
    fn terminal_with_failure_is_failed() {
        let view = mission_with(&[TaskStatus::Done, TaskStatus::Failed]);
        assert_eq!(view.aggregate_status(), Some(MissionStatus::Failed));
    }

    #[test]
    fn running_wins_over_blocked() {
        let view = mission_with(&[TaskStatus::Blocked, TaskStatus::Review]);
        assert_eq!(view.aggregate_status(), Some(MissionStatus::InProgress));
        let view = mission_with(&[TaskStatus::Blocked, TaskStatus::Done]);
        assert_eq!(view.aggregate_status(), Some(MissionStatus::Blocked));
        let view = mission_with(&[TaskStatus::Todo, TaskStatus::Done]);
        assert_eq!(view.aggregate_status(), None);
    }

    #[test]
    fn superseded_failures_do_not_fail_mission() {
        let id = MissionId::from("m1");
        let mut original = Task::new(&id, "original");
        let mut revision = Task::new(&id, "revision");
        original.status = TaskStatus::Failed;
        original.linked_revision_task_id = Some(revision.id.clone());
        revision.status = TaskStatus::Done;

        let view = MissionView::new(id, vec![original, revision]);
        assert_eq!(view.aggregate_status(), Some(MissionStatus::Done));
        assert_eq!(view.progress().superseded, 1);
        assert_eq!(view.progress().done, 1);
    }

    #[test]
    fn root_placeholder_excluded_only_with_siblings() {
        let id = MissionId::from("m1");
        let mut root = Task::new(&id, "root");
        root.id = TaskId::from("m1");

        let alone = MissionView::new(id.clone(), vec![root.clone()]);
        assert!(!alone.is_placeholder(&root));
        assert_eq!(alone.work_tasks().count(), 1);

        let mut child = Task::new(&id, "child");
        child.status = TaskStatus::Done;
        let grouped = MissionView::new(id, vec![root.clone(), child]);
        assert!(grouped.is_placeholder(&root));
        assert_eq!(grouped.aggregate_status(), Some(MissionStatus::Done));
    }

    #[test]
    fn index_groups_by_root() {
        let a = Task::standalone("a");
        let b = Task::new(&a.mission_id(), "b");
        let c = Task::standalone("c");
        let index = MissionIndex::build(&[a.clone(), b, c]);
        assert_eq!(index.views().count(), 2);
        assert_eq!(index.get(&a.mission_id()).unwrap().tasks.len(), 2);
        assert!(index.is_placeholder(&a));
    }
}
