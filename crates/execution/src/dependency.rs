//! Dependency resolution for tasks.

use std::collections::{HashMap, HashSet};
use mission_core::{Task, TaskId};

use crate::config::DependencyPolicy;

/// Tasks keyed by id.
pub type TaskMap = HashMap<TaskId, Task>;

/// Index a task list by id.
pub fn task_map(tasks: &[Task]) -> TaskMap {
    tasks.iter().map(|t| (t.id.clone(), t.clone())).collect()
}

/// Result of dependency resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// All dependencies satisfied, ready to execute
    Ready,
    /// Blocked by these tasks
    Blocked(Vec<TaskId>),
    /// Circular dependency detected
    Circular(Vec<TaskId>),
}

/// Resolves task dependencies against a task set.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    policy: DependencyPolicy,
}

impl DependencyResolver {
    /// Create a resolver with the given terminality policy.
    pub fn new(policy: DependencyPolicy) -> Self {
        Self { policy }
    }

    /// Dependencies that are missing or not yet terminal.
    ///
    /// A superseded dependency is judged by the head of its revision chain.
    pub fn incomplete_dependencies(&self, task: &Task, all: &TaskMap) -> Vec<TaskId> {
        task.dependency_task_ids
            .iter()
            .filter(|id| match Self::chain_head(id, all) {
                Some(head) => !self.policy.satisfies(head.status),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Whether every dependency is satisfied.
    pub fn can_start(&self, task: &Task, all: &TaskMap) -> bool {
        self.incomplete_dependencies(task, all).is_empty()
    }

    /// Full check, reporting cycles before unmet dependencies.
    pub fn check(&self, task: &Task, all: &TaskMap) -> Resolution {
        if task.dependency_task_ids.is_empty() {
            return Resolution::Ready;
        }
        if let Some(cycle) = Self::find_cycle(task, all) {
            return Resolution::Circular(cycle);
        }
        let blocked = self.incomplete_dependencies(task, all);
        if blocked.is_empty() {
            Resolution::Ready
        } else {
            Resolution::Blocked(blocked)
        }
    }

    /// Follow `linked_revision_task_id` links to the live task.
    ///
    /// A missing link target or a looping chain yields `None`.
    pub fn chain_head<'a>(id: &TaskId, all: &'a TaskMap) -> Option<&'a Task> {
        let mut visited = HashSet::new();
        let mut current = all.get(id)?;
        while let Some(next) = &current.linked_revision_task_id {
            if !visited.insert(current.id.clone()) {
                return None;
            }
            current = all.get(next)?;
        }
        Some(current)
    }

    /// Depth-first search for a cycle through declared dependencies.
    fn find_cycle(task: &Task, all: &TaskMap) -> Option<Vec<TaskId>> {
        let mut stack = vec![task.id.clone()];
        let mut done = HashSet::new();
        Self::visit(task, all, &mut stack, &mut done)
    }

    fn visit(
        task: &Task,
        all: &TaskMap,
        stack: &mut Vec<TaskId>,
        done: &mut HashSet<TaskId>,
    ) -> Option<Vec<TaskId>> {
        for dep_id in &task.dependency_task_ids {
            if let Some(pos) = stack.iter().position(|id| id == dep_id) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(dep_id.clone());
                return Some(cycle);
            }
            if done.contains(dep_id) {
                continue;
            }
            if let Some(dep) = all.get(dep_id) {
                stack.push(dep_id.clone());
                if let Some(cycle) = Self::visit(dep, all, stack, done) {
                    return Some(cycle);
                }
                stack.pop();
            }
            done.insert(dep_id.clone());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_core::TaskStatus;

    fn task(id: &str, status: TaskStatus, deps: &[&str]) -> Task {
        let mut t = Task::standalone(id);
        t.id = TaskId::from(id);
        t.root_task_id = TaskId::from("m");
        t.status = status;
        t.dependency_task_ids = deps.iter().map(|d| TaskId::from(*d)).collect();
        t
    }

    #[test]
    fn missing_dependency_blocks() {
        let resolver = DependencyResolver::default();
        let t = task("t", TaskStatus::Todo, &["ghost"]);
        let all = task_map(&[t.clone()]);
        assert!(!resolver.can_start(&t, &all));
        assert_eq!(resolver.check(&t, &all), Resolution::Blocked(vec![TaskId::from("ghost")]));
    }

    #[test]
    fn non_terminal_dependency_blocks() {
        let resolver = DependencyResolver::default();
        let a = task("a", TaskStatus::Review, &[]);
        let b = task("b", TaskStatus::Todo, &["a"]);
        let all = task_map(&[a, b.clone()]);
        assert_eq!(resolver.incomplete_dependencies(&b, &all), vec![TaskId::from("a")]);
    }

    #[test]
    fn failed_dependency_depends_on_policy() {
        let a = task("a", TaskStatus::Failed, &[]);
        let b = task("b", TaskStatus::Todo, &["a"]);
        let all = task_map(&[a, b.clone()]);
        assert!(!DependencyResolver::new(DependencyPolicy::DoneOnly).can_start(&b, &all));
        assert!(DependencyResolver::new(DependencyPolicy::DoneOrFailed).can_start(&b, &all));
    }

    #[test]
    fn superseded_dependency_follows_revision_chain() {
        let resolver = DependencyResolver::default();
        let mut a = task("a", TaskStatus::Failed, &[]);
        a.linked_revision_task_id = Some(TaskId::from("a2"));
        let mut a2 = task("a2", TaskStatus::Failed, &[]);
        a2.linked_revision_task_id = Some(TaskId::from("a3"));
        let a3 = task("a3", TaskStatus::Todo, &[]);
        let b = task("b", TaskStatus::Todo, &["a"]);

        let mut all = task_map(&[a, a2, a3, b.clone()]);
        assert!(!resolver.can_start(&b, &all));

        all.get_mut(&TaskId::from("a3")).unwrap().status = TaskStatus::Done;
        assert!(resolver.can_start(&b, &all));
    }

    #[test]
    fn looping_revision_chain_blocks() {
        let mut a = task("a", TaskStatus::Failed, &[]);
        a.linked_revision_task_id = Some(TaskId::from("a2"));
        let mut a2 = task("a2", TaskStatus::Failed, &[]);
        a2.linked_revision_task_id = Some(TaskId::from("a"));
        let all = task_map(&[a, a2]);
        assert!(DependencyResolver::chain_head(&TaskId::from("a"), &all).is_none());
    }

    #[test]
    fn cycles_are_reported() {
        let resolver = DependencyResolver::default();
        let a = task("a", TaskStatus::Todo, &["b"]);
        let b = task("b", TaskStatus::Todo, &["c"]);
        let c = task("c", TaskStatus::Todo, &["a"]);
        let all = task_map(&[a.clone(), b, c]);
        match resolver.check(&a, &all) {
            Resolution::Circular(path) => {
                let ids: Vec<&str> = path.iter().map(|id| id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn no_dependencies_is_ready() {
        let t = task("t", TaskStatus::Todo, &[]);
        assert_eq!(DependencyResolver::default().check(&t, &TaskMap::new()), Resolution::Ready);
    }
}
