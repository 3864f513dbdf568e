//! Task model - the unit of agent work.

use serde::{Deserialize, Serialize};
use crate::id::{AgentId, MissionId, RunId, TaskId};
use crate::review::ReviewHistoryEntry;
use crate::Time;

/// A task represents a unit of work executed by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,

    /// The mission this task belongs to
    pub root_task_id: TaskId,

    /// Task title
    pub title: String,

    /// Detailed description
    #[serde(default)]
    pub description: String,

    /// Current status
    pub status: TaskStatus,

    /// Position in a revision chain (0 for originals and redos)
    #[serde(default)]
    pub revision_round: u32,

    /// Maximum revision rounds (0 = unlimited)
    #[serde(default)]
    pub max_revisions: u32,

    /// Whether a review phase follows the primary phase
    #[serde(default)]
    pub review_enabled: bool,

    /// Reviewer agent
    #[serde(default)]
    pub review_agent_id: Option<AgentId>,

    /// Executing agent
    #[serde(default)]
    pub primary_agent_id: Option<AgentId>,

    /// Other agents assigned to the task
    #[serde(default)]
    pub assignees: Vec<AgentId>,

    /// Tasks that must reach a terminal state first
    #[serde(default)]
    pub dependency_task_ids: Vec<TaskId>,

    /// Lineage for revision/redo
    #[serde(default)]
    pub parent_task_id: Option<TaskId>,

    /// Task created to replace this one on revise/redo
    #[serde(default)]
    pub linked_revision_task_id: Option<TaskId>,

    /// Declared work domains, checked against level-3 guardrails
    #[serde(default)]
    pub domains: Vec<String>,

    /// Instructions for the agent
    #[serde(default)]
    pub input_text: String,

    /// Attached media references
    #[serde(default)]
    pub input_media: Vec<String>,

    /// Final output of the primary phase
    #[serde(default)]
    pub output_text: Option<String>,

    /// Raw text of the latest review
    #[serde(default)]
    pub review_notes: Option<String>,

    /// Review decisions, oldest first
    #[serde(default)]
    pub review_history: Vec<ReviewHistoryEntry>,

    /// Set by an external approver once a pending approval is granted
    #[serde(default)]
    pub approval_granted: bool,

    /// Soft deadline used for ranking
    #[serde(default)]
    pub due_at: Option<Time>,

    /// Run currently executing this task
    #[serde(default)]
    pub active_run_id: Option<RunId>,

    /// Phase of the active run
    #[serde(default)]
    pub active_phase: Option<RunPhase>,

    /// Streaming buffer of the active run
    #[serde(default)]
    pub active_thinking: Option<String>,

    /// Human-readable state summary (gate reasons, recovery notes)
    #[serde(default)]
    pub active_summary: Option<String>,

    /// Last failure message
    #[serde(default)]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,

    /// When the latest run started
    #[serde(default)]
    pub started_at: Option<Time>,

    /// When the task reached a terminal state
    #[serde(default)]
    pub completed_at: Option<Time>,
}

impl Task {
    /// Create a task inside the given mission.
    pub fn new(mission_id: &MissionId, title: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: TaskId::new(),
            root_task_id: mission_id.root_task_id(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Todo,
            revision_round: 0,
            max_revisions: 0,
            review_enabled: false,
            review_agent_id: None,
            primary_agent_id: None,
            assignees: Vec::new(),
            dependency_task_ids: Vec::new(),
            parent_task_id: None,
            linked_revision_task_id: None,
            domains: Vec::new(),
            input_text: String::new(),
            input_media: Vec::new(),
            output_text: None,
            review_notes: None,
            review_history: Vec::new(),
            approval_granted: false,
            due_at: None,
            active_run_id: None,
            active_phase: None,
            active_thinking: None,
            active_summary: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Create a task that is its own mission.
    pub fn standalone(title: impl Into<String>) -> Self {
        let mut task = Self::new(&MissionId::new(), title);
        task.root_task_id = task.id.clone();
        task
    }

    /// Assign the executing agent.
    pub fn with_agent(mut self, agent: impl Into<AgentId>) -> Self {
        self.primary_agent_id = Some(agent.into());
        self
    }

    /// Enable review by the given agent.
    pub fn with_reviewer(mut self, reviewer: impl Into<AgentId>) -> Self {
        self.review_enabled = true;
        self.review_agent_id = Some(reviewer.into());
        self
    }

    /// Declare dependencies.
    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependency_task_ids = deps;
        self
    }

    /// Set the instructions.
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input_text = input.into();
        self
    }

    /// The mission this task belongs to.
    pub fn mission_id(&self) -> MissionId {
        MissionId::from(&self.root_task_id)
    }

    /// The agent that executes the primary phase.
    pub fn executing_agent(&self) -> Option<&AgentId> {
        self.primary_agent_id.as_ref().or_else(|| self.assignees.first())
    }

    /// Whether a revision or redo replaced this task.
    pub fn is_superseded(&self) -> bool {
        self.linked_revision_task_id.is_some()
    }

    /// Whether the task is the mission root (`id == root_task_id`).
    pub fn is_root(&self) -> bool {
        self.id == self.root_task_id
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be scheduled
    Todo,
    /// A gate failed; re-evaluated every tick
    Blocked,
    /// Primary run in flight
    InProgress,
    /// Awaiting or running review
    Review,
    /// Completed successfully
    Done,
    /// Failed permanently
    Failed,
}

impl TaskStatus {
    /// Terminal states are permanent markers.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// States that imply a run is (or should be) attached.
    pub fn is_running(self) -> bool {
        matches!(self, Self::InProgress | Self::Review)
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Blocked => "blocked",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "todo" => Ok(Self::Todo),
            "blocked" => Ok(Self::Blocked),
            "in_progress" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Which phase a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// The agent's own attempt
    Primary,
    /// A second agent's critique
    Review,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Review => f.write_str("review"),
        }
    }
}

/// Filter for querying tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Filter by status
    pub status: Option<Vec<TaskStatus>>,

    /// Filter by mission
    pub mission_id: Option<MissionId>,

    /// Filter by executing agent
    pub agent_id: Option<AgentId>,
}

impl TaskFilter {
    /// All tasks of a mission.
    pub fn mission(id: &MissionId) -> Self {
        Self {
            mission_id: Some(id.clone()),
            ..Default::default()
        }
    }

    /// Whether the task passes the filter.
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(statuses) = &self.status {
            if !statuses.contains(&task.status) {
                return false;
            }
        }
        if let Some(mission) = &self.mission_id {
            if task.root_task_id.as_str() != mission.as_str() {
                return false;
            }
        }
        if let Some(agent) = &self.agent_id {
            if task.executing_agent() != Some(agent) {
                return false;
            }
        }
        true
    }
}

/// Partial-field update for a task.
///
/// Only set fields are written. Clearable fields use a nested `Option`:
/// `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub output_text: Option<Option<String>>,
    pub review_notes: Option<Option<String>>,
    pub review_history: Option<Vec<ReviewHistoryEntry>>,
    pub linked_revision_task_id: Option<Option<TaskId>>,
    pub active_run_id: Option<Option<RunId>>,
    pub active_phase: Option<Option<RunPhase>>,
    pub active_thinking: Option<Option<String>>,
    pub active_summary: Option<Option<String>>,
    pub error_message: Option<Option<String>>,
    pub started_at: Option<Option<Time>>,
    pub completed_at: Option<Option<Time>>,
}

impl TaskPatch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn output_text(mut self, output: impl Into<String>) -> Self {
        self.output_text = Some(Some(output.into()));
        self
    }

    pub fn review_notes(mut self, notes: impl Into<String>) -> Self {
        self.review_notes = Some(Some(notes.into()));
        self
    }

    pub fn review_history(mut self, history: Vec<ReviewHistoryEntry>) -> Self {
        self.review_history = Some(history);
        self
    }

    pub fn linked_revision(mut self, id: TaskId) -> Self {
        self.linked_revision_task_id = Some(Some(id));
        self
    }

    /// Attach a run.
    pub fn run(mut self, run_id: RunId, phase: RunPhase) -> Self {
        self.active_run_id = Some(Some(run_id));
        self.active_phase = Some(Some(phase));
        self.active_thinking = Some(Some(String::new()));
        self
    }

    /// Detach the active run and its streaming buffer.
    pub fn clear_run(mut self) -> Self {
        self.active_run_id = Some(None);
        self.active_phase = Some(None);
        self.active_thinking = Some(None);
        self
    }

    pub fn thinking(mut self, thinking: impl Into<String>) -> Self {
        self.active_thinking = Some(Some(thinking.into()));
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.active_summary = Some(Some(summary.into()));
        self
    }

    pub fn clear_summary(mut self) -> Self {
        self.active_summary = Some(None);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }

    pub fn started_at(mut self, at: Time) -> Self {
        self.started_at = Some(Some(at));
        self
    }

    pub fn completed_at(mut self, at: Time) -> Self {
        self.completed_at = Some(Some(at));
        self
    }

    /// Apply the patch and stamp `updated_at`.
    pub fn apply(&self, task: &mut Task, now: Time) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(v) = &self.output_text {
            task.output_text = v.clone();
        }
        if let Some(v) = &self.review_notes {
            task.review_notes = v.clone();
        }
        if let Some(v) = &self.review_history {
            task.review_history = v.clone();
        }
        if let Some(v) = &self.linked_revision_task_id {
            task.linked_revision_task_id = v.clone();
        }
        if let Some(v) = &self.active_run_id {
            task.active_run_id = v.clone();
        }
        if let Some(v) = self.active_phase {
            task.active_phase = v;
        }
        if let Some(v) = &self.active_thinking {
            task.active_thinking = v.clone();
        }
        if let Some(v) = &self.active_summary {
            task.active_summary = v.clone();
        }
        if let Some(v) = &self.error_message {
            task.error_message = v.clone();
        }
        if let Some(v) = self.started_at {
            task.started_at = v;
        }
        if let Some(v) = self.completed_at {
            task.completed_at = v;
        }
        task.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_task_is_its_own_root() {
        let task = Task::standalone("Write docs");
        assert!(task.is_root());
        assert_eq!(task.mission_id().as_str(), task.id.as_str());
    }

    #[test]
    fn executing_agent_falls_back_to_assignees() {
        let mut task = Task::standalone("t");
        assert!(task.executing_agent().is_none());
        task.assignees.push(AgentId::from("helper"));
        assert_eq!(task.executing_agent().unwrap().as_str(), "helper");
        task.primary_agent_id = Some(AgentId::from("lead"));
        assert_eq!(task.executing_agent().unwrap().as_str(), "lead");
    }

    #[test]
    fn patch_clears_run_fields() {
        let mut task = Task::standalone("t");
        let now = chrono::Utc::now();
        TaskPatch::new()
            .status(TaskStatus::InProgress)
            .run(RunId::from("run-1"), RunPhase::Primary)
            .apply(&mut task, now);
        assert_eq!(task.active_run_id, Some(RunId::from("run-1")));
        assert_eq!(task.active_thinking.as_deref(), Some(""));

        TaskPatch::new()
            .status(TaskStatus::Done)
            .clear_run()
            .apply(&mut task, now);
        assert_eq!(task.status, TaskStatus::Done);
        assert!(task.active_run_id.is_none());
        assert!(task.active_phase.is_none());
        assert!(task.active_thinking.is_none());
    }

    #[test]
    fn patch_leaves_unset_fields_alone() {
        let mut task = Task::standalone("t");
        task.output_text = Some("kept".into());
        TaskPatch::new().summary("blocked on deps").apply(&mut task, chrono::Utc::now());
        assert_eq!(task.output_text.as_deref(), Some("kept"));
        assert_eq!(task.active_summary.as_deref(), Some("blocked on deps"));
    }

    #[test]
    fn runtime_fields_default_when_missing() {
        let json = serde_json::json!({
            "id": "t1",
            "root_task_id": "t1",
            "title": "Task",
            "status": "in_progress",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        });
        let task: Task = serde_json::from_value(json).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.active_run_id.is_none());
        assert!(task.review_history.is_empty());
    }

    #[test]
    fn filter_by_mission_and_status() {
        let mission = MissionId::from("m1");
        let mut a = Task::new(&mission, "a");
        a.status = TaskStatus::Blocked;
        let b = Task::standalone("b");

        let filter = TaskFilter {
            status: Some(vec![TaskStatus::Blocked]),
            mission_id: Some(mission),
            agent_id: None,
        };
        assert!(filter.matches(&a));
        assert!(!filter.matches(&b));
    }
}
