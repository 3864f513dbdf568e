//! Mission model - the aggregate of all tasks sharing a root.

use serde::{Deserialize, Serialize};
use crate::id::MissionId;
use crate::Time;

/// A mission groups the tasks that share its id as `root_task_id`.
///
/// Status is derived from the mission's tasks, except for the lifecycle
/// gating fields which are written upstream of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    /// Unique identifier (the root task id)
    pub id: MissionId,

    /// Mission title
    pub title: String,

    /// Aggregate status
    pub status: MissionStatus,

    /// Upstream lifecycle phase
    #[serde(default)]
    pub mission_phase: Option<String>,

    /// Upstream lifecycle phase status
    #[serde(default)]
    pub mission_phase_status: Option<String>,

    /// Claim token of the owning scheduler
    #[serde(default)]
    pub session_key: Option<SessionKey>,

    /// When the current claim was taken
    #[serde(default)]
    pub claimed_at: Option<Time>,

    /// Failure-cascade policy
    #[serde(default)]
    pub circuit_breaker: CircuitBreaker,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

impl Mission {
    /// Create a scheduled mission.
    pub fn new(id: MissionId, title: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            title: title.into(),
            status: MissionStatus::Scheduled,
            mission_phase: None,
            mission_phase_status: None,
            session_key: None,
            claimed_at: None,
            circuit_breaker: CircuitBreaker::Continue,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the circuit breaker policy.
    pub fn with_circuit_breaker(mut self, policy: CircuitBreaker) -> Self {
        self.circuit_breaker = policy;
        self
    }

    /// Whether the upstream lifecycle gate allows execution.
    ///
    /// Missing fields mean no gate is configured.
    pub fn is_lifecycle_ready(&self) -> bool {
        let phase_ok = match self.mission_phase.as_deref() {
            None => true,
            Some(phase) => phase.eq_ignore_ascii_case("execution"),
        };
        let status_ok = match self.mission_phase_status.as_deref() {
            None => true,
            Some(status) => status.eq_ignore_ascii_case("approved"),
        };
        phase_ok && status_ok
    }
}

/// Aggregate mission status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    /// Being planned upstream
    Draft,
    /// Ready to be claimed
    Scheduled,
    /// Assigned to agents, ready to be claimed
    Assigned,
    /// Returned for revision, ready to be claimed
    Revision,
    /// Claimed and executing
    InProgress,
    /// Every remaining task is blocked
    Blocked,
    /// Every live task is done
    Done,
    /// Every live task is terminal and at least one failed
    Failed,
}

impl MissionStatus {
    /// Statuses a scheduler may claim from.
    pub const CLAIMABLE: [MissionStatus; 3] = [Self::Scheduled, Self::Assigned, Self::Revision];

    /// Whether a scheduler may claim from this status.
    pub fn is_claimable(self) -> bool {
        Self::CLAIMABLE.contains(&self)
    }

    /// Terminal mission statuses.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Assigned => "assigned",
            Self::Revision => "revision",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure-cascade policy applied when a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreaker {
    /// Failures do not affect siblings
    #[default]
    Continue,
    /// Fail pending siblings under the same parent
    StopPhase,
    /// Fail every pending task of the mission
    StopMission,
}

/// Claim token stamped on a mission by the scheduler that owns it.
///
/// Format: `<prefix>:<instance>:<nonce>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub String);

impl SessionKey {
    /// Mint a key for a scheduler instance.
    pub fn mint(prefix: &str, instance: &str) -> Self {
        Self(format!("{}:{}:{}", prefix, instance, ulid::Ulid::new()))
    }

    /// Scheduler prefix.
    pub fn prefix(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    /// Scheduler instance.
    pub fn instance(&self) -> Option<&str> {
        self.0.split(':').nth(1)
    }

    /// Whether this key was minted by the given scheduler instance.
    pub fn is_owned_by(&self, prefix: &str, instance: &str) -> bool {
        self.prefix() == prefix && self.instance() == Some(instance)
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Partial-field update for a mission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionPatch {
    /// New aggregate status
    pub status: Option<MissionStatus>,
    /// New claim token (`Some(None)` releases the claim)
    pub session_key: Option<Option<SessionKey>>,
}

impl MissionPatch {
    /// Patch that only sets the status.
    pub fn status(status: MissionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Apply the patch and stamp `updated_at`.
    pub fn apply(&self, mission: &mut Mission, now: Time) {
        if let Some(status) = self.status {
            mission.status = status;
        }
        if let Some(key) = &self.session_key {
            mission.session_key = key.clone();
        }
        mission.updated_at = now;
    }
}

/// Conditional claim: the compare-and-swap the backing store executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Token to stamp on success
    pub session_key: SessionKey,
    /// Statuses the mission may be in for the claim to apply
    pub claimable: Vec<MissionStatus>,
    /// Require the upstream lifecycle gate to be open
    pub require_lifecycle_ready: bool,
}

impl ClaimRequest {
    /// Standard claim from the claimable statuses.
    pub fn new(session_key: SessionKey) -> Self {
        Self {
            session_key,
            claimable: MissionStatus::CLAIMABLE.to_vec(),
            require_lifecycle_ready: true,
        }
    }

    /// Evaluate the guard against the current row.
    pub fn guard_holds(&self, mission: &Mission) -> bool {
        self.claimable.contains(&mission.status)
            && (!self.require_lifecycle_ready || mission.is_lifecycle_ready())
    }

    /// Apply the claim to a row whose guard holds.
    pub fn apply(&self, mission: &mut Mission, now: Time) {
        mission.status = MissionStatus::InProgress;
        mission.session_key = Some(self.session_key.clone());
        mission.claimed_at = Some(now);
        mission.updated_at = now;
    }
}
