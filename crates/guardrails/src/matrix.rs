//! Static level × action permission matrix.

use serde::{Deserialize, Serialize};
use mission_core::AgentLevel;

/// Actions an agent may attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Execute a task's primary phase
    #[serde(rename = "task:execute")]
    TaskExecute,
    /// Review another agent's output
    #[serde(rename = "task:review")]
    TaskReview,
    /// Create a mission
    #[serde(rename = "mission:create")]
    MissionCreate,
    /// Assign agents to a mission
    #[serde(rename = "mission:assign")]
    MissionAssign,
    /// Act without a human in the loop
    #[serde(rename = "autonomous:act")]
    AutonomousAct,
    /// Talk to parties outside the platform
    #[serde(rename = "external:communicate")]
    ExternalCommunicate,
}

impl Action {
    /// Every action, in matrix order.
    pub const ALL: [Action; 6] = [
        Self::TaskExecute,
        Self::TaskReview,
        Self::MissionCreate,
        Self::MissionAssign,
        Self::AutonomousAct,
        Self::ExternalCommunicate,
    ];

    /// Wire name, as used in `denied_actions`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskExecute => "task:execute",
            Self::TaskReview => "task:review",
            Self::MissionCreate => "mission:create",
            Self::MissionAssign => "mission:assign",
            Self::AutonomousAct => "autonomous:act",
            Self::ExternalCommunicate => "external:communicate",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown action: {s}"))
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionResult {
    /// Proceed
    Allow,
    /// Never proceed
    Deny,
    /// Proceed once an external approver grants it
    ApprovalRequired,
    /// May only produce a draft for someone else to act on
    Draft,
}

impl PermissionResult {
    /// Whether the action may proceed without an approval.
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Whether a granted approval unlocks the action.
    pub fn needs_approval(self) -> bool {
        matches!(self, Self::ApprovalRequired | Self::Draft)
    }
}

impl std::fmt::Display for PermissionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::ApprovalRequired => "approval_required",
            Self::Draft => "draft",
        };
        f.write_str(s)
    }
}

/// Look up the matrix cell for a level and action.
pub fn lookup(level: AgentLevel, action: Action) -> PermissionResult {
    use Action::*;
    use PermissionResult::*;

    match (level.get(), action) {
        (1, TaskExecute) => ApprovalRequired,
        (1, _) => Deny,

        (2, TaskExecute) => Allow,
        (2, TaskReview) => ApprovalRequired,
        (2, MissionCreate | ExternalCommunicate) => Draft,
        (2, _) => Deny,

        (3, TaskExecute | TaskReview | ExternalCommunicate) => Allow,
        (3, _) => ApprovalRequired,

        _ => Allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_one_execute_needs_approval() {
        assert_eq!(lookup(AgentLevel::new(1), Action::TaskExecute), PermissionResult::ApprovalRequired);
        assert_eq!(lookup(AgentLevel::new(1), Action::TaskReview), PermissionResult::Deny);
    }

    #[test]
    fn level_four_allows_everything() {
        for action in Action::ALL {
            assert_eq!(lookup(AgentLevel::MAX, action), PermissionResult::Allow);
        }
    }

    #[test]
    fn autonomy_never_loosens_with_lower_level() {
        let rank = |r: PermissionResult| match r {
            PermissionResult::Deny => 0,
            PermissionResult::Draft => 1,
            PermissionResult::ApprovalRequired => 2,
            PermissionResult::Allow => 3,
        };
        for action in Action::ALL {
            for level in 1..4u8 {
                let lower = rank(lookup(AgentLevel::new(level), action));
                let higher = rank(lookup(AgentLevel::new(level + 1), action));
                assert!(lower <= higher, "{action} regresses at L{}", level + 1);
            }
        }
    }

    #[test]
    fn action_names_parse() {
        assert_eq!("mission:assign".parse::<Action>().unwrap(), Action::MissionAssign);
        assert!("task:delete".parse::<Action>().is_err());
    }
}
