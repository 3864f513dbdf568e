//! Agents, autonomy levels and per-agent guardrails.

use serde::{Deserialize, Serialize};
use crate::id::AgentId;
use crate::Time;

/// Autonomy level, 1 (lowest) to 4 (highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct AgentLevel(u8);

impl AgentLevel {
    /// Lowest autonomy.
    pub const MIN: AgentLevel = AgentLevel(1);
    /// Highest autonomy.
    pub const MAX: AgentLevel = AgentLevel(4);

    /// Create a level, clamped to 1-4.
    pub fn new(level: u8) -> Self {
        Self(level.clamp(Self::MIN.0, Self::MAX.0))
    }

    /// Numeric value.
    pub fn get(self) -> u8 {
        self.0
    }

    /// The next level up, if any.
    pub fn promoted(self) -> Option<Self> {
        (self < Self::MAX).then(|| Self(self.0 + 1))
    }

    /// The next level down, if any.
    pub fn demoted(self) -> Option<Self> {
        (self > Self::MIN).then(|| Self(self.0 - 1))
    }
}

impl Default for AgentLevel {
    fn default() -> Self {
        Self::MIN
    }
}

impl TryFrom<u8> for AgentLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (1..=4).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("agent level must be 1-4, got {value}"))
        }
    }
}

impl From<AgentLevel> for u8 {
    fn from(level: AgentLevel) -> Self {
        level.0
    }
}

impl std::fmt::Display for AgentLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Per-agent override of the level-based permission matrix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentGuardrails {
    /// Domains a level-3 agent may act in unsupervised (`*` = any)
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    /// Actions always denied for this agent
    #[serde(default)]
    pub denied_actions: Vec<String>,

    /// Distinct missions the agent may run at once
    #[serde(default)]
    pub max_concurrent_missions: Option<u32>,

    /// Primary runs the agent may start per UTC day
    #[serde(default)]
    pub max_daily_tasks: Option<u32>,

    /// Who approval requests are routed to
    #[serde(default)]
    pub escalation_agent_id: Option<AgentId>,

    /// Minimum reviewer confidence for an approval to stand
    #[serde(default)]
    pub auto_review_threshold: Option<f32>,
}

/// An agent known to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Unique identifier
    pub id: AgentId,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Autonomy level
    pub level: AgentLevel,

    /// Since when the agent holds its level
    pub level_since: Time,

    /// Guardrail overrides
    #[serde(default)]
    pub guardrails: Option<AgentGuardrails>,
}

impl AgentProfile {
    /// Create an agent at the given level.
    pub fn new(id: impl Into<AgentId>, level: u8) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            level: AgentLevel::new(level),
            level_since: chrono::Utc::now(),
            guardrails: None,
        }
    }

    /// Attach guardrails.
    pub fn with_guardrails(mut self, guardrails: AgentGuardrails) -> Self {
        self.guardrails = Some(guardrails);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_is_clamped() {
        assert_eq!(AgentLevel::new(0).get(), 1);
        assert_eq!(AgentLevel::new(9).get(), 4);
    }

    #[test]
    fn level_rejects_out_of_range_on_deserialize() {
        assert!(serde_json::from_str::<AgentLevel>("5").is_err());
        assert_eq!(serde_json::from_str::<AgentLevel>("3").unwrap().get(), 3);
    }

    #[test]
    fn promotion_and_demotion_bounds() {
        assert!(AgentLevel::MAX.promoted().is_none());
        assert!(AgentLevel::MIN.demoted().is_none());
        assert_eq!(AgentLevel::new(2).promoted(), Some(AgentLevel::new(3)));
    }
}
