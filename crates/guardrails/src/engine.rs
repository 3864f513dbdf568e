//! Permission evaluation: matrix plus per-agent overrides.

use serde::{Deserialize, Serialize};
use mission_core::{AgentLevel, AgentProfile, ApprovalGate};

use crate::matrix::{lookup, Action, PermissionResult};

/// Result of a permission check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionCheck {
    /// Decision
    pub result: PermissionResult,
    /// Who resolves an approval for this agent
    pub approval_gate: ApprovalGate,
    /// Why the decision was made
    pub reason: String,
}

impl PermissionCheck {
    fn new(level: AgentLevel, result: PermissionResult, reason: impl Into<String>) -> Self {
        Self {
            result,
            approval_gate: PermissionEngine::approval_gate(level),
            reason: reason.into(),
        }
    }
}

/// Stateless permission engine.
#[derive(Debug, Clone, Default)]
pub struct PermissionEngine;

impl PermissionEngine {
    /// Create an engine.
    pub fn new() -> Self {
        Self
    }

    /// Approval routing by level.
    pub fn approval_gate(level: AgentLevel) -> ApprovalGate {
        match level.get() {
            1 | 2 => ApprovalGate::HumanRequired,
            3 => ApprovalGate::GuardrailCheck,
            _ => ApprovalGate::SelfApproved,
        }
    }

    /// Evaluate whether `agent` may perform `action` on work in `domains`.
    pub fn check(&self, agent: &AgentProfile, action: Action, domains: &[String]) -> PermissionCheck {
        let level = agent.level;
        let base = lookup(level, action);

        if base == PermissionResult::Deny {
            return PermissionCheck::new(level, base, format!("{} may not {}", level, action));
        }

        let guardrails = agent.guardrails.as_ref();

        if let Some(g) = guardrails {
            if g.denied_actions.iter().any(|a| a == action.as_str()) {
                return PermissionCheck::new(
                    level,
                    PermissionResult::Deny,
                    format!("{} is denied for agent {}", action, agent.id),
                );
            }
        }

        if level.get() == 3 {
            let allowed = guardrails.map(|g| g.allowed_domains.as_slice()).unwrap_or_default();
            let wildcard = allowed.iter().any(|d| d == "*");
            if !wildcard {
                let outside: Vec<&str> = domains
                    .iter()
                    .filter(|d| !allowed.contains(d))
                    .map(String::as_str)
                    .collect();
                if !outside.is_empty() {
                    tracing::debug!(agent = %agent.id, ?outside, "Domains outside guardrails");
                    return PermissionCheck::new(
                        level,
                        PermissionResult::ApprovalRequired,
                        format!("domains outside guardrails: {}", outside.join(", ")),
                    );
                }
            }
        }

        let reason = match base {
            PermissionResult::Allow => format!("{} may {}", level, action),
            PermissionResult::ApprovalRequired => format!("{} needs approval to {}", level, action),
            PermissionResult::Draft => format!("{} may only draft {}", level, action),
            PermissionResult::Deny => unreachable!("deny returned above"),
        };
        PermissionCheck::new(level, base, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_core::AgentGuardrails;

    fn agent(level: u8) -> AgentProfile {
        AgentProfile::new("a1", level)
    }

    #[test]
    fn level_one_execute_requires_human_approval() {
        let check = PermissionEngine::new().check(&agent(1), Action::TaskExecute, &[]);
        assert_eq!(check.result, PermissionResult::ApprovalRequired);
        assert_eq!(check.approval_gate, ApprovalGate::HumanRequired);
    }

    #[test]
    fn denied_actions_override_matrix() {
        let profile = agent(4).with_guardrails(AgentGuardrails {
            denied_actions: vec!["external:communicate".into()],
            ..Default::default()
        });
        let check = PermissionEngine::new().check(&profile, Action::ExternalCommunicate, &[]);
        assert_eq!(check.result, PermissionResult::Deny);
        assert_eq!(check.approval_gate, ApprovalGate::SelfApproved);
    }

    #[test]
    fn level_three_domains_outside_guardrails_need_approval() {
        let profile = agent(3).with_guardrails(AgentGuardrails {
            allowed_domains: vec!["backend".into()],
            ..Default::default()
        });
        let engine = PermissionEngine::new();

        let inside = engine.check(&profile, Action::TaskExecute, &["backend".into()]);
        assert_eq!(inside.result, PermissionResult::Allow);

        let outside = engine.check(&profile, Action::TaskExecute, &["billing".into()]);
        assert_eq!(outside.result, PermissionResult::ApprovalRequired);
        assert_eq!(outside.approval_gate, ApprovalGate::GuardrailCheck);
        assert!(outside.reason.contains("billing"));
    }

    #[test]
    fn level_three_wildcard_allows_any_domain() {
        let profile = agent(3).with_guardrails(AgentGuardrails {
            allowed_domains: vec!["*".into()],
            ..Default::default()
        });
        let check = PermissionEngine::new().check(&profile, Action::TaskExecute, &["anything".into()]);
        assert_eq!(check.result, PermissionResult::Allow);
    }

    #[test]
    fn matrix_deny_is_final() {
        let check = PermissionEngine::new().check(&agent(2), Action::MissionAssign, &[]);
        assert_eq!(check.result, PermissionResult::Deny);
    }
}
