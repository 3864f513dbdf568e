//! Autonomy level promotion and demotion.
//!
//! Evaluation is a pure function of an agent's metrics against static
//! per-level thresholds. Demotion always wins over promotion.

use serde::{Deserialize, Serialize};
use mission_core::AgentLevel;

/// Observed behaviour of an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelMetrics {
    /// Tasks completed while at the current level
    pub tasks_completed: u32,
    /// Mean reviewer confidence over reviewed tasks
    pub avg_review_score: f32,
    /// Tasks that went through review
    pub reviewed_tasks: u32,
    /// Days spent at the current level
    pub time_in_level_days: u32,
    /// Critical violations in the last 7 days
    pub critical_violations_7d: u32,
    /// Critical violations in the last 30 days
    pub critical_violations_30d: u32,
    /// Minor violations in the last 30 days
    pub minor_violations_30d: u32,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Days since the last completed task
    pub days_inactive: u32,
}

/// Requirements to leave a level upward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromotionThreshold {
    /// Level the threshold applies to
    pub from: u8,
    /// Minimum completed tasks
    pub min_tasks_completed: u32,
    /// Minimum mean review score
    pub min_avg_review_score: f32,
    /// Minimum days at the level
    pub min_time_in_level_days: u32,
    /// Maximum critical violations in 30 days
    pub max_critical_violations_30d: u32,
    /// Maximum minor violations in 30 days, if limited
    pub max_minor_violations_30d: Option<u32>,
}

const PROMOTION: [PromotionThreshold; 3] = [
    PromotionThreshold {
        from: 1,
        min_tasks_completed: 10,
        min_avg_review_score: 0.7,
        min_time_in_level_days: 7,
        max_critical_violations_30d: 0,
        max_minor_violations_30d: None,
    },
    PromotionThreshold {
        from: 2,
        min_tasks_completed: 50,
        min_avg_review_score: 0.8,
        min_time_in_level_days: 14,
        max_critical_violations_30d: 0,
        max_minor_violations_30d: None,
    },
    PromotionThreshold {
        from: 3,
        min_tasks_completed: 150,
        min_avg_review_score: 0.9,
        min_time_in_level_days: 30,
        max_critical_violations_30d: 0,
        max_minor_violations_30d: Some(2),
    },
];

/// Outcome of a level evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum LevelChange {
    /// Move up one level
    Promote {
        /// New level
        to: AgentLevel,
    },
    /// Move down one level
    Demote {
        /// New level
        to: AgentLevel,
        /// Triggers that fired
        reasons: Vec<String>,
    },
    /// Stay put
    Hold,
}

/// Evaluates level changes.
#[derive(Debug, Clone, Default)]
pub struct LevelEvaluator;

impl LevelEvaluator {
    /// Create an evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Threshold for leaving `level` upward, if the level can be promoted.
    pub fn threshold(level: AgentLevel) -> Option<&'static PromotionThreshold> {
        PROMOTION.iter().find(|t| t.from == level.get())
    }

    /// Demotion triggers that fire for the metrics.
    pub fn demotion_reasons(metrics: &LevelMetrics) -> Vec<String> {
        let mut reasons = Vec::new();
        if metrics.critical_violations_7d >= 3 {
            reasons.push(format!(
                "{} critical violations in 7 days",
                metrics.critical_violations_7d
            ));
        }
        if metrics.reviewed_tasks >= 10 && metrics.avg_review_score < 0.5 {
            reasons.push(format!(
                "average review score {:.2} over {} tasks",
                metrics.avg_review_score, metrics.reviewed_tasks
            ));
        }
        if metrics.consecutive_failures >= 5 {
            reasons.push(format!("{} consecutive failures", metrics.consecutive_failures));
        }
        if metrics.days_inactive >= 30 && metrics.tasks_completed == 0 {
            reasons.push(format!("inactive for {} days", metrics.days_inactive));
        }
        reasons
    }

    /// Whether the metrics meet a promotion threshold.
    pub fn meets(threshold: &PromotionThreshold, metrics: &LevelMetrics) -> bool {
        metrics.tasks_completed >= threshold.min_tasks_completed
            && metrics.avg_review_score >= threshold.min_avg_review_score
            && metrics.time_in_level_days >= threshold.min_time_in_level_days
            && metrics.critical_violations_30d <= threshold.max_critical_violations_30d
            && threshold
                .max_minor_violations_30d
                .map_or(true, |max| metrics.minor_violations_30d <= max)
    }

    /// Decide whether an agent at `level` moves.
    pub fn evaluate(&self, level: AgentLevel, metrics: &LevelMetrics) -> LevelChange {
        let reasons = Self::demotion_reasons(metrics);
        if !reasons.is_empty() {
            return match level.demoted() {
                Some(to) => LevelChange::Demote { to, reasons },
                None => LevelChange::Hold,
            };
        }

        match (Self::threshold(level), level.promoted()) {
            (Some(t), Some(to)) if Self::meets(t, metrics) => LevelChange::Promote { to },
            _ => LevelChange::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strong() -> LevelMetrics {
        LevelMetrics {
            tasks_completed: 200,
            avg_review_score: 0.95,
            reviewed_tasks: 100,
            time_in_level_days: 60,
            ..Default::default()
        }
    }

    #[test]
    fn promotes_when_all_thresholds_met() {
        let evaluator = LevelEvaluator::new();
        assert_eq!(
            evaluator.evaluate(AgentLevel::new(1), &strong()),
            LevelChange::Promote { to: AgentLevel::new(2) }
        );
    }

    #[test]
    fn holds_when_one_threshold_missed() {
        let metrics = LevelMetrics {
            time_in_level_days: 3,
            ..strong()
        };
        assert_eq!(LevelEvaluator::new().evaluate(AgentLevel::new(1), &metrics), LevelChange::Hold);
    }

    #[test]
    fn level_three_limits_minor_violations() {
        let metrics = LevelMetrics {
            minor_violations_30d: 3,
            ..strong()
        };
        assert_eq!(LevelEvaluator::new().evaluate(AgentLevel::new(3), &metrics), LevelChange::Hold);
    }

    #[test]
    fn demotion_wins_over_promotion() {
        let metrics = LevelMetrics {
            consecutive_failures: 5,
            ..strong()
        };
        match LevelEvaluator::new().evaluate(AgentLevel::new(2), &metrics) {
            LevelChange::Demote { to, reasons } => {
                assert_eq!(to, AgentLevel::new(1));
                assert_eq!(reasons.len(), 1);
            }
            other => panic!("expected demotion, got {:?}", other),
        }
    }

    #[test]
    fn low_review_score_needs_enough_samples() {
        let few = LevelMetrics {
            avg_review_score: 0.2,
            reviewed_tasks: 4,
            ..Default::default()
        };
        assert!(LevelEvaluator::demotion_reasons(&few).is_empty());

        let many = LevelMetrics {
            reviewed_tasks: 10,
            ..few
        };
        assert_eq!(LevelEvaluator::demotion_reasons(&many).len(), 1);
    }

    #[test]
    fn levels_clamp_at_bounds() {
        let evaluator = LevelEvaluator::new();
        assert_eq!(evaluator.evaluate(AgentLevel::MAX, &strong()), LevelChange::Hold);

        let failing = LevelMetrics {
            consecutive_failures: 9,
            ..Default::default()
        };
        assert_eq!(evaluator.evaluate(AgentLevel::MIN, &failing), LevelChange::Hold);
    }
}
