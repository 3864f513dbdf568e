//! Candidate ranking for the scheduling tick.

use std::cmp::Ordering;
use mission_core::{AgentLevel, RunPhase, Task};

/// A task the tick may launch.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The task
    pub task: Task,
    /// Which phase would launch
    pub phase: RunPhase,
    /// Level of the agent that would run it
    pub agent_level: AgentLevel,
}

/// Strategy for ordering launch candidates.
pub trait TaskSelector: Send + Sync {
    /// Sort candidates so the first should launch first.
    fn rank(&self, candidates: &mut [Candidate]);
}

/// Review phase first, then agent level descending, then due time ascending
/// (missing last), then creation time.
#[derive(Debug, Clone, Default)]
pub struct DefaultSelector;

impl DefaultSelector {
    /// Create a new default selector.
    pub fn new() -> Self {
        Self
    }

    fn compare(a: &Candidate, b: &Candidate) -> Ordering {
        let phase_rank = |c: &Candidate| match c.phase {
            RunPhase::Review => 0,
            RunPhase::Primary => 1,
        };
        phase_rank(a)
            .cmp(&phase_rank(b))
            .then_with(|| b.agent_level.cmp(&a.agent_level))
            .then_with(|| match (a.task.due_at, b.task.due_at) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.task.created_at.cmp(&b.task.created_at))
    }
}

impl TaskSelector for DefaultSelector {
    fn rank(&self, candidates: &mut [Candidate]) {
        candidates.sort_by(Self::compare);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candidate(title: &str, phase: RunPhase, level: u8) -> Candidate {
        Candidate {
            task: Task::standalone(title),
            phase,
            agent_level: AgentLevel::new(level),
        }
    }

    fn titles(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.task.title.as_str()).collect()
    }

    #[test]
    fn review_then_level() {
        let mut list = vec![
            candidate("low", RunPhase::Primary, 1),
            candidate("review", RunPhase::Review, 1),
            candidate("high", RunPhase::Primary, 4),
        ];
        DefaultSelector::new().rank(&mut list);
        assert_eq!(titles(&list), vec!["review", "high", "low"]);
    }

    #[test]
    fn due_time_with_missing_last() {
        let now = Utc::now();
        let mut later = candidate("later", RunPhase::Primary, 2);
        later.task.due_at = Some(now + Duration::hours(2));
        let mut sooner = candidate("sooner", RunPhase::Primary, 2);
        sooner.task.due_at = Some(now + Duration::hours(1));
        let none = candidate("none", RunPhase::Primary, 2);

        let mut list = vec![none, later, sooner];
        DefaultSelector::new().rank(&mut list);
        assert_eq!(titles(&list), vec!["sooner", "later", "none"]);
    }

    #[test]
    fn creation_time_breaks_ties() {
        let mut old = candidate("old", RunPhase::Primary, 2);
        old.task.created_at = Utc::now() - Duration::hours(1);
        let new = candidate("new", RunPhase::Primary, 2);
        let mut list = vec![new, old];
        DefaultSelector::new().rank(&mut list);
        assert_eq!(titles(&list), vec!["old", "new"]);
    }
}
