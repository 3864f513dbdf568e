//! Agent metrics derived from the task set.

use chrono::{DateTime, Utc};
use mission_core::{AgentProfile, Task, TaskStatus};
use mission_guardrails::LevelMetrics;

/// Derive level-evaluation metrics for `agent` from every task it executed.
///
/// Superseded tasks do not count as failures. No violation feed exists, so
/// violation counters stay zero.
pub fn derive_metrics(agent: &AgentProfile, tasks: &[Task], now: DateTime<Utc>) -> LevelMetrics {
    let own: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.executing_agent() == Some(&agent.id))
        .collect();

    let tasks_completed = own
        .iter()
        .filter(|t| t.status == TaskStatus::Done)
        .filter(|t| t.completed_at.map_or(false, |at| at >= agent.level_since))
        .count() as u32;

    let scores: Vec<f32> = own
        .iter()
        .filter_map(|t| t.review_history.last().map(|entry| entry.confidence_score))
        .collect();
    let avg_review_score = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f32>() / scores.len() as f32
    };

    let mut finished: Vec<&Task> = own
        .iter()
        .copied()
        .filter(|t| t.status.is_terminal() && !t.is_superseded())
        .collect();
    finished.sort_by_key(|t| std::cmp::Reverse(t.completed_at.unwrap_or(t.updated_at)));
    let consecutive_failures = finished
        .iter()
        .take_while(|t| t.status == TaskStatus::Failed)
        .count() as u32;

    let last_completion = own
        .iter()
        .filter(|t| t.status == TaskStatus::Done)
        .filter_map(|t| t.completed_at)
        .max()
        .unwrap_or(agent.level_since);

    LevelMetrics {
        tasks_completed,
        avg_review_score,
        reviewed_tasks: scores.len() as u32,
        time_in_level_days: days_between(agent.level_since, now),
        consecutive_failures,
        days_inactive: days_between(last_completion, now),
        ..Default::default()
    }
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    (to - from).num_days().max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mission_core::{AgentId, ReviewAction, ReviewHistoryEntry};

    fn finished(agent: &str, status: TaskStatus, at: DateTime<Utc>) -> Task {
        let mut task = Task::standalone("t").with_agent(agent);
        task.status = status;
        task.completed_at = Some(at);
        task
    }

    #[test]
    fn counts_completions_and_failure_streak() {
        let now = Utc::now();
        let mut agent = AgentProfile::new("a1", 1);
        agent.level_since = now - Duration::days(10);

        let tasks = vec![
            finished("a1", TaskStatus::Done, now - Duration::days(5)),
            finished("a1", TaskStatus::Failed, now - Duration::days(2)),
            finished("a1", TaskStatus::Failed, now - Duration::days(1)),
            finished("other", TaskStatus::Failed, now),
        ];

        let metrics = derive_metrics(&agent, &tasks, now);
        assert_eq!(metrics.tasks_completed, 1);
        assert_eq!(metrics.consecutive_failures, 2);
        assert_eq!(metrics.time_in_level_days, 10);
        assert_eq!(metrics.days_inactive, 5);
    }

    #[test]
    fn review_scores_use_latest_entry() {
        let now = Utc::now();
        let agent = AgentProfile::new("a1", 2);
        let mut task = finished("a1", TaskStatus::Done, now);
        for (round, score) in [(0, 0.2), (1, 0.9)] {
            task.review_history.push(ReviewHistoryEntry {
                round,
                action: ReviewAction::Approve,
                summary: String::new(),
                confidence_score: score,
                specific_issues: Vec::new(),
                new_instructions: None,
                reviewer_agent_id: AgentId::from("r"),
                reviewed_at: now,
            });
        }

        let metrics = derive_metrics(&agent, &[task], now);
        assert_eq!(metrics.reviewed_tasks, 1);
        assert!((metrics.avg_review_score - 0.9).abs() < f32::EPSILON);
    }
}
