//! Primary and review phases end to end.

mod common;

use common::Harness;
use mission_core::{AgentGuardrails, MissionId, MissionStatus, ReviewAction, RunPhase, Task, TaskStatus};
use mission_storage::Storage;

const REVISE: &str = "```json\n{\"action\": \"revise\", \"summary\": \"Too long\", \"new_instructions\": \"Cut it to one page\"}\n```";

#[tokio::test]
async fn streamed_output_is_stored_and_thinking_cleared() {
    let h = Harness::new();
    h.agent("writer", 4).await;
    let task = h
        .add(Task::standalone("Write release notes").with_agent("writer"))
        .await;

    let report = h.engine.tick().await;
    assert_eq!(report.launched, 1);
    let run = h.last_run();
    let started = h.load(&task.id).await;
    assert_eq!(started.status, TaskStatus::InProgress);
    assert_eq!(started.active_run_id.as_ref(), Some(&run));
    assert_eq!(started.active_phase, Some(RunPhase::Primary));

    h.delta(&run, "a").await;
    h.delta(&run, "b").await;
    assert_eq!(h.load(&task.id).await.active_thinking.as_deref(), Some("ab"));
    assert_eq!(h.engine.checkpoint(&task.id).await.unwrap().buffer, "ab");

    h.finish(&run, "ab").await;
    let done = h.load(&task.id).await;
    assert_eq!(done.status, TaskStatus::Done);
    assert_eq!(done.output_text.as_deref(), Some("ab"));
    assert!(done.active_thinking.is_none());
    assert!(done.active_run_id.is_none());
    assert!(done.completed_at.is_some());
    assert_eq!(h.engine.in_flight().await, 0);
    assert!(h.engine.checkpoint(&task.id).await.is_none());

    let mission = h.storage.load_mission(&task.mission_id()).await.unwrap().unwrap();
    assert_eq!(mission.status, MissionStatus::Done);
}

#[tokio::test]
async fn empty_final_uses_the_buffer() {
    let h = Harness::new();
    h.agent("writer", 4).await;
    let task = h
        .add(Task::standalone("Write release notes").with_agent("writer"))
        .await;
    h.engine.tick().await;
    let run = h.last_run();

    h.delta(&run, "streamed").await;
    h.finish(&run, "").await;
    assert_eq!(h.load(&task.id).await.output_text.as_deref(), Some("streamed"));
}

#[tokio::test]
async fn review_launches_right_after_primary() {
    let h = Harness::new();
    h.agent("writer", 4).await;
    h.agent("editor", 4).await;
    let task = h
        .add(
            Task::standalone("Draft launch announcement")
                .with_agent("writer")
                .with_reviewer("editor"),
        )
        .await;

    h.engine.tick().await;
    let primary = h.last_run();
    h.delta(&primary, "thinking out loud").await;
    h.finish(&primary, "The announcement").await;

    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].session_key.starts_with("agent:editor:mission:"));
    assert!(sent[1].message.contains("The announcement"));

    let in_review = h.load(&task.id).await;
    assert_eq!(in_review.status, TaskStatus::Review);
    assert_eq!(in_review.output_text.as_deref(), Some("The announcement"));
    assert_eq!(in_review.active_phase, Some(RunPhase::Review));
    assert_eq!(in_review.active_thinking.as_deref(), Some(""));
}

#[tokio::test]
async fn plain_text_approval_completes_the_task() {
    let h = Harness::new();
    h.agent("writer", 4).await;
    h.agent("editor", 4).await;
    let task = h
        .add(
            Task::standalone("Draft launch announcement")
                .with_agent("writer")
                .with_reviewer("editor"),
        )
        .await;

    h.engine.tick().await;
    h.finish(&h.last_run(), "The announcement").await;
    h.finish(&h.last_run(), "Looks good, approved!").await;

    let done = h.load(&task.id).await;
    assert_eq!(done.status, TaskStatus::Done);
    assert_eq!(done.output_text.as_deref(), Some("The announcement"));
    assert_eq!(done.review_notes.as_deref(), Some("Looks good, approved!"));
    assert_eq!(done.review_history.len(), 1);
    assert_eq!(done.review_history[0].action, ReviewAction::Approve);
    assert_eq!(done.review_history[0].reviewer_agent_id.as_str(), "editor");
}

#[tokio::test]
async fn revision_limit_fails_the_last_round() {
    let h = Harness::new();
    h.agent("writer", 4).await;
    h.agent("editor", 4).await;
    let mut original = Task::standalone("Draft launch announcement")
        .with_agent("writer")
        .with_reviewer("editor");
    original.max_revisions = 2;
    let original = h.add(original).await;

    let mut current = original.id.clone();
    for round in 0..3u32 {
        let report = h.engine.tick().await;
        assert_eq!(report.launched, 1, "round {round}");
        h.finish(&h.last_run(), "a draft").await;
        assert_eq!(h.load(&current).await.status, TaskStatus::Review);
        h.finish(&h.last_run(), REVISE).await;

        let reviewed = h.load(&current).await;
        assert_eq!(reviewed.status, TaskStatus::Failed);
        assert_eq!(reviewed.revision_round, round);
        if round < 2 {
            let next_id = reviewed.linked_revision_task_id.clone().unwrap();
            let next = h.load(&next_id).await;
            assert_eq!(next.revision_round, round + 1);
            assert_eq!(next.parent_task_id.as_ref(), Some(&current));
            assert_eq!(next.review_history.len(), round as usize + 1);
            assert!(next.input_text.contains("Cut it to one page"));
            current = next_id;
        } else {
            assert!(reviewed.linked_revision_task_id.is_none());
            assert!(reviewed.error_message.unwrap().contains("revision"));
        }
    }

    assert_eq!(h.tasks().await.len(), 3);
    let mission = h
        .storage
        .load_mission(&original.mission_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mission.status, MissionStatus::Failed);
}

#[tokio::test]
async fn redo_resets_round_clears_dependencies_and_reassigns() {
    let h = Harness::new();
    h.agent("writer", 4).await;
    h.agent("editor", 4).await;
    h.agent("closer", 4).await;
    let mission = MissionId::from("press");
    let prior = h
        .add(Task::new(&mission, "Gather quotes").with_agent("writer"))
        .await;
    let mut task = Task::new(&mission, "Draft press release")
        .with_agent("writer")
        .with_reviewer("editor")
        .with_dependencies(vec![prior.id.clone()]);
    task.revision_round = 1;
    let task = h.add(task).await;

    h.engine.tick().await;
    h.finish(&h.last_run(), "quotes").await;
    h.engine.tick().await;
    h.finish(&h.last_run(), "a release").await;
    h.finish(
        &h.last_run(),
        "```json\n{\"action\": \"redo\", \"summary\": \"Wrong audience\", \"assign_to\": \"closer\"}\n```",
    )
    .await;

    let parent = h.load(&task.id).await;
    assert_eq!(parent.status, TaskStatus::Failed);
    let redo = h.load(parent.linked_revision_task_id.as_ref().unwrap()).await;
    assert_eq!(redo.revision_round, 0);
    assert!(redo.dependency_task_ids.is_empty());
    assert_eq!(redo.primary_agent_id.as_ref().map(|a| a.as_str()), Some("closer"));
    assert_eq!(redo.status, TaskStatus::Todo);
}

#[tokio::test]
async fn low_confidence_approval_is_downgraded() {
    let h = Harness::new();
    h.agent_with(
        "writer",
        4,
        AgentGuardrails {
            auto_review_threshold: Some(0.9),
            ..Default::default()
        },
    )
    .await;
    h.agent("editor", 4).await;
    let task = h
        .add(
            Task::standalone("Draft launch announcement")
                .with_agent("writer")
                .with_reviewer("editor"),
        )
        .await;

    h.engine.tick().await;
    h.finish(&h.last_run(), "a draft").await;
    h.finish(
        &h.last_run(),
        "```json\n{\"action\": \"approve\", \"confidence\": 0.6}\n```",
    )
    .await;

    let reviewed = h.load(&task.id).await;
    assert_eq!(reviewed.status, TaskStatus::Failed);
    assert_eq!(reviewed.review_history[0].action, ReviewAction::Revise);
    let next = h.load(reviewed.linked_revision_task_id.as_ref().unwrap()).await;
    assert_eq!(next.revision_round, 1);
}

#[tokio::test]
async fn review_waits_when_budget_is_full() {
    let h = Harness::with_config(
        mission_execution::EngineConfig::default().with_max_concurrent_runs(1),
    );
    h.agent("writer", 4).await;
    h.agent("editor", 4).await;
    let reviewed = h
        .add(
            Task::standalone("Draft launch announcement")
                .with_agent("writer")
                .with_reviewer("editor"),
        )
        .await;
    let other = h
        .add(Task::standalone("Write release notes").with_agent("writer"))
        .await;

    h.engine.tick().await;
    h.finish(&h.last_run(), "a draft").await;
    // The review took the only slot; the other task waits.
    assert_eq!(h.load(&reviewed.id).await.active_phase, Some(RunPhase::Review));
    assert_eq!(h.load(&other.id).await.status, TaskStatus::Todo);
}
