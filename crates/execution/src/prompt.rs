//! Prompts and session keys sent to the gateway.

use std::fmt::Write;
use mission_core::{AgentId, MissionId, ReviewAction, Task};

use crate::review::ReviewDecision;

/// Gateway session for an agent working on a mission.
pub fn session_key(agent: &AgentId, mission: &MissionId) -> String {
    format!("agent:{}:mission:{}", agent, mission)
}

/// Prompt for a task's primary phase.
pub fn primary(task: &Task) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Task: {}", task.title);
    if !task.description.is_empty() {
        let _ = writeln!(out, "\n{}", task.description);
    }
    if !task.input_text.is_empty() {
        let _ = writeln!(out, "\n## Instructions\n{}", task.input_text);
    }
    if !task.input_media.is_empty() {
        let _ = writeln!(out, "\n## Attachments");
        for media in &task.input_media {
            let _ = writeln!(out, "- {}", media);
        }
    }
    if task.revision_round > 0 {
        let _ = writeln!(out, "\nThis is revision round {}.", task.revision_round);
    }
    let _ = writeln!(
        out,
        "\nWhen finished, summarize what you did and list how you verified it."
    );
    out
}

/// Prompt for the review phase.
pub fn review(task: &Task) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Review: {}", task.title);
    if !task.input_text.is_empty() {
        let _ = writeln!(out, "\n## Original instructions\n{}", task.input_text);
    }
    let _ = writeln!(
        out,
        "\n## Output to review\n{}",
        task.output_text.as_deref().unwrap_or("(no output)")
    );
    let _ = writeln!(
        out,
        "\nReply with a fenced json block:\n```json\n{{\"action\": \"approve|revise|redo\", \"confidence\": 0.0, \"summary\": \"...\", \"specific_issues\": [], \"new_instructions\": \"...\", \"assign_to\": null}}\n```"
    );
    out
}

/// Instructions for a task spawned by a revise or redo decision.
pub fn follow_up_input(parent: &Task, decision: &ReviewDecision) -> String {
    let mut out = String::new();
    match decision.action {
        ReviewAction::Redo => {
            let _ = writeln!(out, "The previous attempt was rejected. Start over.");
        }
        _ => {
            let _ = writeln!(
                out,
                "Revise the previous attempt (round {}).",
                parent.revision_round
            );
        }
    }
    if !decision.summary.is_empty() {
        let _ = writeln!(out, "\n## Reviewer summary\n{}", decision.summary);
    }
    if !decision.specific_issues.is_empty() {
        let _ = writeln!(out, "\n## Issues");
        for issue in &decision.specific_issues {
            let _ = writeln!(out, "- {}", issue);
        }
    }
    if let Some(instructions) = &decision.new_instructions {
        let _ = writeln!(out, "\n## New instructions\n{}", instructions);
    }
    if !parent.input_text.is_empty() {
        let _ = writeln!(out, "\n## Original instructions\n{}", parent.input_text);
    }
    if decision.action == ReviewAction::Revise {
        if let Some(previous) = &parent.output_text {
            let _ = writeln!(out, "\n## Previous output\n{}", previous);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::parse_review_decision;

    #[test]
    fn session_key_format() {
        assert_eq!(
            session_key(&AgentId::from("writer"), &MissionId::from("m1")),
            "agent:writer:mission:m1"
        );
    }

    #[test]
    fn follow_up_carries_instructions_and_output() {
        let mut parent = Task::standalone("Build API").with_input("Add /orders");
        parent.output_text = Some("first draft".into());
        let decision = parse_review_decision(
            "```json\n{\"action\": \"revise\", \"issues\": [\"no paging\"], \"new_instructions\": \"add paging\"}\n```",
        );
        let input = follow_up_input(&parent, &decision);
        assert!(input.contains("no paging"));
        assert!(input.contains("add paging"));
        assert!(input.contains("Add /orders"));
        assert!(input.contains("first draft"));
    }

    #[test]
    fn review_prompt_includes_output() {
        let mut task = Task::standalone("Write docs");
        task.output_text = Some("the docs".into());
        assert!(review(&task).contains("the docs"));
    }
}
