//! Parsing reviewer output into a decision.
//!
//! Never fails: fenced JSON, then bare JSON, then keyword heuristics, and
//! finally a conservative `revise` carrying the raw text.

use std::sync::OnceLock;
use regex::Regex;
use serde::Deserialize;
use mission_core::{AgentId, ReviewAction};

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseSource {
    /// A fenced ```json block
    FencedJson,
    /// A bare JSON object in the text
    BareJson,
    /// Keyword heuristics
    Keywords,
    /// Nothing recognizable; conservative default
    Fallback,
}

/// A parsed review decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewDecision {
    /// Decision
    pub action: ReviewAction,
    /// Short summary
    pub summary: String,
    /// Reviewer confidence, 0-1
    pub confidence: f32,
    /// Problems found
    pub specific_issues: Vec<String>,
    /// Instructions for the follow-up task
    pub new_instructions: Option<String>,
    /// Agent the follow-up should go to
    pub reassign_to: Option<AgentId>,
    /// How the decision was parsed
    pub source: ParseSource,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(alias = "decision", alias = "verdict")]
    action: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default, alias = "confidence_score")]
    confidence: Option<f32>,
    #[serde(default, alias = "issues")]
    specific_issues: Vec<String>,
    #[serde(default, alias = "instructions")]
    new_instructions: Option<String>,
    #[serde(default, alias = "assign_to", alias = "agent_id")]
    reassign_to: Option<String>,
}

fn fenced_json() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?[ \t]*\r?\n(.*?)```").expect("valid regex"))
}

fn approval_words() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(approved?|looks good|lgtm)\b").expect("valid regex"))
}

fn negated_approval() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(not|never|cannot|can't|won't|don't|doesn't|isn't)\s+(be\s+)?(yet\s+)?(approved?|look\s+good)")
            .expect("valid regex")
    })
}

fn redo_words() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(redo|start over|from scratch)\b").expect("valid regex"))
}

fn parse_action(raw: &str) -> Option<ReviewAction> {
    match raw.trim().to_lowercase().as_str() {
        "approve" | "approved" | "accept" | "pass" => Some(ReviewAction::Approve),
        "revise" | "revision" | "changes_requested" | "request_changes" => Some(ReviewAction::Revise),
        "redo" | "reject" | "restart" => Some(ReviewAction::Redo),
        _ => None,
    }
}

fn from_raw(raw: RawDecision, source: ParseSource) -> Option<ReviewDecision> {
    let action = parse_action(&raw.action)?;
    Some(ReviewDecision {
        action,
        summary: raw.summary.unwrap_or_default(),
        confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        specific_issues: raw.specific_issues,
        new_instructions: raw.new_instructions.filter(|s| !s.trim().is_empty()),
        reassign_to: raw.reassign_to.filter(|s| !s.trim().is_empty()).map(AgentId::from),
        source,
    })
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect()
}

/// Parse reviewer output.
pub fn parse_review_decision(text: &str) -> ReviewDecision {
    for caps in fenced_json().captures_iter(text) {
        if let Ok(raw) = serde_json::from_str::<RawDecision>(caps[1].trim()) {
            if let Some(decision) = from_raw(raw, ParseSource::FencedJson) {
                return decision;
            }
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(raw) = serde_json::from_str::<RawDecision>(&text[start..=end]) {
                if let Some(decision) = from_raw(raw, ParseSource::BareJson) {
                    return decision;
                }
            }
        }
    }

    let keyword = |action, confidence, instructions: Option<String>| ReviewDecision {
        action,
        summary: first_line(text),
        confidence,
        specific_issues: Vec::new(),
        new_instructions: instructions,
        reassign_to: None,
        source: ParseSource::Keywords,
    };

    if approval_words().is_match(text) && !negated_approval().is_match(text) {
        return keyword(ReviewAction::Approve, 0.5, None);
    }
    if redo_words().is_match(text) {
        return keyword(ReviewAction::Redo, 0.5, Some(text.trim().to_string()));
    }

    ReviewDecision {
        action: ReviewAction::Revise,
        summary: first_line(text),
        confidence: 0.0,
        specific_issues: Vec::new(),
        new_instructions: Some(text.trim().to_string()).filter(|s| !s.is_empty()),
        reassign_to: None,
        source: ParseSource::Fallback,
    }
}
