//! The completion proof block and its assessment.

use std::sync::OnceLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use mission_core::Time;

/// Value of the block's `type` field.
pub const PROOF_TYPE: &str = "completion_proof";

/// Current block version.
pub const PROOF_VERSION: u32 = 1;

/// Structured evidence appended to an implementation task's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofBlock {
    /// Always `completion_proof`
    #[serde(rename = "type")]
    pub kind: String,
    /// Block format version
    pub version: u32,
    /// Whether the task was classified as implementation work
    pub implementation: bool,
    /// Whether the task declared itself analysis-only
    #[serde(default)]
    pub analysis_only: bool,
    /// Working-tree paths that changed during the run
    #[serde(default)]
    pub changed_files: Vec<String>,
    /// Verification steps reported by the agent
    #[serde(default)]
    pub verification: Vec<String>,
    /// One-paragraph summary
    #[serde(default)]
    pub summary: String,
    /// When the block was generated
    pub generated_at: Time,
}

/// Outcome of checking a stored output for proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ProofAssessment {
    /// An implementation block with at least one changed file
    Verified,
    /// Proof is required but absent, or the block declares analysis-only work
    Missing,
    /// A block is present but malformed or lists no changed files
    Invalid(String),
    /// The task does not need proof
    NotRequired,
}

fn fenced_json() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json[ \t]*\r?\n(.*?)```").expect("valid regex"))
}

impl ProofBlock {
    /// Create a block stamped now.
    pub fn new(implementation: bool, analysis_only: bool) -> Self {
        Self {
            kind: PROOF_TYPE.to_string(),
            version: PROOF_VERSION,
            implementation,
            analysis_only,
            changed_files: Vec::new(),
            verification: Vec::new(),
            summary: String::new(),
            generated_at: chrono::Utc::now(),
        }
    }

    /// Render as a fenced json block.
    pub fn render(&self) -> String {
        let json = serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string());
        format!("```json\n{}\n```", json)
    }

    /// Append the block unless the output already carries one.
    pub fn append_to(&self, output: &str) -> String {
        if Self::find_last(output).is_some() {
            return output.to_string();
        }
        let trimmed = output.trim_end();
        if trimmed.is_empty() {
            self.render()
        } else {
            format!("{}\n\n{}", trimmed, self.render())
        }
    }

    /// The last fenced block shaped like a proof.
    ///
    /// `Some(Err(_))` means a block declares itself a proof but does not
    /// deserialize.
    pub fn find_last(output: &str) -> Option<Result<ProofBlock, String>> {
        fenced_json()
            .captures_iter(output)
            .filter_map(|caps| {
                let value: serde_json::Value = serde_json::from_str(caps[1].trim()).ok()?;
                (value.get("type").and_then(|t| t.as_str()) == Some(PROOF_TYPE)).then_some(value)
            })
            .last()
            .map(|value| serde_json::from_value(value).map_err(|e| e.to_string()))
    }

    /// Whether the block reports implementation work rather than analysis.
    pub fn claims_implementation(&self) -> bool {
        self.implementation && !self.analysis_only
    }

    /// Check an implementation block is well formed and names changed files.
    pub fn validate(&self) -> Result<(), String> {
        if self.version == 0 || self.version > PROOF_VERSION {
            return Err(format!("unsupported proof version {}", self.version));
        }
        if self.changed_files.is_empty() {
            return Err("implementation proof lists no changed files".into());
        }
        Ok(())
    }

    /// Assess an output given whether proof is required.
    pub fn assess(required: bool, output: &str) -> ProofAssessment {
        if !required {
            return ProofAssessment::NotRequired;
        }
        match Self::find_last(output) {
            None => ProofAssessment::Missing,
            Some(Err(e)) => ProofAssessment::Invalid(e),
            Some(Ok(block)) if !block.claims_implementation() => ProofAssessment::Missing,
            Some(Ok(block)) => match block.validate() {
                Ok(()) => ProofAssessment::Verified,
                Err(e) => ProofAssessment::Invalid(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> ProofBlock {
        let mut block = ProofBlock::new(true, false);
        block.changed_files = vec!["src/api.rs".into()];
        block.summary = "Added endpoint".into();
        block
    }

    #[test]
    fn append_is_idempotent() {
        let once = block().append_to("Work finished.");
        let twice = block().append_to(&once);
        assert_eq!(once, twice);
        assert_eq!(once.matches(PROOF_TYPE).count(), 1);
    }

    #[test]
    fn assess_finds_trailing_block() {
        let output = block().append_to("```json\n{\"unrelated\": true}\n```\nDone.");
        assert_eq!(ProofBlock::assess(true, &output), ProofAssessment::Verified);
    }

    #[test]
    fn assess_reports_missing_and_not_required() {
        assert_eq!(ProofBlock::assess(true, "no proof here"), ProofAssessment::Missing);
        assert_eq!(ProofBlock::assess(false, "no proof here"), ProofAssessment::NotRequired);
    }

    #[test]
    fn assess_rejects_malformed_or_empty_blocks() {
        let malformed = "```json\n{\"type\": \"completion_proof\", \"version\": \"x\"}\n```";
        assert!(matches!(ProofBlock::assess(true, malformed), ProofAssessment::Invalid(_)));

        let empty = ProofBlock::new(true, false).append_to("Done.");
        assert!(matches!(ProofBlock::assess(true, &empty), ProofAssessment::Invalid(_)));
    }

    #[test]
    fn verification_without_changed_files_is_invalid() {
        let mut block = ProofBlock::new(true, false);
        block.verification = vec!["cargo test passes".into()];
        let output = block.append_to("Done.");
        assert_eq!(
            ProofBlock::assess(true, &output),
            ProofAssessment::Invalid("implementation proof lists no changed files".into())
        );
    }

    #[test]
    fn analysis_only_block_counts_as_missing() {
        let output = ProofBlock::new(true, true).append_to("Findings written up.");
        assert_eq!(ProofBlock::assess(true, &output), ProofAssessment::Missing);

        let mut with_files = block();
        with_files.analysis_only = true;
        let output = with_files.append_to("Findings written up.");
        assert_eq!(ProofBlock::assess(true, &output), ProofAssessment::Missing);
    }
}
