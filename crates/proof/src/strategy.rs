//! Deciding which tasks need a completion proof.

use mission_core::Task;
use regex::Regex;

/// Decides whether a task's output must carry a proof block.
pub trait ProofStrategy: Send + Sync {
    /// Whether the task is implementation work.
    fn requires_proof(&self, task: &Task) -> bool;

    /// Whether the task explicitly declares itself analysis-only.
    fn is_analysis_only(&self, task: &Task) -> bool;
}

const IMPLEMENTATION_KEYWORDS: &[&str] = &[
    "implement",
    "refactor",
    "schema",
    "migration",
    "endpoint",
    "bug fix",
    "bugfix",
    "fix bug",
    "hotfix",
    "feature",
    "integrate",
    "deploy",
    "write code",
    "unit test",
    "api",
    "database",
];

const ANALYSIS_HINTS: &[&str] = &[
    "analysis only",
    "analysis-only",
    "non-code",
    "no code",
    "research only",
    "do not modify",
];

/// Keyword allow-list classifier over title, description and instructions.
pub struct KeywordClassifier {
    implementation: Regex,
    analysis: Regex,
}

impl KeywordClassifier {
    /// Classifier with the built-in keyword lists.
    pub fn new() -> Self {
        Self::with_keywords(IMPLEMENTATION_KEYWORDS, ANALYSIS_HINTS)
    }

    /// Classifier with custom keyword lists.
    pub fn with_keywords(implementation: &[&str], analysis: &[&str]) -> Self {
        Self {
            implementation: word_alternation(implementation),
            analysis: word_alternation(analysis),
        }
    }

    fn haystack(task: &Task) -> String {
        format!("{}\n{}\n{}", task.title, task.description, task.input_text)
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ProofStrategy for KeywordClassifier {
    fn requires_proof(&self, task: &Task) -> bool {
        let text = Self::haystack(task);
        !self.analysis.is_match(&text) && self.implementation.is_match(&text)
    }

    fn is_analysis_only(&self, task: &Task) -> bool {
        self.analysis.is_match(&Self::haystack(task))
    }
}

fn word_alternation(words: &[&str]) -> Regex {
    let alternation = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    // An empty list must match nothing.
    let pattern = if alternation.is_empty() {
        r"[^\s\S]".to_string()
    } else {
        format!(r"(?i)\b(?:{})", alternation)
    };
    Regex::new(&pattern).unwrap_or_else(|_| Regex::new(r"[^\s\S]").expect("literal pattern"))
}
