//! Pulling verification steps and a summary out of agent output.

use std::sync::OnceLock;
use regex::Regex;

/// Maximum verification lines kept.
pub const MAX_VERIFICATION_LINES: usize = 5;

/// Maximum summary length in characters.
pub const MAX_SUMMARY_CHARS: usize = 280;

fn checkmark() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[✓✔✅☑]|\[[xX]\])\s*(.+)$").expect("valid regex"))
}

fn numbered() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+[.)]\s+(.+)$").expect("valid regex"))
}

fn bullet() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-*•]\s+(.+)$").expect("valid regex"))
}

/// Lines outside fenced code blocks.
fn prose_lines(output: &str) -> impl Iterator<Item = &str> {
    let mut in_fence = false;
    output.lines().filter(move |line| {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            return false;
        }
        !in_fence
    })
}

/// Up to five verification lines: checkmarks first, then numbered items,
/// then bullets.
pub fn extract_verification(output: &str) -> Vec<String> {
    let mut found = Vec::new();
    for re in [checkmark(), numbered(), bullet()] {
        for line in prose_lines(output) {
            if found.len() >= MAX_VERIFICATION_LINES {
                return found;
            }
            if let Some(caps) = re.captures(line) {
                let item = caps[1].trim().to_string();
                if !item.is_empty() && !found.contains(&item) {
                    found.push(item);
                }
            }
        }
    }
    found
}

/// First prose paragraph, whitespace-collapsed and capped at 280 characters.
pub fn extract_summary(output: &str) -> String {
    let mut paragraph: Vec<&str> = Vec::new();
    for line in prose_lines(output) {
        let trimmed = line.trim();
        let structural = trimmed.starts_with('#')
            || checkmark().is_match(line)
            || numbered().is_match(line)
            || bullet().is_match(line);

        if trimmed.is_empty() || structural {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        paragraph.push(trimmed);
    }

    let text = paragraph.join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&text, MAX_SUMMARY_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max - 3).collect();
    cut.push_str("...");
    cut
}
