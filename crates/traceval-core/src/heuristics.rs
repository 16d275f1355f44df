//! Text mining for review / change-log sections when a trace carries no structured
//! metadata for them.
//!
//! A section starts at a heading match (the heading line itself is not captured) and
//! runs until a blank line, or a `---` rule for the patterns that use one, or the end
//! of the text.

use std::sync::OnceLock;

use regex::Regex;

use crate::sanitize::truncate;

/// Findings are capped at this many characters before a truncation marker.
pub const MAX_SECTION_CHARS: usize = 2000;

pub const REVIEW_NOT_FOUND: &str = "No breaker review found in trace";
pub const CHANGE_LOG_NOT_FOUND: &str = "No change log found in trace";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Breaker / failure-scenario review.
    Review,
    /// Change log / revision notes.
    ChangeLog,
}

impl Section {
    /// Placeholder shown to a judge when the section could not be found.
    pub fn not_found_text(&self) -> &'static str {
        match self {
            Section::Review => REVIEW_NOT_FOUND,
            Section::ChangeLog => CHANGE_LOG_NOT_FOUND,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SectionEnd {
    BlankLine,
    Rule,
}

struct HeadingPattern {
    heading: Regex,
    end: SectionEnd,
}

impl HeadingPattern {
    fn new(pattern: &str, end: SectionEnd) -> Self {
        Self {
            heading: Regex::new(&format!("(?i){pattern}")).expect("static heading pattern"),
            end,
        }
    }
}

fn review_patterns() -> &'static [HeadingPattern] {
    static PATTERNS: OnceLock<Vec<HeadingPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            HeadingPattern::new(r"(?:FAILURE SCENARIO|FAILURE)[^\n]*\n", SectionEnd::BlankLine),
            HeadingPattern::new(r"BREAKER[^\n]*\n", SectionEnd::BlankLine),
            HeadingPattern::new(r"\[Codex\][^\n]*?BREAKER[^\n]*\n", SectionEnd::Rule),
            HeadingPattern::new(r"REQUEST.?CHANGES[^\n]*\n", SectionEnd::BlankLine),
        ]
    })
}

fn change_log_patterns() -> &'static [HeadingPattern] {
    static PATTERNS: OnceLock<Vec<HeadingPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            HeadingPattern::new(r"(?:CHANGE LOG|CHANGELOG)[^\n]*\n", SectionEnd::BlankLine),
            HeadingPattern::new(
                r"v\d+\.\d+[^\n]*?(?:FIXED|ADDRESSED|DONE)[^\n]*\n",
                SectionEnd::BlankLine,
            ),
            HeadingPattern::new(r"REVISION[^\n]*\n", SectionEnd::BlankLine),
            HeadingPattern::new(r"ISSUES? (?:FIXED|ADDRESSED|RESOLVED)[^\n]*\n", SectionEnd::BlankLine),
        ]
    })
}

/// Length of the section body starting at the beginning of `rest`.
fn body_len(rest: &str, end: SectionEnd) -> usize {
    let mut len = 0;
    for line in rest.split_inclusive('\n') {
        let stop = match end {
            SectionEnd::BlankLine => line.trim().is_empty(),
            SectionEnd::Rule => line.trim_start().starts_with("---"),
        };
        if stop {
            break;
        }
        len += line.len();
    }
    len
}

fn find_bodies<'a>(content: &'a str, pattern: &HeadingPattern, out: &mut Vec<&'a str>) {
    let mut pos = 0;
    while let Some(m) = pattern.heading.find_at(content, pos) {
        let start = m.end();
        let len = body_len(&content[start..], pattern.end);
        let body = content[start..start + len].trim_end();
        if !body.trim().is_empty() {
            out.push(body);
        }
        // Always make progress, even on an empty body.
        pos = (start + len).max(m.end());
        if pos >= content.len() {
            break;
        }
    }
}

/// All bodies for `section`, in pattern-declaration order, joined and capped.
/// `None` when no pattern produced anything.
pub fn extract_section(content: &str, section: Section) -> Option<String> {
    let patterns = match section {
        Section::Review => review_patterns(),
        Section::ChangeLog => change_log_patterns(),
    };

    let mut bodies = Vec::new();
    for pattern in patterns {
        find_bodies(content, pattern, &mut bodies);
    }

    if bodies.is_empty() {
        None
    } else {
        Some(truncate(&bodies.join("\n"), MAX_SECTION_CHARS))
    }
}

pub fn extract_breaker_review(content: &str) -> Option<String> {
    extract_section(content, Section::Review)
}

pub fn extract_change_log(content: &str) -> Option<String> {
    extract_section(content, Section::ChangeLog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_body_stops_at_blank_line() {
        let text = "intro\nFAILURE SCENARIO 1: race\nlock dropped early\nretry storms\n\nunrelated\n";
        assert_eq!(
            extract_breaker_review(text).as_deref(),
            Some("lock dropped early\nretry storms")
        );
    }

    #[test]
    fn test_headings_are_case_insensitive() {
        let text = "Failure scenario:\nthe cache goes stale\n";
        assert_eq!(extract_breaker_review(text).as_deref(), Some("the cache goes stale"));
        let text = "request changes\nrename the flag\n";
        assert_eq!(extract_breaker_review(text).as_deref(), Some("rename the flag"));
    }

    #[test]
    fn test_matches_concatenate_in_pattern_order() {
        // The BREAKER heading appears first in the text but its pattern is declared
        // after the FAILURE pattern.
        let text = "BREAKER notes\nb-body\n\nFAILURE mode\nf-body\n";
        assert_eq!(extract_breaker_review(text).as_deref(), Some("f-body\nb-body"));
    }

    #[test]
    fn test_codex_section_runs_to_rule() {
        let text = "[Codex] acting as BREAKER\npoint one\n\npoint two\n---\nafter\n";
        let review = extract_breaker_review(text).unwrap();
        // The plain BREAKER pattern also sees this heading and stops at the blank line.
        assert_eq!(review, "point one\npoint one\n\npoint two");
    }

    #[test]
    fn test_change_log_patterns() {
        let text = "Change Log\n- fixed parser\n\nv1.2 - FIXED\n- timeout raised\n\nIssues resolved:\n- flaky test\n";
        let log = extract_change_log(text).unwrap();
        assert_eq!(log, "- fixed parser\n- timeout raised\n- flaky test");
    }

    #[test]
    fn test_not_found() {
        assert_eq!(extract_breaker_review("nothing relevant here"), None);
        assert_eq!(extract_change_log(""), None);
        // A heading with an empty body is not a finding.
        assert_eq!(extract_change_log("CHANGELOG\n\nstuff"), None);
        assert_eq!(Section::Review.not_found_text(), REVIEW_NOT_FOUND);
    }

    #[test]
    fn test_heading_on_last_line_without_newline_is_ignored() {
        assert_eq!(extract_breaker_review("text\nFAILURE"), None);
    }

    #[test]
    fn test_findings_are_capped() {
        let text = format!("FAILURE\n{}\n", "x".repeat(5000));
        let review = extract_breaker_review(&text).unwrap();
        assert!(review.starts_with(&"x".repeat(MAX_SECTION_CHARS)));
        assert!(review.ends_with("[TRUNCATED - 3000 chars removed]"));
    }
}
