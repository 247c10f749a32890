use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::types::{EditProposal, ErrorKind};

const CODE_FENCE: &str = "```";
const MAX_HEADING_DEPTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsafePattern {
    ScriptTag,
    IframeTag,
    JavascriptUrl,
    EventHandler,
    EmbedTag,
    ObjectTag,
}

impl fmt::Display for UnsafePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UnsafePattern::ScriptTag => "script tag",
            UnsafePattern::IframeTag => "iframe tag",
            UnsafePattern::JavascriptUrl => "javascript: URL",
            UnsafePattern::EventHandler => "inline event handler",
            UnsafePattern::EmbedTag => "embed tag",
            UnsafePattern::ObjectTag => "object tag",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureIssue {
    UnbalancedBrackets,
    UnbalancedParentheses,
    HeadingTooDeep { line: usize },
    UnterminatedCodeFence,
}

impl fmt::Display for StructureIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureIssue::UnbalancedBrackets => f.write_str("unbalanced square brackets"),
            StructureIssue::UnbalancedParentheses => f.write_str("unbalanced parentheses"),
            StructureIssue::HeadingTooDeep { line } => {
                write!(f, "heading deeper than {MAX_HEADING_DEPTH} levels on line {line}")
            }
            StructureIssue::UnterminatedCodeFence => f.write_str("unterminated code fence"),
        }
    }
}

/// Why a proposal cannot be applied to the current document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("The text to edit was not found in the document. The content may have changed.")]
    NotFound,
    #[error(
        "Found {occurrences} matches for the text to edit. Please select a more specific section."
    )]
    Ambiguous { occurrences: usize },
    #[error("The proposed edit contains potentially unsafe content ({pattern}).")]
    Unsafe { pattern: UnsafePattern },
    #[error("The proposed edit would create malformed Markdown syntax ({issue}).")]
    Malformed { issue: StructureIssue },
}

impl EditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EditError::NotFound => ErrorKind::NotFound,
            EditError::Ambiguous { .. } => ErrorKind::Ambiguous,
            EditError::Unsafe { .. } => ErrorKind::Unsafe,
            EditError::Malformed { .. } => ErrorKind::Malformed,
        }
    }
}

static UNSAFE_PATTERNS: Lazy<Vec<(UnsafePattern, Regex)>> = Lazy::new(|| {
    [
        (UnsafePattern::ScriptTag, r"(?i)<\s*script\b"),
        (UnsafePattern::IframeTag, r"(?i)<\s*iframe\b"),
        (UnsafePattern::JavascriptUrl, r"(?i)javascript:"),
        (UnsafePattern::EventHandler, r"(?i)\bon\w+\s*="),
        (UnsafePattern::EmbedTag, r"(?i)<\s*embed\b"),
        (UnsafePattern::ObjectTag, r"(?i)<\s*object\b"),
    ]
    .into_iter()
    .map(|(pattern, source)| {
        (
            pattern,
            Regex::new(source).expect("invalid unsafe content regex"),
        )
    })
    .collect()
});

/// Decides whether `proposal` can be applied to `document` and returns the
/// resulting document.
///
/// Checks run in a fixed order and the first failure wins: the original text
/// must exist, must occur exactly once, the replacement must pass the unsafe
/// content blocklist, and the resulting document must be structurally sound.
/// Nothing is mutated; callers commit the returned string themselves.
pub fn validate_edit(document: &str, proposal: &EditProposal) -> Result<String, EditError> {
    let original = proposal.original_text.as_str();

    if !document.contains(original) {
        return Err(EditError::NotFound);
    }

    let occurrences = count_occurrences(document, original);
    if occurrences > 1 {
        return Err(EditError::Ambiguous { occurrences });
    }

    if let Some(pattern) = find_unsafe_content(&proposal.proposed_text) {
        return Err(EditError::Unsafe { pattern });
    }

    let updated = document.replacen(original, &proposal.proposed_text, 1);
    check_structure(&updated).map_err(|issue| EditError::Malformed { issue })?;

    Ok(updated)
}

/// Non-overlapping literal occurrences. No pattern syntax is interpreted.
pub fn count_occurrences(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

pub fn find_unsafe_content(text: &str) -> Option<UnsafePattern> {
    UNSAFE_PATTERNS
        .iter()
        .find(|(_, regex)| regex.is_match(text))
        .map(|(pattern, _)| *pattern)
}

/// Structural checks over a whole markdown document.
///
/// Brackets and parentheses are counted across the entire text rather than
/// inside link constructs only.
pub fn check_structure(markdown: &str) -> Result<(), StructureIssue> {
    let mut brackets: i64 = 0;
    let mut parens: i64 = 0;

    for ch in markdown.chars() {
        match ch {
            '[' => brackets += 1,
            ']' => brackets -= 1,
            '(' => parens += 1,
            ')' => parens -= 1,
            _ => continue,
        }
        if brackets < 0 {
            return Err(StructureIssue::UnbalancedBrackets);
        }
        if parens < 0 {
            return Err(StructureIssue::UnbalancedParentheses);
        }
    }

    if brackets != 0 {
        return Err(StructureIssue::UnbalancedBrackets);
    }
    if parens != 0 {
        return Err(StructureIssue::UnbalancedParentheses);
    }

    if let Some(line) = deep_heading_line(markdown) {
        return Err(StructureIssue::HeadingTooDeep { line });
    }

    if count_occurrences(markdown, CODE_FENCE) % 2 != 0 {
        return Err(StructureIssue::UnterminatedCodeFence);
    }

    Ok(())
}

/// Line number (counted by `\n`) of the first line opening with more than
/// `MAX_HEADING_DEPTH` `#`s. A lone `\r`, U+2028 or U+2029 also starts a line.
fn deep_heading_line(markdown: &str) -> Option<usize> {
    let too_deep = "#".repeat(MAX_HEADING_DEPTH + 1);
    let mut line = 1;
    let mut at_line_start = true;

    for (index, ch) in markdown.char_indices() {
        if at_line_start && markdown[index..].starts_with(too_deep.as_str()) {
            return Some(line);
        }
        at_line_start = matches!(ch, '\n' | '\r' | '\u{2028}' | '\u{2029}');
        if ch == '\n' {
            line += 1;
        }
    }
    None
}
