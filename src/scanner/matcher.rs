//! Text and regex matching with line/column positions and rendered snippets
//!
//! A single `(text, pattern)` evaluation either short-circuits on an exact
//! match (the pattern covers the whole subject) or scans the subject for
//! every non-overlapping occurrence. Each occurrence carries its position,
//! the raw snippet around it and two highlighted renderings of that snippet.

use console::Style;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::ops::Range;
use std::sync::{PoisonError, RwLock};

const ELLIPSIS: &str = "...";

lazy_static! {
    // Forced so the marking survives when output is redirected to a report file
    static ref HIGHLIGHT: Style = Style::new().green().force_styling(true);
    static ref DIMMED: Style = Style::new().black().bright().force_styling(true);
}

/// How a pattern is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    /// Literal substring
    Text,
    /// Regular expression, matched anywhere in the subject
    Regex,
}

/// One located occurrence of a pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    /// Line number (1-indexed)
    pub line: usize,
    /// Byte column of the first matched byte (1-indexed)
    pub start_col: usize,
    /// Byte column of the last matched byte (1-indexed)
    pub end_col: usize,
    /// Raw text around the match, `...` marks a truncated side
    pub snippet: String,
    /// Snippet with the match highlighted and the context dimmed
    pub formatted_snippet: String,
    /// Formatted snippet on a single line
    #[serde(rename = "compressedFormattedSnippet")]
    pub compressed_snippet: String,
    /// The pattern covered the whole subject
    pub exact_match: bool,
}

/// Result of evaluating one pattern against one subject
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    pub matched: bool,
    pub exact: bool,
    pub results: Vec<MatchResult>,
}

impl MatchOutcome {
    fn none() -> Self {
        Self::default()
    }
}

enum Needle<'a> {
    Literal(&'a str),
    Pattern(&'a Regex),
}

/// Stateless matcher. Compiled regexes are cached per pattern string, and an
/// invalid pattern is reported once and then treated as matching nothing.
#[derive(Debug, Default)]
pub struct TextMatcher {
    regex_cache: RwLock<HashMap<String, Option<Regex>>>,
}

impl TextMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `pattern` against `text`.
    ///
    /// Empty patterns never match; a zero-length occurrence would otherwise
    /// match every position of every file.
    pub fn match_text(
        &self,
        text: &str,
        pattern: &str,
        search_type: SearchType,
        context_width: usize,
    ) -> MatchOutcome {
        if pattern.is_empty() {
            return MatchOutcome::none();
        }

        let regex;
        let needle = match search_type {
            SearchType::Text => Needle::Literal(pattern),
            SearchType::Regex => {
                regex = match self.compile(pattern) {
                    Some(regex) => regex,
                    None => return MatchOutcome::none(),
                };
                Needle::Pattern(&regex)
            }
        };

        if let Some(result) = exact_match(text, &needle) {
            return MatchOutcome {
                matched: true,
                exact: true,
                results: vec![result],
            };
        }

        let results = find_matches(text, &needle, context_width);
        MatchOutcome {
            matched: !results.is_empty(),
            exact: false,
            results,
        }
    }

    fn compile(&self, pattern: &str) -> Option<Regex> {
        if let Some(cached) = self
            .regex_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(pattern)
        {
            return cached.clone();
        }

        let compiled = match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!("invalid regex '{}': {} - treating it as no match", pattern, e);
                None
            }
        };
        self.regex_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pattern.to_string(), compiled.clone());
        compiled
    }
}

fn exact_match(text: &str, needle: &Needle<'_>) -> Option<MatchResult> {
    if text.is_empty() {
        return None;
    }
    let covers_text = match needle {
        Needle::Literal(literal) => *literal == text,
        Needle::Pattern(regex) => regex
            .find(text)
            .is_some_and(|m| m.start() == 0 && m.end() == text.len()),
    };
    if !covers_text {
        return None;
    }

    let mut formatted_snippet = String::with_capacity(text.len() + 32);
    format_window(&mut formatted_snippet, text, needle, 0..text.len());
    Some(MatchResult {
        line: 1,
        start_col: 1,
        end_col: text.len(),
        snippet: text.to_string(),
        compressed_snippet: compress_snippet(&formatted_snippet),
        formatted_snippet,
        exact_match: true,
    })
}

fn find_matches(text: &str, needle: &Needle<'_>, context_width: usize) -> Vec<MatchResult> {
    let mut results = Vec::new();
    let mut cursor = 0;

    while cursor < text.len() {
        let Some((start, end)) = next_match(text, needle, cursor) else {
            break;
        };
        results.push(build_result(text, needle, start, end, context_width));
        cursor = end;
    }

    results
}

/// Next non-empty occurrence at or after `cursor`, as byte offsets
fn next_match(text: &str, needle: &Needle<'_>, mut cursor: usize) -> Option<(usize, usize)> {
    match needle {
        Needle::Literal(literal) => text[cursor..]
            .find(literal)
            .map(|index| (cursor + index, cursor + index + literal.len())),
        Needle::Pattern(regex) => loop {
            let found = regex.find_at(text, cursor)?;
            if !found.is_empty() {
                return Some((found.start(), found.end()));
            }
            // step over the character after a zero-length hit
            let next = text[found.end()..].chars().next()?;
            cursor = found.end() + next.len_utf8();
        },
    }
}

fn build_result(
    text: &str,
    needle: &Needle<'_>,
    start: usize,
    end: usize,
    context_width: usize,
) -> MatchResult {
    let (line, start_col, end_col) = calculate_position(text, start, end);
    let (from, to) = snippet_bounds(text, start, end, context_width);
    let prefix = if from > 0 { ELLIPSIS } else { "" };
    let suffix = if to < text.len() { ELLIPSIS } else { "" };
    let window = &text[from..to];

    let snippet = format!("{prefix}{window}{suffix}");
    let mut formatted_snippet = String::with_capacity(snippet.len() + 32);
    paint(&mut formatted_snippet, &DIMMED, prefix);
    format_window(&mut formatted_snippet, window, needle, start - from..end - from);
    paint(&mut formatted_snippet, &DIMMED, suffix);

    MatchResult {
        line,
        start_col,
        end_col,
        compressed_snippet: compress_snippet(&formatted_snippet),
        snippet,
        formatted_snippet,
        exact_match: false,
    }
}

/// Line and 1-based byte columns of the occurrence `[start, end)`
pub fn calculate_position(text: &str, start: usize, end: usize) -> (usize, usize, usize) {
    let before = &text[..start];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |index| index + 1);

    (line, start - line_start + 1, end - line_start)
}

/// Byte range of the context window around `[start, end)`, widened outward
/// to character boundaries
fn snippet_bounds(text: &str, start: usize, end: usize, context_width: usize) -> (usize, usize) {
    let mut from = start.saturating_sub(context_width);
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = end.saturating_add(context_width).min(text.len());
    while !text.is_char_boundary(to) {
        to += 1;
    }
    (from, to)
}

/// Render `window` with the context dimmed. A literal marks only `focus`,
/// the occurrence being reported; a regex marks every hit in the window.
fn format_window(out: &mut String, window: &str, needle: &Needle<'_>, focus: Range<usize>) {
    let mut last = 0;

    match needle {
        Needle::Literal(_) => {
            paint(out, &DIMMED, &window[..focus.start]);
            paint(out, &HIGHLIGHT, &window[focus.clone()]);
            last = focus.end;
        }
        Needle::Pattern(regex) => {
            for found in regex.find_iter(window).filter(|m| !m.is_empty()) {
                paint(out, &DIMMED, &window[last..found.start()]);
                paint(out, &HIGHLIGHT, found.as_str());
                last = found.end();
            }
        }
    }

    paint(out, &DIMMED, &window[last..]);
}

fn paint(out: &mut String, style: &Style, segment: &str) {
    if !segment.is_empty() {
        let _ = write!(out, "{}", style.apply_to(segment));
    }
}

/// Escape newlines and tabs and collapse whitespace runs for one-line output
pub fn compress_snippet(snippet: &str) -> String {
    snippet
        .replace('\n', "\\n")
        .replace('\t', "\\t")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
