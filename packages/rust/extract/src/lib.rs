//! Recovering a JSON object from free-form assistant output.
//!
//! Assistants wrap their JSON in prose, put it in Markdown fences, or emit raw
//! newlines inside string literals. [`Extractor::extract`] tries a fixed list
//! of candidate substrings and a fixed list of parse strategies per candidate,
//! and returns the first JSON object that parses.
//!
//! Candidate order:
//! 1. the whole trimmed text
//! 2. the interior of each fenced code block, in order of appearance
//! 3. the span from the first `{` to the last `}`
//!
//! Per candidate: strict parse, then a parse after escaping control characters
//! inside strings, then the optional [`StructuralRepair`].

pub mod repair;

use std::sync::LazyLock;

use kanjigen_shared::{ExtractConfig, Record, escaped_tail};
use regex::Regex;
use serde_json::Value;
use tracing::trace;

pub use repair::{BalancingRepair, StructuralRepair};

/// Characters of unparsable output kept for diagnostics.
pub const DIAGNOSTIC_TAIL_CHARS: usize = 300;

/// Opening fence (with optional inline tag) through the next bare closing fence.
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*```[^\n]*\n((?s:.*?))^[ \t]*```[ \t]*\r?$").expect("valid regex")
});

/// Turns raw response text into a [`Record`].
pub struct Extractor {
    repair: Option<Box<dyn StructuralRepair>>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("repair", &self.repair.as_ref().map(|r| r.name()))
            .finish()
    }
}

impl Extractor {
    /// An extractor without structural repair.
    pub fn new() -> Self {
        Self { repair: None }
    }

    /// An extractor that falls back to `repair` when both strict parses fail.
    pub fn with_repair(repair: impl StructuralRepair + 'static) -> Self {
        Self {
            repair: Some(Box::new(repair)),
        }
    }

    /// Build from the `[extract]` config section.
    pub fn from_config(config: &ExtractConfig) -> Self {
        if config.structural_repair {
            Self::with_repair(BalancingRepair)
        } else {
            Self::new()
        }
    }

    /// First JSON object recoverable from `raw`, or `None`.
    pub fn extract(&self, raw: &str) -> Option<Record> {
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }

        candidates(text)
            .into_iter()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .find_map(|candidate| self.parse_candidate(candidate))
    }

    fn parse_candidate(&self, candidate: &str) -> Option<Record> {
        if let Some(obj) = parse_leading_object(candidate) {
            return Some(obj);
        }

        let escaped = escape_control_chars_in_strings(candidate);
        if let Some(obj) = parse_leading_object(&escaped) {
            trace!("parsed after escaping control characters");
            return Some(obj);
        }

        let repair = self.repair.as_ref()?;
        [candidate, escaped.as_str()].into_iter().find_map(|attempt| {
            match repair.repair(attempt) {
                Some(Value::Object(obj)) => {
                    trace!(repair = repair.name(), "parsed after structural repair");
                    Some(obj)
                }
                _ => None,
            }
        })
    }
}

/// Candidate substrings in the order they are tried.
fn candidates(text: &str) -> Vec<&str> {
    let mut out = vec![text];
    out.extend(fenced_blocks(text));
    if let Some(braced) = braced_span(text) {
        out.push(braced);
    }
    out
}

/// Interiors of fenced code blocks, with a leading `json` tag line dropped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    FENCE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| strip_tag_line(m.as_str()))
        .collect()
}

fn strip_tag_line(body: &str) -> &str {
    match body.split_once('\n') {
        Some((first, rest)) if matches!(first.trim().to_ascii_lowercase().as_str(), "json" | "") => {
            rest
        }
        _ => body,
    }
}

/// Span from the first `{` to the last `}`, if they are correctly ordered.
fn braced_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse the leading JSON value of `text`, ignoring anything after it.
/// Only objects are accepted.
fn parse_leading_object(text: &str) -> Option<Record> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(Value::Object(obj))) => Some(obj),
        _ => None,
    }
}

/// Escape raw `\n`, `\r` and `\t` that appear inside JSON string literals.
///
/// Characters outside strings are left alone, as are existing escape
/// sequences.
pub fn escape_control_chars_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if !in_string {
            if ch == '"' {
                in_string = true;
            }
            out.push(ch);
            continue;
        }

        if escaped {
            escaped = false;
            out.push(ch);
            continue;
        }

        match ch {
            '\\' => {
                escaped = true;
                out.push(ch);
            }
            '"' => {
                in_string = false;
                out.push(ch);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }

    out
}

/// Single-line tail of unparsable output, for `json_parse_failed` diagnostics.
pub fn diagnostic_tail(text: &str) -> String {
    escaped_tail(text, DIAGNOSTIC_TAIL_CHARS)
}
