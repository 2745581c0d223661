//! Lenient JSON recovery for model responses.
//!
//! Models wrap JSON in prose or code fences, and long answers get cut off at the
//! output token limit. Parsing is layered: locate the JSON, parse it, otherwise
//! repair a truncated tail, otherwise keep the raw text.

use serde_json::Value;
use tracing::{debug, warn};

use super::{ExtractionResult, FieldMap};

/// Turn raw response text into an extraction result. Never fails.
pub fn parse_response(text: &str) -> ExtractionResult {
    if let Some(candidate) = locate_json(text) {
        if let Some(fields) = parse_object(candidate) {
            return ExtractionResult::parsed(fields);
        }
    }

    if let Some(fragment) = truncated_fragment(text) {
        let repaired = repair_json(fragment);
        if let Some(fields) = parse_object(&repaired) {
            debug!(
                original_len = fragment.len(),
                repaired_len = repaired.len(),
                "Recovered truncated JSON response"
            );
            return ExtractionResult::parsed(fields);
        }
    }

    warn!(
        len = text.len(),
        "Response held no parseable JSON object, keeping raw text"
    );
    ExtractionResult::unparsed(text)
}

fn parse_object(candidate: &str) -> Option<FieldMap> {
    match serde_json::from_str::<Value>(candidate).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Fenced block if present, else the outermost `{ ... }` span.
fn locate_json(text: &str) -> Option<&str> {
    if let Some(block) = fenced_block(text) {
        return Some(brace_span(block).unwrap_or(block));
    }
    brace_span(text)
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Body of the first closed ``` block; a language tag after the fence is skipped.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// From the first `{` to the end of text, minus any trailing fence.
fn truncated_fragment(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut tail = &text[start..];
    if let Some(fence) = tail.rfind("```") {
        tail = &tail[..fence];
    }
    Some(tail.trim_end())
}

#[derive(Debug, Default)]
struct Scan {
    open: Vec<char>,
    in_string: bool,
    last_comma: Option<usize>,
}

fn scan(text: &str) -> Scan {
    let mut state = Scan::default();
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if state.in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                state.in_string = false;
            }
            continue;
        }
        match c {
            '"' => state.in_string = true,
            '{' | '[' => state.open.push(c),
            '}' | ']' => {
                state.open.pop();
            }
            ',' => state.last_comma = Some(i),
            _ => {}
        }
    }
    state
}

/// Close a JSON document that was cut off mid-stream.
///
/// Drops everything after the last structural comma (the partial property),
/// closes a dangling string, fills a dangling `:` with null, then closes open
/// brackets innermost first.
fn repair_json(fragment: &str) -> String {
    let cut = match scan(fragment).last_comma {
        Some(i) => &fragment[..i],
        None => fragment,
    };

    let mut repaired = cut.trim_end().to_string();
    let state = scan(&repaired);
    if state.in_string {
        repaired.push('"');
    }

    let trimmed_len = repaired.trim_end().trim_end_matches(',').len();
    repaired.truncate(trimmed_len);
    if repaired.ends_with(':') {
        repaired.push_str("null");
    }

    for opener in state.open.iter().rev() {
        repaired.push(if *opener == '{' { '}' } else { ']' });
    }
    repaired
}
