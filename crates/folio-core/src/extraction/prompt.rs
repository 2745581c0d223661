//! Instruction prompts for each chunk.
//!
//! The first chunk gets the document type's instructions. Later chunks also get
//! a compact summary of what earlier chunks produced so the model reports only
//! new information and list entries are not duplicated across chunks.

use serde_json::Value;

use super::{is_parse_error, FieldMap, PARSE_ERROR_KEY, RAW_TEXT_KEY};
use crate::planner::PageWindow;

const RESPONSE_FORMAT: &str =
    "Respond with a single JSON object and nothing else. Use null for fields that do not appear.";

/// Longest rendering of a single value in the summary.
const MAX_VALUE_CHARS: usize = 160;
/// Fields listed before the summary is cut short.
const MAX_SUMMARY_FIELDS: usize = 40;

/// Build the prompt for the chunk covering `window`.
pub fn build_prompt(
    instructions: &str,
    window: PageWindow,
    total_pages: u32,
    accumulated: Option<&FieldMap>,
) -> String {
    let mut prompt = instructions.trim().to_string();
    prompt.push_str("\n\n");

    if total_pages > window.len() {
        prompt.push_str(&format!(
            "This file contains pages {}-{} of a {}-page document.\n",
            window.start, window.end, total_pages
        ));
    }

    let prior = accumulated
        .filter(|fields| window.start > 1 && !fields.is_empty() && !is_parse_error(fields));

    if let Some(fields) = prior {
        prompt.push_str("Earlier pages have already been processed and produced:\n");
        prompt.push_str(&summarize_fields(fields));
        prompt.push_str(
            "\nReport only NEW information found on these pages. Do not repeat list \
             entries that were already extracted; return only the new entries. Omit \
             fields whose values are already known unless these pages state a newer value.\n",
        );
    }

    prompt.push_str(RESPONSE_FORMAT);
    prompt
}

/// One line per field: scalars verbatim, lists as a count plus the last entry.
pub fn summarize_fields(fields: &FieldMap) -> String {
    let mut lines = Vec::new();
    let mut listed = 0;

    for (key, value) in fields {
        if key == PARSE_ERROR_KEY || key == RAW_TEXT_KEY || value.is_null() {
            continue;
        }
        if listed == MAX_SUMMARY_FIELDS {
            lines.push("- (further fields omitted)".to_string());
            break;
        }
        listed += 1;

        let line = match value {
            Value::Array(items) => match items.last() {
                Some(last) => format!(
                    "- {}: {} entries so far, last entry {}",
                    key,
                    items.len(),
                    truncate(&last.to_string(), MAX_VALUE_CHARS)
                ),
                None => format!("- {}: no entries yet", key),
            },
            Value::String(s) => format!("- {}: {}", key, truncate(s, MAX_VALUE_CHARS)),
            other => format!("- {}: {}", key, truncate(&other.to_string(), MAX_VALUE_CHARS)),
        };
        lines.push(line);
    }

    lines.join("\n")
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
