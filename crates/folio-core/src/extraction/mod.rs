//! Extraction client abstraction.
//!
//! This module provides a unified interface over AI extraction backends. A client
//! takes one chunk's bytes plus an instruction prompt and returns a field map. Any
//! backend that can read a PDF or image and answer with JSON fits behind
//! [`ExtractionClient`].

pub mod gemini;
pub mod parse;
pub mod prompt;

pub use gemini::{GeminiClient, RetryPolicy};
pub use parse::parse_response;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::storage::MimeKind;

/// Extracted field name -> value.
pub type FieldMap = serde_json::Map<String, Value>;

/// Marker set on field maps that came from an unparseable response.
pub const PARSE_ERROR_KEY: &str = "parseError";
/// Holds the raw response text when parsing failed.
pub const RAW_TEXT_KEY: &str = "rawText";

/// Output of one extraction call for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub fields: FieldMap,
    #[serde(default)]
    pub parse_error: bool,
}

impl ExtractionResult {
    pub fn parsed(fields: FieldMap) -> Self {
        Self {
            fields,
            parse_error: false,
        }
    }

    /// Raw-text fallback for a response that held no usable JSON.
    pub fn unparsed(raw_text: &str) -> Self {
        let mut fields = FieldMap::new();
        fields.insert(RAW_TEXT_KEY.to_string(), Value::String(raw_text.to_string()));
        Self {
            fields,
            parse_error: true,
        }
    }

    /// Field map as carried between chunks; parse errors keep their marker.
    pub fn into_fields(self) -> FieldMap {
        let mut fields = self.fields;
        if self.parse_error {
            fields.insert(PARSE_ERROR_KEY.to_string(), Value::Bool(true));
        }
        fields
    }
}

/// True when `fields` is a raw-text fallback rather than extracted data.
pub fn is_parse_error(fields: &FieldMap) -> bool {
    fields
        .get(PARSE_ERROR_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Backend that turns document bytes into structured fields.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Extract fields from one chunk.
    ///
    /// Unparseable responses come back as `Ok` with `parse_error` set; only
    /// service and transport failures are errors.
    async fn extract(
        &self,
        chunk: &[u8],
        mime: MimeKind,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<ExtractionResult>;

    /// Get the provider name (e.g., "gemini")
    fn provider_name(&self) -> &'static str;

    /// Get the model identifier
    fn model_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unparsed_result_is_marked() {
        let fields = ExtractionResult::unparsed("garbled").into_fields();
        assert!(is_parse_error(&fields));
        assert_eq!(fields[RAW_TEXT_KEY], Value::String("garbled".to_string()));
    }

    #[test]
    fn test_parsed_result_has_no_marker() {
        let mut map = FieldMap::new();
        map.insert("a".to_string(), Value::from(1));
        let fields = ExtractionResult::parsed(map).into_fields();
        assert!(!is_parse_error(&fields));
        assert!(!fields.contains_key(PARSE_ERROR_KEY));
    }
}
