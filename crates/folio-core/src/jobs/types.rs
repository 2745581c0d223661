//! Wire and persistence types for chunked parsing jobs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::catalog::DocumentType;
use crate::extraction::FieldMap;

/// One invocation of the pipeline: "process this chunk of this document".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub document_type: DocumentType,
    /// Object-store path of the source file
    #[serde(default)]
    pub source_path: String,
    /// 1-based first page of this chunk
    #[serde(default = "first_page")]
    pub current_page: u32,
    /// 0 until the first chunk has counted pages
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub accumulated_fields: Option<FieldMap>,
    /// Identifies the run a continuation belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

fn first_page() -> u32 {
    1
}

impl ChunkRequest {
    /// Request for the first chunk of a new job.
    pub fn new(
        document_id: impl Into<String>,
        document_type: DocumentType,
        source_path: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            document_type,
            source_path: source_path.into(),
            current_page: 1,
            total_pages: 0,
            accumulated_fields: None,
            run_id: None,
        }
    }

    /// Starts a new run rather than continuing one.
    pub fn is_fresh(&self) -> bool {
        self.total_pages == 0 || (self.current_page <= 1 && self.run_id.is_none())
    }

    /// Request for the chunk that follows this one.
    pub fn continuation(
        &self,
        next_page: u32,
        total_pages: u32,
        accumulated: FieldMap,
        run_id: Option<Uuid>,
    ) -> Self {
        Self {
            document_id: self.document_id.clone(),
            document_type: self.document_type.clone(),
            source_path: self.source_path.clone(),
            current_page: next_page,
            total_pages,
            accumulated_fields: Some(accumulated),
            run_id,
        }
    }
}

/// Synchronous answer to a chunk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub success: bool,
    pub status: ParsingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkResponse {
    pub fn processing(progress: &ParsingProgress) -> Self {
        Self {
            success: true,
            status: ParsingStatus::Processing,
            message: Some(format!(
                "Processed pages through {} of {} ({}%), continuing",
                progress.current_page,
                progress.total_pages,
                progress.percent()
            )),
            data: serde_json::to_value(progress).ok(),
            error: None,
        }
    }

    pub fn completed(fields: FieldMap) -> Self {
        Self {
            success: true,
            status: ParsingStatus::Completed,
            message: Some("Parsing completed".to_string()),
            data: Some(Value::Object(fields)),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            status: ParsingStatus::Failed,
            message: None,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Lifecycle state of a parsing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParsingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ParsingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ParsingStatus::Completed | ParsingStatus::Failed)
    }

    /// Allowed moves within one run. Terminal states only leave via a new run.
    pub fn can_transition_to(&self, next: ParsingStatus) -> bool {
        use ParsingStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for ParsingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParsingStatus::Pending => "pending",
            ParsingStatus::Processing => "processing",
            ParsingStatus::Completed => "completed",
            ParsingStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How far a job has come.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsingProgress {
    /// Last page covered so far
    pub current_page: u32,
    pub total_pages: u32,
    pub chunks_completed: u32,
    pub total_chunks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ParsingProgress {
    pub fn percent(&self) -> u32 {
        if self.total_chunks == 0 {
            return 0;
        }
        (self.chunks_completed.min(self.total_chunks) * 100) / self.total_chunks
    }
}

/// Persisted state of one document's parsing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub document_id: String,
    pub parsing_status: ParsingStatus,
    #[serde(default)]
    pub parsing_progress: Option<ParsingProgress>,
    #[serde(default)]
    pub ocr_data: Option<FieldMap>,
    #[serde(default)]
    pub parsing_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parsing_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn pending(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            parsing_status: ParsingStatus::Pending,
            parsing_progress: None,
            ocr_data: None,
            parsing_started_at: None,
            parsing_completed_at: None,
            run_id: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults_for_first_chunk() {
        let request: ChunkRequest = serde_json::from_value(json!({
            "documentId": "doc-1",
            "documentType": "bank_statement",
            "sourcePath": "loans/42/statement.pdf"
        }))
        .unwrap();

        assert_eq!(request.current_page, 1);
        assert_eq!(request.total_pages, 0);
        assert!(request.accumulated_fields.is_none());
        assert!(request.is_fresh());
        assert_eq!(request.document_type, DocumentType::BankStatement);
    }

    #[test]
    fn test_continuation_is_not_fresh() {
        let first = ChunkRequest::new("doc-1", DocumentType::BankStatement, "a.pdf");
        let next = first.continuation(6, 12, FieldMap::new(), Some(Uuid::new_v4()));

        assert!(!next.is_fresh());
        assert_eq!(next.current_page, 6);
        assert_eq!(next.total_pages, 12);

        let wire = serde_json::to_value(&next).unwrap();
        assert_eq!(wire["currentPage"], json!(6));
        assert!(wire["runId"].is_string());
    }

    #[test]
    fn test_status_transitions() {
        use ParsingStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(ParsingStatus::Processing).unwrap(),
            json!("processing")
        );
        assert_eq!(ParsingStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_failed_response_shape() {
        let wire = serde_json::to_value(ChunkResponse::failed("boom")).unwrap();
        assert_eq!(wire, json!({"success": false, "status": "failed", "error": "boom"}));
    }

    #[test]
    fn test_progress_percent() {
        let progress = ParsingProgress {
            current_page: 10,
            total_pages: 12,
            chunks_completed: 2,
            total_chunks: 3,
            error: None,
        };
        assert_eq!(progress.percent(), 66);
        assert_eq!(ParsingProgress::default().percent(), 0);

        let response = ChunkResponse::processing(&progress);
        assert_eq!(
            response.message.as_deref(),
            Some("Processed pages through 10 of 12 (66%), continuing")
        );
    }
}
