//! HTTP handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use folio_core::{ChunkRequest, ChunkResponse, JobRecord};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// `POST /parse-document`: process one chunk.
///
/// Always answers with the chunk envelope; 500 when the chunk failed.
pub async fn parse_document(
    State(state): State<AppState>,
    payload: Result<Json<ChunkRequest>, JsonRejection>,
) -> (StatusCode, Json<ChunkResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Rejected malformed chunk request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ChunkResponse::failed(rejection.body_text())),
            );
        }
    };

    let response = state.pipeline.handle(request).await;
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(response))
}

/// `GET /jobs/:document_id`: persisted job record.
pub async fn job_status(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    if document_id.trim().is_empty() {
        return Err(ApiError::invalid_request("document id is empty"));
    }
    state
        .pipeline
        .tracker()
        .status(&document_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::job_not_found(document_id))
}

pub async fn healthz() -> &'static str {
    "ok"
}
