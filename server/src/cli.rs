//! One-shot local extraction: `folio run <path> --document-type <type>`.
//!
//! Runs the same chunked pipeline as the service, with continuations going
//! through an in-process queue instead of HTTP.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use folio_core::jobs::{spawn_chunk_worker, ChannelContinuation, MemoryJobStore};
use folio_core::storage::FsBlobStore;
use folio_core::{
    build_pipeline, ChunkRequest, Config, DocumentType, FieldMap, LifecycleTracker, ParsingStatus,
};
use tokio::task::JoinHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Extract `path` end to end and return the final fields.
pub async fn run_local(
    config: &Config,
    path: &Path,
    document_type: DocumentType,
    document_id: Option<String>,
) -> Result<FieldMap> {
    let path = path
        .canonicalize()
        .with_context(|| format!("File not found: {:?}", path))?;
    let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
        bail!("Not a file path: {:?}", path);
    };
    let source_path = file_name.to_string_lossy().to_string();
    let document_id = document_id.unwrap_or_else(|| source_path.clone());

    let (continuation, rx) = ChannelContinuation::new();
    let pipeline = Arc::new(build_pipeline(
        config,
        Arc::new(FsBlobStore::new(dir)),
        Arc::new(MemoryJobStore::new()),
        Arc::new(continuation),
    )?);
    let worker = spawn_chunk_worker(pipeline.clone(), rx);

    tracing::info!(%document_id, %document_type, "Extracting {:?}", path);
    let first = pipeline
        .handle(ChunkRequest::new(&document_id, document_type, source_path))
        .await;

    let outcome = wait_for_job(
        pipeline.tracker(),
        &document_id,
        &worker,
        config.stall_timeout,
        first.error,
    )
    .await;

    worker.abort();
    outcome
}

/// Poll the tracker until the job is terminal.
///
/// Gives up when the chunk worker exits with the job unfinished, and fails
/// the job once it has been idle for `stall_timeout`.
async fn wait_for_job(
    tracker: &LifecycleTracker,
    document_id: &str,
    worker: &JoinHandle<()>,
    stall_timeout: Option<Duration>,
    first_error: Option<String>,
) -> Result<FieldMap> {
    loop {
        let record = tracker
            .status(document_id)
            .await?
            .with_context(|| format!("Job record for {} disappeared", document_id))?;

        match record.parsing_status {
            ParsingStatus::Completed => return Ok(record.ocr_data.unwrap_or_default()),
            ParsingStatus::Failed => {
                let error = record
                    .parsing_progress
                    .and_then(|p| p.error)
                    .or(first_error)
                    .unwrap_or_else(|| "unknown error".to_string());
                bail!("Extraction failed: {}", error);
            }
            ParsingStatus::Pending | ParsingStatus::Processing => {
                if worker.is_finished() {
                    bail!("Chunk worker stopped before {} finished", document_id);
                }
                if let Some(timeout) = stall_timeout {
                    // The next poll sees the job as failed
                    tracker.reap_stalled(timeout).await?;
                }
                if let Some(progress) = &record.parsing_progress {
                    tracing::debug!(
                        chunks_completed = progress.chunks_completed,
                        total_chunks = progress.total_chunks,
                        "Waiting for remaining chunks"
                    );
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}
