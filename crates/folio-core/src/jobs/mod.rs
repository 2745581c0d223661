//! Chunked extraction jobs.
//!
//! Architecture:
//!
//! ```text
//! ChunkRequest ──► Pipeline::handle
//!                     │ fetch (retry once on empty)
//!                     │ count pages (first chunk only)
//!                     │ slice window ──► ExtractionClient
//!                     │ merge into accumulated fields
//!                     ▼
//!          more pages? ── yes ──► record progress ──► Continuation::dispatch
//!                     │
//!                     no ──► complete
//! ```
//!
//! Each invocation handles exactly one chunk and carries the accumulated
//! fields forward in the next request, so no invocation holds more than one
//! chunk of work.

mod continuation;
mod store;
mod tracker;
mod types;

pub use continuation::{spawn_chunk_worker, ChannelContinuation, Continuation, HttpContinuation};
pub use store::{FsJobStore, JobStore, MemoryJobStore};
pub use tracker::LifecycleTracker;
pub use types::{ChunkRequest, ChunkResponse, JobRecord, ParsingProgress, ParsingStatus};

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::DocumentCatalog;
use crate::error::{Error, Result};
use crate::extraction::{prompt, ExtractionClient, FieldMap};
use crate::merge;
use crate::pdf;
use crate::planner::PagePlanner;
use crate::storage::{DocumentFetcher, FetchedDocument};

/// Outcome of one successfully processed chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// More chunks follow; the next one has been dispatched.
    Continued(ParsingProgress),
    /// This was the last chunk.
    Completed(FieldMap),
}

/// Processes one chunk per call and schedules the rest.
pub struct Pipeline {
    fetcher: DocumentFetcher,
    catalog: Arc<DocumentCatalog>,
    planner: PagePlanner,
    client: Arc<dyn ExtractionClient>,
    tracker: LifecycleTracker,
    continuation: Arc<dyn Continuation>,
}

impl Pipeline {
    pub fn new(
        fetcher: DocumentFetcher,
        catalog: Arc<DocumentCatalog>,
        client: Arc<dyn ExtractionClient>,
        tracker: LifecycleTracker,
        continuation: Arc<dyn Continuation>,
    ) -> Self {
        Self {
            fetcher,
            planner: PagePlanner::new(catalog.clone()),
            catalog,
            client,
            tracker,
            continuation,
        }
    }

    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }

    /// Process one chunk request. Failures are recorded and reported, never raised.
    pub async fn handle(&self, request: ChunkRequest) -> ChunkResponse {
        let run_id = match request.run_id {
            Some(id) => Some(id),
            None if request.is_fresh() => Some(Uuid::new_v4()),
            None => None,
        };

        match self.run_chunk(&request, run_id).await {
            Ok(ChunkOutcome::Continued(progress)) => ChunkResponse::processing(&progress),
            Ok(ChunkOutcome::Completed(fields)) => ChunkResponse::completed(fields),
            Err(e @ Error::Superseded { .. }) => {
                info!(
                    document_id = %request.document_id,
                    page = request.current_page,
                    "Dropping continuation from a superseded run"
                );
                ChunkResponse::failed(e.to_string())
            }
            Err(e) => {
                error!(
                    document_id = %request.document_id,
                    page = request.current_page,
                    error = %e,
                    "Chunk processing failed"
                );
                if !request.document_id.is_empty() {
                    if let Err(persist) = self
                        .tracker
                        .fail(&request.document_id, run_id, &e.to_string())
                        .await
                    {
                        warn!(
                            document_id = %request.document_id,
                            error = %persist,
                            "Could not record job failure"
                        );
                    }
                }
                ChunkResponse::failed(e.to_string())
            }
        }
    }

    async fn run_chunk(&self, request: &ChunkRequest, run_id: Option<Uuid>) -> Result<ChunkOutcome> {
        let document_id = request.document_id.as_str();
        if document_id.trim().is_empty() {
            return Err(Error::InvalidRequest("documentId is required".to_string()));
        }

        let fresh = request.is_fresh();
        match run_id {
            Some(run_id) if fresh => {
                self.tracker.start_run(document_id, run_id).await?;
            }
            _ => self.tracker.ensure_current(document_id, run_id).await?,
        }

        if request.source_path.trim().is_empty() {
            return Err(Error::InvalidRequest("sourcePath is required".to_string()));
        }

        let profile = self.catalog.profile(&request.document_type);
        let config = self.planner.resolve(&request.document_type);

        let document = self.fetcher.fetch(&request.source_path).await?;

        let total_pages = if request.total_pages > 0 {
            request.total_pages
        } else {
            discover_pages(&document).await
        };
        if request.current_page > total_pages {
            return Err(Error::InvalidRequest(format!(
                "currentPage {} is past the last page ({})",
                request.current_page, total_pages
            )));
        }

        let total_chunks = config.total_chunks(total_pages);
        if fresh && total_chunks > 1 {
            self.tracker
                .mark_processing(document_id, run_id, total_pages, total_chunks)
                .await?;
        }

        let window = config.window(request.current_page, total_pages);
        let chunk_number = window.chunk_number(config.pages_per_chunk);
        info!(
            document_id,
            document_type = %request.document_type,
            chunk = chunk_number,
            total_chunks,
            start = window.start,
            end = window.end,
            "Processing chunk"
        );

        let mime = document.mime;
        let chunk = slice_window(document, window.start, window.end, total_pages).await;

        let accumulated = request.accumulated_fields.clone().unwrap_or_default();
        let prompt = prompt::build_prompt(&profile.instructions, window, total_pages, Some(&accumulated));

        let result = self
            .client
            .extract(&chunk, mime, &prompt, config.max_output_tokens)
            .await?;
        if result.parse_error {
            warn!(
                document_id,
                chunk = chunk_number,
                "Chunk response was not valid JSON, keeping prior fields"
            );
        }

        let merged = merge::merge(&accumulated, &result.into_fields(), &profile.merge);
        debug!(document_id, fields = merged.len(), "Merged chunk fields");

        let progress = ParsingProgress {
            current_page: window.end,
            total_pages,
            chunks_completed: chunk_number,
            total_chunks,
            error: None,
        };

        if config.is_last_chunk(window.start, total_pages) {
            self.tracker
                .complete(document_id, run_id, progress, merged.clone())
                .await?;
            info!(document_id, total_pages, total_chunks, "Parsing completed");
            return Ok(ChunkOutcome::Completed(merged));
        }

        self.tracker
            .record_progress(document_id, run_id, progress.clone(), &merged)
            .await?;

        let next_page = window.start + config.pages_per_chunk;
        self.continuation
            .dispatch(request.continuation(next_page, total_pages, merged, run_id));
        debug!(document_id, next_page, "Dispatched continuation");

        Ok(ChunkOutcome::Continued(progress))
    }
}

/// Page count for paged formats; images are a single page.
async fn discover_pages(document: &FetchedDocument) -> u32 {
    if !document.mime.is_paged() {
        return 1;
    }
    let bytes = document.bytes.clone();
    tokio::task::spawn_blocking(move || pdf::count_pages(&bytes))
        .await
        .unwrap_or_else(|e| {
            warn!("Page count task failed, assuming 1 page: {}", e);
            1
        })
}

/// Bytes for pages `start..=end`, or the whole document when slicing is moot.
async fn slice_window(document: FetchedDocument, start: u32, end: u32, total_pages: u32) -> Vec<u8> {
    if !document.mime.is_paged() || (start <= 1 && end >= total_pages) {
        return document.bytes;
    }
    let original = Arc::new(document.bytes);
    let task_bytes = original.clone();
    match tokio::task::spawn_blocking(move || pdf::extract_range(&task_bytes, start, end)).await {
        Ok(slice) => slice,
        Err(e) => {
            warn!("Page slicing task failed, using whole document: {}", e);
            Arc::try_unwrap(original).unwrap_or_else(|shared| (*shared).clone())
        }
    }
}
