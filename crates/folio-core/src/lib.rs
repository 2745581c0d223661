//! Folio Core - chunked document extraction
//!
//! This crate contains the extraction pipeline behind Folio:
//! - Document fetching from an object store (local directory or HTTP)
//! - Page counting and page-range slicing (lopdf)
//! - AI extraction with lenient JSON recovery (Gemini)
//! - Per-document-type merging of chunk results
//! - Job lifecycle tracking and chunk continuation

pub mod catalog;
pub mod config;
pub mod error;
pub mod extraction;
pub mod jobs;
pub mod merge;
pub mod pdf;
pub mod planner;
pub mod storage;

use std::sync::Arc;

pub use catalog::{DocumentCatalog, DocumentType, MergeStrategy};
pub use config::Config;
pub use error::{Error, Result};
pub use extraction::{ExtractionClient, ExtractionResult, FieldMap};
pub use jobs::{
    ChunkRequest, ChunkResponse, Continuation, JobRecord, JobStore, LifecycleTracker,
    ParsingProgress, ParsingStatus, Pipeline,
};
pub use storage::{BlobStore, DocumentFetcher};

/// Wire a pipeline from configuration.
pub fn build_pipeline(
    config: &Config,
    store: Arc<dyn BlobStore>,
    job_store: Arc<dyn JobStore>,
    continuation: Arc<dyn Continuation>,
) -> Result<Pipeline> {
    let catalog = Arc::new(config.catalog()?);
    let client = config.extraction_client()?;
    tracing::info!(
        provider = client.provider_name(),
        model = client.model_id(),
        store = store.store_name(),
        profiles = catalog.profiles.len(),
        "Extraction pipeline configured"
    );

    Ok(Pipeline::new(
        DocumentFetcher::new(store, config.fetch_retry_delay),
        catalog,
        Arc::new(client),
        LifecycleTracker::new(job_store),
        continuation,
    ))
}
