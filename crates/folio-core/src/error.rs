//! Error taxonomy for the extraction pipeline.
//!
//! Transient failures (empty downloads, rate limits) are retried close to where
//! they happen and only surface here once the retry budget is spent. Data-quality
//! problems never become errors: they are absorbed into a `parseError` result.

use thiserror::Error;

use crate::jobs::ParsingStatus;

/// Errors raised while processing a chunk.
#[derive(Debug, Error)]
pub enum Error {
    /// The object store returned zero bytes, twice.
    #[error("document at '{path}' is empty")]
    EmptyDocument { path: String },

    /// The object store could not be read.
    #[error("failed to fetch document: {0}")]
    Storage(#[source] anyhow::Error),

    /// The extraction service answered with a non-success status.
    #[error("extraction service returned {status}: {body}")]
    ExtractionService { status: u16, body: String },

    /// The HTTP request itself failed (connect, TLS, body decode).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The inbound request is missing or has malformed fields.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The job record could not be read or written.
    #[error("failed to persist job state: {0}")]
    Persistence(#[source] anyhow::Error),

    /// The lifecycle tracker refused a state change.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: ParsingStatus, to: ParsingStatus },

    /// A newer run was started for the same document.
    #[error("run for document '{document_id}' was superseded by a newer run")]
    Superseded { document_id: String },

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for a 429 from the extraction service.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::ExtractionService { status: 429, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
