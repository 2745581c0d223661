//! Scheduling the next chunk of a job.
//!
//! A continuation is fire-and-forget: the current invocation hands the next
//! request off and returns without waiting for it to run. If the hand-off is
//! lost the job stays in processing until the stall sweep fails it.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::types::ChunkRequest;
use super::Pipeline;

/// Schedules a follow-up chunk request.
pub trait Continuation: Send + Sync {
    /// Hand off `request`. Must not wait for it to be processed.
    fn dispatch(&self, request: ChunkRequest);
}

/// Re-invokes the service over HTTP (`POST /parse-document`).
#[derive(Clone)]
pub struct HttpContinuation {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpContinuation {
    /// `base_url` is the public address of this service.
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/parse-document", base_url.trim_end_matches('/')),
            token,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("Continuation token is not a valid header value, sending without it"),
            }
        }
        headers
    }
}

impl Continuation for HttpContinuation {
    fn dispatch(&self, request: ChunkRequest) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let headers = self.headers();

        tokio::spawn(async move {
            let document_id = request.document_id.clone();
            let page = request.current_page;

            match client.post(&endpoint).headers(headers).json(&request).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(document_id, page, "Continuation accepted");
                }
                Ok(response) => {
                    warn!(
                        document_id,
                        page,
                        status = response.status().as_u16(),
                        "Continuation rejected"
                    );
                }
                Err(e) => {
                    error!(
                        document_id,
                        page,
                        error = %e,
                        "Continuation request failed; job stays in processing until reaped"
                    );
                }
            }
        });
    }
}

/// Queues continuations for an in-process worker.
#[derive(Clone)]
pub struct ChannelContinuation {
    tx: mpsc::UnboundedSender<ChunkRequest>,
}

impl ChannelContinuation {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChunkRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Continuation for ChannelContinuation {
    fn dispatch(&self, request: ChunkRequest) {
        if let Err(e) = self.tx.send(request) {
            error!(
                document_id = %e.0.document_id,
                "Chunk worker is gone, continuation dropped"
            );
        }
    }
}

/// Spawn the worker that drains a [`ChannelContinuation`] queue.
///
/// The worker exits when every sender has been dropped.
pub fn spawn_chunk_worker(
    pipeline: Arc<Pipeline>,
    mut rx: mpsc::UnboundedReceiver<ChunkRequest>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Chunk worker started");

        while let Some(request) = rx.recv().await {
            let document_id = request.document_id.clone();
            let page = request.current_page;
            let response = pipeline.handle(request).await;

            if response.success {
                debug!(document_id, page, status = %response.status, "Chunk processed");
            } else {
                warn!(
                    document_id,
                    page,
                    error = response.error.as_deref().unwrap_or_default(),
                    "Chunk failed"
                );
            }
        }

        debug!("Chunk worker stopped");
    })
}
