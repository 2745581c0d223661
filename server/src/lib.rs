//! Folio service - HTTP surface and CLI for the extraction pipeline.
//!
//! ```text
//! POST /parse-document     process one chunk (continuations come back here)
//! GET  /jobs/:document_id  persisted job record
//! GET  /healthz            liveness
//! ```

pub mod cli;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use folio_core::jobs::{FsJobStore, HttpContinuation};
use folio_core::{build_pipeline, Config, LifecycleTracker, Pipeline};
use tokio::signal;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub use error::{ApiError, ApiResult};

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

/// Install the global subscriber: `RUST_LOG` plus our crate defaults.
pub fn init_logging(extra_directives: &[&str]) {
    let mut filter = EnvFilter::from_default_env();
    for directive in ["folio=info", "folio_lib=info", "folio_core=info"]
        .iter()
        .chain(extra_directives)
    {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring log directive {:?}: {}", directive, e),
        }
    }

    // A subscriber may already be installed (tests, embedding)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Build the router with all routes and request tracing.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/parse-document", post(routes::parse_document))
        .route("/jobs/:document_id", get(routes::job_status))
        .route("/healthz", get(routes::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically fail jobs that stopped receiving continuations.
pub fn spawn_stall_reaper(tracker: LifecycleTracker, timeout: Duration) -> JoinHandle<()> {
    let period = timeout.min(Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match tracker.reap_stalled(timeout).await {
                Ok(reaped) if !reaped.is_empty() => {
                    warn!(count = reaped.len(), "Failed stalled jobs: {:?}", reaped);
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Stall sweep failed"),
            }
        }
    })
}

/// Run the HTTP service until Ctrl+C or SIGTERM.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    config
        .ensure_dirs()
        .context("Failed to create data directories")?;
    info!("Data directory: {:?}", config.data_dir);

    let pipeline = build_pipeline(
        &config,
        config.blob_store(),
        Arc::new(FsJobStore::new(&config.jobs_dir)),
        Arc::new(HttpContinuation::new(&config.self_url, None)),
    )?;
    let pipeline = Arc::new(pipeline);

    let reaper = config
        .stall_timeout
        .map(|timeout| spawn_stall_reaper(pipeline.tracker().clone(), timeout));

    let app = create_router(AppState::new(pipeline));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(
        "Listening on {} (continuations via {})",
        config.bind_addr, config.self_url
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("Shutdown signal received");
        })
        .await?;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    info!("Server stopped cleanly");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
