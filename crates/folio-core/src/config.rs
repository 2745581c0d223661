use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::DocumentCatalog;
use crate::error::{Error, Result};
use crate::extraction::gemini::{DEFAULT_GEMINI_MODEL, GEMINI_API_BASE};
use crate::extraction::{GeminiClient, RetryPolicy};
use crate::storage::{BlobStore, FsBlobStore, HttpBlobStore};

const DEFAULT_BIND: &str = "127.0.0.1:8787";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory (~/.local/share/folio)
    pub data_dir: PathBuf,
    /// Local object store root, used when no remote store is configured
    pub blob_root: PathBuf,
    /// Job record directory
    pub jobs_dir: PathBuf,
    /// Remote object store base URL
    pub storage_url: Option<String>,
    pub storage_token: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    /// Delay before the first rate-limit retry
    pub extraction_retry_base: Duration,
    /// Delay before re-downloading an empty document
    pub fetch_retry_delay: Duration,
    /// JSON catalog replacing the built-in one
    pub catalog_file: Option<PathBuf>,
    pub bind_addr: String,
    /// Base URL continuations are posted to
    pub self_url: String,
    /// Fail processing jobs idle for this long; disabled when unset
    pub stall_timeout: Option<Duration>,
    /// `.env` file the environment was read from, if any
    pub env_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `.env` and the environment, or use defaults
    pub fn load_or_default() -> Self {
        let env_file = dotenvy::dotenv().ok();
        Self {
            env_file,
            ..Self::from_lookup(|key| std::env::var(key).ok())
        }
    }

    /// Build from an arbitrary key lookup (`FOLIO_*` names).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let millis = |key: &str, default: u64| {
            Duration::from_millis(parse_or(key, get(key), default))
        };

        let data_dir = get("FOLIO_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("folio")
        });

        let bind_addr = get("FOLIO_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let self_url = get("FOLIO_SELF_URL")
            .unwrap_or_else(|| format!("http://{}", bind_addr))
            .trim_end_matches('/')
            .to_string();

        Self {
            blob_root: get("FOLIO_BLOB_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("blobs")),
            jobs_dir: data_dir.join("jobs"),
            storage_url: get("FOLIO_STORAGE_URL"),
            storage_token: get("FOLIO_STORAGE_TOKEN"),
            gemini_api_key: get("FOLIO_GEMINI_API_KEY").or_else(|| get("GEMINI_API_KEY")),
            gemini_model: get("FOLIO_GEMINI_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            gemini_base_url: get("FOLIO_GEMINI_BASE_URL")
                .unwrap_or_else(|| GEMINI_API_BASE.to_string()),
            extraction_retry_base: millis("FOLIO_EXTRACTION_RETRY_BASE_MS", 1000),
            fetch_retry_delay: millis("FOLIO_FETCH_RETRY_DELAY_MS", 1500),
            catalog_file: get("FOLIO_CATALOG_FILE").map(PathBuf::from),
            bind_addr,
            self_url,
            stall_timeout: get("FOLIO_STALL_TIMEOUT_SECS")
                .map(|raw| parse_or("FOLIO_STALL_TIMEOUT_SECS", Some(raw), 0))
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            env_file: None,
            data_dir,
        }
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.jobs_dir)?;
        if self.storage_url.is_none() {
            std::fs::create_dir_all(&self.blob_root)?;
        }
        Ok(())
    }

    /// Remote store when a URL is configured, otherwise the local directory.
    pub fn blob_store(&self) -> Arc<dyn BlobStore> {
        match &self.storage_url {
            Some(url) => Arc::new(HttpBlobStore::new(url, self.storage_token.clone())),
            None => Arc::new(FsBlobStore::new(&self.blob_root)),
        }
    }

    pub fn catalog(&self) -> Result<DocumentCatalog> {
        DocumentCatalog::load_or_builtin(self.catalog_file.as_deref())
    }

    pub fn extraction_client(&self) -> Result<GeminiClient> {
        let api_key = self.gemini_api_key.as_deref().ok_or_else(|| {
            Error::Config("FOLIO_GEMINI_API_KEY (or GEMINI_API_KEY) is not set".to_string())
        })?;

        Ok(GeminiClient::new(api_key, &self.gemini_model)
            .with_base_url(&self.gemini_base_url)
            .with_retry(RetryPolicy {
                base_delay: self.extraction_retry_base,
                ..RetryPolicy::default()
            }))
    }
}

fn parse_or(key: &str, raw: Option<String>, default: u64) -> u64 {
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring non-numeric {}={:?}, using {}", key, raw, default);
            default
        }),
    }
}
