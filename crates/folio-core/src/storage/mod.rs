//! Binary store gateway.
//!
//! Wraps an object store and hands the pipeline document bytes it can work with:
//! one retry on empty content (uploads that are not yet visible), content-type
//! detection, and best-effort removal of PDF restriction flags.

mod fs;
mod http;

pub use fs::FsBlobStore;
pub use http::HttpBlobStore;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pdf;

/// Object store holding uploaded documents.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Download the object at `path`. Zero bytes is a valid answer.
    async fn download(&self, path: &str) -> anyhow::Result<Vec<u8>>;

    /// Short name for logs (e.g. "fs", "http")
    fn store_name(&self) -> &'static str;
}

/// Content kind sent to the extraction service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeKind {
    Pdf,
    Png,
    Jpeg,
    Webp,
    Gif,
    Tiff,
}

impl MimeKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            MimeKind::Pdf => "application/pdf",
            MimeKind::Png => "image/png",
            MimeKind::Jpeg => "image/jpeg",
            MimeKind::Webp => "image/webp",
            MimeKind::Gif => "image/gif",
            MimeKind::Tiff => "image/tiff",
        }
    }

    /// Only PDFs have pages to count and slice.
    pub fn is_paged(&self) -> bool {
        matches!(self, MimeKind::Pdf)
    }

    /// Guess from the file extension.
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = Path::new(path)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(MimeKind::Pdf),
            "png" => Some(MimeKind::Png),
            "jpg" | "jpeg" => Some(MimeKind::Jpeg),
            "webp" => Some(MimeKind::Webp),
            "gif" => Some(MimeKind::Gif),
            "tif" | "tiff" => Some(MimeKind::Tiff),
            _ => None,
        }
    }

    /// Guess from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            return Some(MimeKind::Pdf);
        }
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Png => Some(MimeKind::Png),
            image::ImageFormat::Jpeg => Some(MimeKind::Jpeg),
            image::ImageFormat::WebP => Some(MimeKind::Webp),
            image::ImageFormat::Gif => Some(MimeKind::Gif),
            image::ImageFormat::Tiff => Some(MimeKind::Tiff),
            _ => None,
        }
    }

    /// Content beats extension; unknown content is treated as PDF.
    pub fn detect(path: &str, bytes: &[u8]) -> Self {
        Self::sniff(bytes)
            .or_else(|| Self::from_path(path))
            .unwrap_or(MimeKind::Pdf)
    }
}

/// Document bytes ready for page planning.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    pub mime: MimeKind,
}

/// Fetches documents from a [`BlobStore`] with the empty-content retry.
#[derive(Clone)]
pub struct DocumentFetcher {
    store: Arc<dyn BlobStore>,
    empty_retry_delay: Duration,
}

impl DocumentFetcher {
    pub fn new(store: Arc<dyn BlobStore>, empty_retry_delay: Duration) -> Self {
        Self {
            store,
            empty_retry_delay,
        }
    }

    /// Download `path`, retrying once after a delay if it comes back empty.
    pub async fn fetch(&self, path: &str) -> Result<FetchedDocument> {
        let mut bytes = self.download(path).await?;

        if bytes.is_empty() {
            tracing::warn!(
                path,
                store = self.store.store_name(),
                delay_ms = self.empty_retry_delay.as_millis() as u64,
                "Downloaded zero bytes, retrying once"
            );
            tokio::time::sleep(self.empty_retry_delay).await;
            bytes = self.download(path).await?;

            if bytes.is_empty() {
                return Err(Error::EmptyDocument {
                    path: path.to_string(),
                });
            }
        }

        let mime = MimeKind::detect(path, &bytes);
        let bytes = if mime.is_paged() {
            unlock_pdf(bytes).await
        } else {
            bytes
        };

        tracing::debug!(path, bytes = bytes.len(), mime = mime.mime_type(), "Fetched document");

        Ok(FetchedDocument { bytes, mime })
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        self.store.download(path).await.map_err(Error::Storage)
    }
}

/// Strip restriction flags, keeping the original bytes if that fails.
async fn unlock_pdf(original: Vec<u8>) -> Vec<u8> {
    let original = Arc::new(original);
    let task_bytes = original.clone();
    let joined = tokio::task::spawn_blocking(move || pdf::strip_restrictions(&task_bytes)).await;

    let failure = match joined {
        Ok(Ok(cleaned)) => return cleaned,
        Ok(Err(e)) => format!("{:#}", e),
        Err(e) => e.to_string(),
    };
    tracing::warn!("Could not re-serialize PDF, using original bytes: {}", failure);
    Arc::try_unwrap(original).unwrap_or_else(|shared| (*shared).clone())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::pdf::test_support::numbered_pdf;

    /// Store that answers from a script, one response per call.
    struct ScriptedStore {
        responses: Mutex<VecDeque<Vec<u8>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedStore {
        fn new(responses: Vec<Vec<u8>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl BlobStore for ScriptedStore {
        async fn download(&self, _path: &str) -> anyhow::Result<Vec<u8>> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
        }

        fn store_name(&self) -> &'static str {
            "scripted"
        }
    }

    fn fetcher(store: Arc<ScriptedStore>) -> DocumentFetcher {
        DocumentFetcher::new(store, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_fetch_retries_once_on_empty() {
        let pdf = numbered_pdf(2);
        let store = Arc::new(ScriptedStore::new(vec![Vec::new(), pdf]));

        let doc = fetcher(store.clone()).fetch("docs/a.pdf").await.unwrap();

        assert_eq!(store.calls(), 2);
        assert_eq!(doc.mime, MimeKind::Pdf);
        assert_eq!(pdf::count_pages(&doc.bytes), 2);
    }

    #[tokio::test]
    async fn test_fetch_fails_after_two_empty_downloads() {
        let store = Arc::new(ScriptedStore::new(vec![Vec::new(), Vec::new()]));

        let err = fetcher(store.clone()).fetch("docs/a.pdf").await.unwrap_err();

        assert_eq!(store.calls(), 2);
        assert!(matches!(err, Error::EmptyDocument { ref path } if path == "docs/a.pdf"));
    }

    #[tokio::test]
    async fn test_fetch_keeps_unparseable_pdf_bytes() {
        let broken = b"%PDF-1.4 truncated garbage".to_vec();
        let store = Arc::new(ScriptedStore::new(vec![broken.clone()]));

        let doc = fetcher(store).fetch("scan.pdf").await.unwrap();

        assert_eq!(doc.bytes, broken);
        assert_eq!(doc.mime, MimeKind::Pdf);
    }

    #[tokio::test]
    async fn test_fetch_passes_images_through() {
        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let store = Arc::new(ScriptedStore::new(vec![png.clone()]));

        let doc = fetcher(store).fetch("upload.bin").await.unwrap();

        assert_eq!(doc.mime, MimeKind::Png);
        assert_eq!(doc.bytes, png);
    }

    #[test]
    fn test_mime_detection_prefers_content() {
        assert_eq!(MimeKind::detect("photo.png", b"%PDF-1.7"), MimeKind::Pdf);
        assert_eq!(MimeKind::detect("photo.JPG", b"????"), MimeKind::Jpeg);
        assert_eq!(MimeKind::detect("noext", b"????"), MimeKind::Pdf);
        assert_eq!(MimeKind::from_path("a/b/c.tiff"), Some(MimeKind::Tiff));
    }
}
