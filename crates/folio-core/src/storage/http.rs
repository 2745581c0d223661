//! Object store reached over HTTP (S3-style `GET {base}/{path}`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use super::BlobStore;

/// Downloads objects from an HTTP object store, optionally with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .context("Invalid storage token")?,
            );
        }
        Ok(headers)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.object_url(path);

        let response = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Object store returned {} for {}: {}", status, path, body);
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read object body")?;
        Ok(bytes.to_vec())
    }

    fn store_name(&self) -> &'static str {
        "http"
    }
}
