//! Object store backed by a local directory.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::BlobStore;

/// Reads objects from files under a root directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object path onto the root, refusing anything that escapes it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            anyhow::bail!("Invalid object path: {}", path);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let file = self.resolve(path)?;
        tokio::fs::read(&file)
            .await
            .with_context(|| format!("Failed to read object {:?}", file))
    }

    fn store_name(&self) -> &'static str {
        "fs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_download_nested_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("loans/42")).unwrap();
        std::fs::write(temp_dir.path().join("loans/42/statement.pdf"), b"hello").unwrap();

        let store = FsBlobStore::new(temp_dir.path());
        let bytes = store.download("loans/42/statement.pdf").await.unwrap();
        assert_eq!(bytes, b"hello");

        // leading slash is relative to the root
        let bytes = store.download("/loans/42/statement.pdf").await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn test_download_empty_file_is_zero_bytes() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::File::create(temp_dir.path().join("empty.pdf")).unwrap();

        let store = FsBlobStore::new(temp_dir.path());
        assert!(store.download("empty.pdf").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(temp_dir.path());

        let err = store.download("missing.pdf").await.unwrap_err();
        assert!(err.to_string().contains("Failed to read object"));
    }

    #[tokio::test]
    async fn test_rejects_parent_traversal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(temp_dir.path().join("root"));

        let err = store.download("../secret.pdf").await.unwrap_err();
        assert!(err.to_string().contains("Invalid object path"));
    }
}
