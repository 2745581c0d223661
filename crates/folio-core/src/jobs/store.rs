//! Persistence for job records.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::JobRecord;

/// Keyed storage for [`JobRecord`]s, one per document.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, document_id: &str) -> Result<Option<JobRecord>>;

    async fn save(&self, record: &JobRecord) -> Result<()>;

    async fn list(&self) -> Result<Vec<JobRecord>>;
}

/// In-process store, used by tests and the one-shot CLI.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    records: Arc<RwLock<HashMap<String, JobRecord>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load(&self, document_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.records.read().await.get(document_id).cloned())
    }

    async fn save(&self, record: &JobRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.document_id.clone(), record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<JobRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

/// One pretty-printed JSON file per document under a directory.
#[derive(Debug, Clone)]
pub struct FsJobStore {
    dir: PathBuf,
}

impl FsJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the path for a specific document's record.
    ///
    /// The id is hex-encoded so distinct ids never share a file.
    fn record_path(&self, document_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(document_id)))
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn load(&self, document_id: &str) -> Result<Option<JobRecord>> {
        let path = self.record_path(document_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to read job record"),
        };
        let record: JobRecord =
            serde_json::from_str(&content).context("Failed to parse job record JSON")?;
        if record.document_id != document_id {
            anyhow::bail!(
                "Job record at {:?} belongs to '{}', not '{}'",
                path,
                record.document_id,
                document_id
            );
        }
        Ok(Some(record))
    }

    async fn save(&self, record: &JobRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("Failed to create jobs directory")?;

        let path = self.record_path(&record.document_id);
        let tmp = path.with_extension("json.tmp");
        let content =
            serde_json::to_string_pretty(record).context("Failed to serialize job record")?;

        tokio::fs::write(&tmp, content)
            .await
            .context("Failed to write job record")?;
        tokio::fs::rename(&tmp, &path)
            .await
            .context("Failed to replace job record")?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<JobRecord>> {
        let mut records = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e).context("Failed to list jobs directory"),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let parsed = match tokio::fs::read_to_string(&path).await {
                Ok(content) => serde_json::from_str::<JobRecord>(&content).map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            };
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Failed to load job record {:?}: {}", path, e),
            }
        }

        // Most recently updated first
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }
}
