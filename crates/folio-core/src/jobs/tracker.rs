//! Job lifecycle: status transitions, progress and the final result.
//!
//! Every write goes through [`LifecycleTracker`] so that transitions are
//! validated in one place and a stale run cannot overwrite a newer one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::store::JobStore;
use super::types::{JobRecord, ParsingProgress, ParsingStatus};
use crate::error::{Error, Result};
use crate::extraction::FieldMap;

#[derive(Clone)]
pub struct LifecycleTracker {
    store: Arc<dyn JobStore>,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Arc<Mutex<()>>,
}

impl LifecycleTracker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Current record for a document, if any.
    pub async fn status(&self, document_id: &str) -> Result<Option<JobRecord>> {
        self.store
            .load(document_id)
            .await
            .map_err(Error::Persistence)
    }

    pub async fn list(&self) -> Result<Vec<JobRecord>> {
        self.store.list().await.map_err(Error::Persistence)
    }

    /// Reset the document to a fresh pending run owned by `run_id`.
    ///
    /// Allowed from any state: a new request always restarts the job.
    pub async fn start_run(&self, document_id: &str, run_id: Uuid) -> Result<JobRecord> {
        let _guard = self.write_lock.lock().await;
        let previous = self.load(document_id).await?;

        if let Some(previous) = &previous {
            if previous.parsing_status == ParsingStatus::Processing {
                info!(
                    document_id,
                    old_run = ?previous.run_id,
                    new_run = %run_id,
                    "Restarting job that was still processing"
                );
            }
        }

        let now = Utc::now();
        let mut record = JobRecord::pending(document_id);
        record.run_id = Some(run_id);
        record.parsing_started_at = Some(now);
        record.updated_at = now;

        self.save(&record).await?;
        Ok(record)
    }

    /// Reject a continuation whose run was superseded or already finished.
    pub async fn ensure_current(&self, document_id: &str, run_id: Option<Uuid>) -> Result<()> {
        let Some(record) = self.load(document_id).await? else {
            return Ok(());
        };
        check_run(&record, run_id)?;
        if record.parsing_status.is_terminal() {
            return Err(Error::InvalidTransition {
                from: record.parsing_status,
                to: ParsingStatus::Processing,
            });
        }
        Ok(())
    }

    /// Pending -> processing for a job that needs more than one chunk.
    pub async fn mark_processing(
        &self,
        document_id: &str,
        run_id: Option<Uuid>,
        total_pages: u32,
        total_chunks: u32,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load_existing(document_id).await?;
        check_run(&record, run_id)?;
        transition(&mut record, ParsingStatus::Processing)?;

        record.parsing_progress = Some(ParsingProgress {
            current_page: 0,
            total_pages,
            chunks_completed: 0,
            total_chunks,
            error: None,
        });
        self.save(&record).await
    }

    /// Record a finished intermediate chunk and the fields so far.
    pub async fn record_progress(
        &self,
        document_id: &str,
        run_id: Option<Uuid>,
        progress: ParsingProgress,
        fields: &FieldMap,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load_existing(document_id).await?;
        check_run(&record, run_id)?;
        transition(&mut record, ParsingStatus::Processing)?;

        record.parsing_progress = Some(progress);
        record.ocr_data = Some(fields.clone());
        self.save(&record).await
    }

    /// Store the final result.
    pub async fn complete(
        &self,
        document_id: &str,
        run_id: Option<Uuid>,
        progress: ParsingProgress,
        fields: FieldMap,
    ) -> Result<JobRecord> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load_existing(document_id).await?;
        check_run(&record, run_id)?;
        transition(&mut record, ParsingStatus::Completed)?;

        let now = Utc::now();
        record.parsing_progress = Some(progress);
        record.ocr_data = Some(fields);
        record.parsing_completed_at = Some(now);
        record.updated_at = now;
        self.save(&record).await?;
        Ok(record)
    }

    /// Mark the job failed, keeping whatever fields were gathered.
    pub async fn fail(&self, document_id: &str, run_id: Option<Uuid>, error: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut record = match self.load(document_id).await? {
            Some(record) => record,
            None => JobRecord::pending(document_id),
        };
        check_run(&record, run_id)?;
        transition(&mut record, ParsingStatus::Failed)?;

        let mut progress = record.parsing_progress.take().unwrap_or_default();
        progress.error = Some(error.to_string());
        record.parsing_progress = Some(progress);
        self.save(&record).await
    }

    /// Fail processing jobs that have not advanced for `max_idle`.
    ///
    /// A continuation that never arrives leaves a job in processing forever;
    /// this is the sweep that closes such jobs out. Returns the ids it failed.
    pub async fn reap_stalled(&self, max_idle: Duration) -> Result<Vec<String>> {
        let idle = chrono::Duration::from_std(max_idle)
            .map_err(|e| Error::Config(format!("stall timeout out of range: {}", e)))?;
        let cutoff = Utc::now() - idle;
        let stalled: Vec<JobRecord> = self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.parsing_status == ParsingStatus::Processing && r.updated_at < cutoff)
            .collect();

        let mut reaped = Vec::new();
        for record in stalled {
            let message = format!(
                "Job stalled: no progress for {} seconds",
                max_idle.as_secs()
            );
            match self.fail(&record.document_id, record.run_id, &message).await {
                Ok(()) => {
                    warn!(document_id = %record.document_id, "Failed stalled job");
                    reaped.push(record.document_id);
                }
                // Advanced or restarted since the listing
                Err(Error::Superseded { .. }) | Err(Error::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    async fn load(&self, document_id: &str) -> Result<Option<JobRecord>> {
        self.store
            .load(document_id)
            .await
            .map_err(Error::Persistence)
    }

    async fn load_existing(&self, document_id: &str) -> Result<JobRecord> {
        self.load(document_id).await?.ok_or_else(|| {
            Error::InvalidRequest(format!("no job record for document '{}'", document_id))
        })
    }

    async fn save(&self, record: &JobRecord) -> Result<()> {
        self.store.save(record).await.map_err(Error::Persistence)
    }
}

/// A continuation from an older run must not touch a restarted job.
fn check_run(record: &JobRecord, run_id: Option<Uuid>) -> Result<()> {
    match (run_id, record.run_id) {
        (Some(incoming), Some(current)) if incoming != current => Err(Error::Superseded {
            document_id: record.document_id.clone(),
        }),
        _ => Ok(()),
    }
}

fn transition(record: &mut JobRecord, to: ParsingStatus) -> Result<()> {
    let from = record.parsing_status;
    if !from.can_transition_to(to) {
        return Err(Error::InvalidTransition { from, to });
    }
    record.parsing_status = to;
    record.updated_at = Utc::now();
    Ok(())
}
