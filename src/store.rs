//! In-process job registry: id → [`Job`] with O(1) lookup.
//!
//! The upstream implementation tracked progress in per-job JSON files on
//! disk and, in one variant, located in-flight work by scanning executor
//! internals for a matching identifier. Both are replaced here by an
//! explicit registry keyed by [`JobId`].
//!
//! ## Concurrency contract
//!
//! One writer (the orchestrator task driving a job) and any number of
//! readers (status pollers). All mutations happen under the write lock, so
//! a reader holding the read lock observes either the pre-update or the
//! fully post-update record — never a torn write. Readers receive a cloned
//! [`JobSnapshot`] and hold no lock after the call returns.
//!
//! The registry also enforces the job lifecycle invariants: forward-only
//! status transitions, monotonic `completed_count`, result indices in range,
//! and exactly-once finalization. Updates against a job that already reached
//! a terminal status are ignored with a warning rather than applied.

use crate::error::ConvertError;
use crate::job::{Job, JobId, JobSnapshot, JobStatus};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Registry of all jobs known to the service.
///
/// Records are removed by an external cleanup caller via [`JobStore::remove`];
/// the orchestrator itself never deletes records.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created job and return its id.
    pub async fn create(&self, job: Job) -> JobId {
        let id = job.id;
        self.jobs.write().await.insert(id, job);
        debug!(job_id = %id, "Job registered");
        id
    }

    /// Point-in-time snapshot for a poller.
    pub async fn snapshot(&self, id: JobId) -> Result<JobSnapshot, ConvertError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .map(Job::snapshot)
            .ok_or(ConvertError::JobNotFound(id))
    }

    /// The credential captured at submission, for the orchestrator's use.
    pub(crate) async fn credential(&self, id: JobId) -> Result<String, ConvertError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .map(|j| j.credential.clone())
            .ok_or(ConvertError::JobNotFound(id))
    }

    /// Transition `Pending → InProgress`. A no-op on a terminal job.
    pub async fn mark_running(&self, id: JobId) -> Result<(), ConvertError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(ConvertError::JobNotFound(id))?;
        if job.status.is_terminal() {
            warn!(job_id = %id, status = %job.status, "Ignoring mark_running on terminal job");
            return Ok(());
        }
        job.status = JobStatus::InProgress;
        job.updated_at = Utc::now();
        Ok(())
    }

    /// Record one chunk's resolved text (real transcription or placeholder)
    /// and advance `completed_count`.
    ///
    /// `completed_count` never decreases: re-recording an index leaves the
    /// count at the number of distinct resolved chunks.
    pub async fn record_chunk_result(
        &self,
        id: JobId,
        index: usize,
        text: String,
    ) -> Result<(), ConvertError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(ConvertError::JobNotFound(id))?;
        if index >= job.total_chunks {
            return Err(ConvertError::Internal(format!(
                "chunk index {} out of range for job with {} chunks",
                index, job.total_chunks
            )));
        }
        if job.status.is_terminal() {
            warn!(job_id = %id, status = %job.status, "Ignoring chunk result on terminal job");
            return Ok(());
        }
        job.results.insert(index, text);
        job.completed_count = job.completed_count.max(job.results.len());
        job.updated_at = Utc::now();
        Ok(())
    }

    /// Finalize the job as completed with the assembled aggregate text.
    /// A no-op if the job already reached a terminal status.
    pub async fn finalize_ok(&self, id: JobId, aggregate: String) -> Result<(), ConvertError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(ConvertError::JobNotFound(id))?;
        if job.status.is_terminal() {
            warn!(job_id = %id, status = %job.status, "Ignoring finalize_ok on terminal job");
            return Ok(());
        }
        job.status = JobStatus::Completed;
        job.aggregate = Some(aggregate);
        job.credential.clear();
        job.updated_at = Utc::now();
        Ok(())
    }

    /// Finalize the job as failed with a captured detail string.
    /// A no-op if the job already reached a terminal status.
    pub async fn finalize_err(&self, id: JobId, detail: String) -> Result<(), ConvertError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(ConvertError::JobNotFound(id))?;
        if job.status.is_terminal() {
            warn!(job_id = %id, status = %job.status, "Ignoring finalize_err on terminal job");
            return Ok(());
        }
        job.status = JobStatus::Error;
        job.error_detail = Some(detail);
        job.credential.clear();
        job.updated_at = Utc::now();
        Ok(())
    }

    /// Delete a job record. Returns whether a record existed.
    ///
    /// Intended for the cleanup collaborator that reaps finished jobs.
    pub async fn remove(&self, id: JobId) -> bool {
        self.jobs.write().await.remove(&id).is_some()
    }

    /// Number of registered jobs (any status).
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
