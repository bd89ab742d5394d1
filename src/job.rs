//! Job records and the snapshots served to status pollers.
//!
//! A [`Job`] is the registry's mutable record for one conversion request.
//! Pollers never see a `Job` directly — they receive a cloned [`JobSnapshot`],
//! so a reader can never observe a half-applied update.
//!
//! ## Status transitions
//!
//! ```text
//! Pending ──▶ InProgress ──▶ Completed
//!                       └──▶ Error
//! ```
//!
//! Transitions only move forward. A job that reached `Completed` or `Error`
//! never re-enters `InProgress`; a fresh job must be submitted instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque unique job identifier.
///
/// The upstream implementation derived ids from the submission wall-clock
/// second, which collides under concurrent submissions; a random UUID keeps
/// the same opaque-token contract without the collision window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random id.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Completed and Error are terminal; no further updates are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            _ => Err(format!("invalid job status: {}", s)),
        }
    }
}

/// The registry's record for one conversion job.
///
/// The chunk count is fixed at creation; per-chunk results arrive
/// incrementally keyed by 0-based chunk index. The aggregate is written
/// exactly once, when the last chunk resolves.
#[derive(Clone)]
pub struct Job {
    pub id: JobId,
    /// Number of chunks the input was split into; immutable after creation.
    pub total_chunks: usize,
    /// Credential for the external transcription service. Held only for the
    /// job's lifetime, never serialized, redacted from `Debug`.
    pub(crate) credential: String,
    pub status: JobStatus,
    /// Chunks resolved so far (success or placeholder). Monotonic.
    pub completed_count: usize,
    /// Per-chunk transcribed text (or error placeholder), keyed by index.
    pub results: BTreeMap<usize, String>,
    /// Final concatenated text; present only when status is `Completed`.
    pub aggregate: Option<String>,
    /// Failure detail; present only when status is `Error`.
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(total_chunks: usize, credential: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            total_chunks,
            credential: credential.into(),
            status: JobStatus::Pending,
            completed_count: 0,
            results: BTreeMap::new(),
            aggregate: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The point-in-time view served to pollers.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.to_string(),
            status: self.status,
            completed: self.completed_count,
            total: self.total_chunks,
            result: self.aggregate.clone(),
            error_detail: self.error_detail.clone(),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("total_chunks", &self.total_chunks)
            .field("credential", &"<redacted>")
            .field("status", &self.status)
            .field("completed_count", &self.completed_count)
            .field("aggregate", &self.aggregate.as_ref().map(|a| a.len()))
            .field("error_detail", &self.error_detail)
            .finish()
    }
}

/// Immutable status view returned by `poll_status`.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    /// Chunks resolved so far.
    pub completed: usize,
    /// Total chunks in the job.
    pub total: usize,
    /// Aggregate text; `Some` only when `status == Completed`.
    pub result: Option<String>,
    /// Failure detail; `Some` only when `status == Error`.
    pub error_detail: Option<String>,
}
