//! Error types for the pconvert library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConvertError`] — **Fatal**: the operation cannot proceed at all
//!   (bad input, PDF unreadable, job store failure, external tool broken).
//!   Returned as `Err(ConvertError)` from the service-level entry points.
//!
//! * [`TranscribeError`] — **Per-chunk**: one chunk's transcription call
//!   failed. The orchestrator contains these — a retryable variant is retried
//!   on a bounded schedule, and an exhausted or fatal variant degrades to a
//!   placeholder string in the aggregate result. A single bad chunk never
//!   fails the whole job.

use crate::job::JobId;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pconvert library.
///
/// Chunk-level transcription failures use [`TranscribeError`] and are degraded
/// to placeholders by the orchestrator rather than propagated here.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Validation errors (surfaced synchronously at submission) ──────────
    /// The uploaded document contained no bytes.
    #[error("Input document is empty")]
    EmptyInput,

    /// The input is not a PDF, JPEG, or PNG.
    #[error("Unsupported file type: {detail}")]
    UnsupportedType { detail: String },

    /// The input exceeds the configured upload size cap.
    #[error("Input is {size} bytes, exceeding the {limit}-byte limit")]
    TooLarge { size: u64, limit: u64 },

    /// The PDF has more pages than the configured cap.
    #[error("Document has {pages} pages, exceeding the {limit}-page limit")]
    TooManyPages { pages: usize, limit: usize },

    // ── Job errors ────────────────────────────────────────────────────────
    /// No job with the given id exists in the registry.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The PDF header/xref could not be parsed.
    #[error("Failed to parse PDF: {detail}")]
    PdfParse { detail: String },

    /// Extracting a page range into a standalone chunk document failed.
    /// All partially written chunk files have been removed.
    #[error("Failed to split PDF at part {part}: {detail}")]
    SplitFailed { part: usize, detail: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// A job registry update failed; the job is finalized as `error`.
    #[error("Job store update failed: {0}")]
    Store(String),

    // ── External converter errors ─────────────────────────────────────────
    /// The word-processor converter tool failed or is unavailable.
    #[error("Document converter failed: {detail}")]
    ExternalTool { detail: String },

    /// The word-processor converter exceeded its time budget.
    #[error("Document converter timed out after {secs}s")]
    ExternalToolTimeout { secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing a spool artifact failed.
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A per-chunk transcription failure.
///
/// The orchestrator maps these onto its retry policy: [`RateLimited`] and
/// [`Transient`] are retried up to the configured attempt bound,
/// [`Fatal`] is not retried at all.
///
/// [`RateLimited`]: TranscribeError::RateLimited
/// [`Transient`]: TranscribeError::Transient
/// [`Fatal`]: TranscribeError::Fatal
#[derive(Debug, Clone, Error)]
pub enum TranscribeError {
    /// The service reported a rate-limit condition (HTTP 429).
    ///
    /// `retry_after_secs` carries a server-specified delay when present;
    /// the orchestrator otherwise uses its fixed back-off.
    #[error("Transcription service rate limit exceeded (HTTP 429)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// A retryable network or server failure (timeout, connection reset, 5xx).
    #[error("Transient transcription failure: {detail}")]
    Transient { detail: String },

    /// An unrecoverable failure (bad credential, unsupported content,
    /// malformed response). Degrades to a placeholder, never retried.
    #[error("Transcription failed: {detail}")]
    Fatal { detail: String },
}

impl TranscribeError {
    /// Whether the orchestrator may retry the chunk after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranscribeError::RateLimited { .. } | TranscribeError::Transient { .. }
        )
    }
}
