//! # pconvert
//!
//! Core of a PDF/image → text transcription service built on an external
//! generative-AI OCR endpoint.
//!
//! ## Why this crate?
//!
//! Transcription APIs choke on large documents: uploads hit size limits,
//! responses truncate, and a single rate-limit error wastes the whole
//! upload. Instead this crate splits a document into bounded page-range
//! chunks, drives the external API one chunk at a time with bounded retry,
//! and reassembles the pieces in original page order — so a 100-page exam
//! paper converts reliably over an API that is only happy with five pages
//! at a time.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Validate   size/type/page caps, synchronously at submission
//!  ├─ 2. Split      page-range chunks via lopdf (CPU-bound, spawn_blocking)
//!  ├─ 3. Transcribe sequential per-chunk calls with retry on HTTP 429
//!  ├─ 4. Assemble   concatenate in page order with part separators
//!  ├─ 5. Normalize  canonicalize math notation ($π$ → $\pi$)
//!  └─ 6. Export     optional .docx via external converter (pandoc)
//! ```
//!
//! Jobs run on a fixed-size background worker pool; callers poll a job
//! registry that always answers from a consistent snapshot.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pconvert::{ConversionService, JobStatus, PromptKind, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ConversionService::new(ServiceConfig::default())?;
//!
//!     let pdf = std::fs::read("exam.pdf")?;
//!     let job_id = service.submit(pdf, "my-api-key", PromptKind::PlainText).await?;
//!
//!     loop {
//!         let snap = service.poll_status(job_id).await?;
//!         eprintln!("{}/{} parts", snap.completed, snap.total);
//!         match snap.status {
//!             JobStatus::Completed => {
//!                 println!("{}", snap.result.unwrap_or_default());
//!                 break;
//!             }
//!             JobStatus::Error => return Err(snap.error_detail.unwrap_or_default().into()),
//!             _ => tokio::time::sleep(std::time::Duration::from_millis(500)).await,
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod activation;
pub mod config;
pub mod error;
pub mod export;
pub mod job;
pub mod pipeline;
pub mod prompts;
pub mod service;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use activation::ActivationClient;
pub use config::{ServiceConfig, ServiceConfigBuilder, DEFAULT_API_BASE, DEFAULT_MODEL};
pub use error::{ConvertError, TranscribeError};
pub use export::DocxExporter;
pub use job::{JobId, JobSnapshot, JobStatus};
pub use pipeline::normalize::normalize_formulas;
pub use pipeline::split::{plan_chunks, ChunkPlan};
pub use pipeline::transcribe::{
    GeminiBackend, GenerationParams, ModelResolver, TranscribeRequest, TranscriptionBackend,
};
pub use prompts::PromptKind;
pub use service::{ConversionService, InputKind, PART_SEPARATOR};
