//! The conversion service: submission, orchestration, polling, cancellation.
//!
//! [`ConversionService`] is the crate's primary entry point. It is built
//! once at process start from a [`ServiceConfig`] and shared by reference
//! (it is a cheap bundle of `Arc`s) between the submission path, the
//! status-polling path, and the background orchestration tasks. There is no
//! ambient global state.
//!
//! ## Execution model
//!
//! `submit` validates synchronously, materializes the chunk set, registers
//! the job, spawns an orchestration task, and returns the job id
//! immediately. Orchestration tasks queue on a fixed-size semaphore so at
//! most `config.workers` jobs run at once and a burst of large uploads
//! cannot block new submissions. Within one job, chunks are processed
//! strictly sequentially in index order — the external service throttles
//! per credential, so fanning out buys nothing but 429s; reassembly order
//! is by chunk index either way.
//!
//! ## Failure containment
//!
//! A chunk that exhausts its retry budget (or fails fatally) degrades to a
//! placeholder string at its position; the job keeps going. Only registry
//! failures and cancellation fail the whole job. Every chunk's backing file
//! is deleted the moment the chunk is resolved, and the per-job spool
//! directory is removed when the job ends on any path.

use crate::config::ServiceConfig;
use crate::error::{ConvertError, TranscribeError};
use crate::job::{Job, JobId, JobSnapshot};
use crate::pipeline::normalize::normalize_formulas;
use crate::pipeline::split::{self, ChunkFile};
use crate::pipeline::transcribe::{
    GeminiBackend, GenerationParams, ModelResolver, TranscribeRequest, TranscriptionBackend,
};
use crate::prompts::PromptKind;
use crate::store::JobStore;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Marker inserted between chunk texts in the aggregate result.
pub const PART_SEPARATOR: &str = "\n\n--- End of Part ---\n\n";

/// Accepted input formats, sniffed from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Jpeg,
    Png,
}

impl InputKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            InputKind::Pdf => "application/pdf",
            InputKind::Jpeg => "image/jpeg",
            InputKind::Png => "image/png",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            InputKind::Pdf => "pdf",
            InputKind::Jpeg => "jpg",
            InputKind::Png => "png",
        }
    }
}

/// Service object owning the job registry, the worker pool, and the
/// transcription backend.
///
/// Cloning is cheap and shares all state; handlers typically hold a clone.
#[derive(Clone)]
pub struct ConversionService {
    config: Arc<ServiceConfig>,
    store: Arc<JobStore>,
    backend: Arc<dyn TranscriptionBackend>,
    resolver: Arc<ModelResolver>,
    workers: Arc<Semaphore>,
    cancellations: Arc<RwLock<HashMap<JobId, CancellationToken>>>,
}

impl ConversionService {
    /// Build a service backed by the Gemini-style HTTP backend.
    pub fn new(config: ServiceConfig) -> Result<Self, ConvertError> {
        let backend: Arc<dyn TranscriptionBackend> = Arc::new(GeminiBackend::new(&config)?);
        Self::with_backend(config, backend)
    }

    /// Build a service with a custom transcription backend (tests,
    /// alternative providers).
    pub fn with_backend(
        config: ServiceConfig,
        backend: Arc<dyn TranscriptionBackend>,
    ) -> Result<Self, ConvertError> {
        let resolver = Arc::new(ModelResolver::new(&config)?);
        Ok(Self {
            workers: Arc::new(Semaphore::new(config.workers)),
            resolver,
            backend,
            store: Arc::new(JobStore::new()),
            cancellations: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The job registry, for cleanup collaborators that reap finished jobs.
    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Validate and enqueue a conversion job.
    ///
    /// Validation (emptiness, size cap, format sniffing, page cap) happens
    /// synchronously — a rejected submission schedules no background work
    /// and registers no job. On success the returned [`JobId`] can be
    /// polled immediately.
    pub async fn submit(
        &self,
        document: Vec<u8>,
        credential: impl Into<String>,
        prompt: PromptKind,
    ) -> Result<JobId, ConvertError> {
        let chunk_size = self.config.chunk_size;
        self.submit_with_chunk_size(document, chunk_size, credential, prompt)
            .await
    }

    /// [`submit`](Self::submit) with a per-call chunk size, for callers
    /// serving multiple deployment profiles from one service.
    pub async fn submit_with_chunk_size(
        &self,
        document: Vec<u8>,
        chunk_size: usize,
        credential: impl Into<String>,
        prompt: PromptKind,
    ) -> Result<JobId, ConvertError> {
        let chunk_size = chunk_size.max(1);
        let kind = self.validate(&document)?;

        let spool_root = self.config.spool_root();
        let spool = tempfile::Builder::new()
            .prefix("pconvert-job-")
            .tempdir_in(&spool_root)
            .map_err(|e| ConvertError::Io {
                path: spool_root,
                source: e,
            })?;

        let chunks = match kind {
            InputKind::Pdf => {
                self.materialize_pdf(document, chunk_size, spool.path())
                    .await?
            }
            InputKind::Jpeg | InputKind::Png => {
                vec![write_single_chunk(spool.path(), &document, kind, 1)?]
            }
        };

        let job = Job::new(chunks.len(), credential);
        let job_id = self.store.create(job).await;

        let cancel = CancellationToken::new();
        self.cancellations
            .write()
            .await
            .insert(job_id, cancel.clone());

        info!(
            job_id = %job_id,
            kind = kind.mime_type(),
            chunks = chunks.len(),
            "Job submitted"
        );

        let service = self.clone();
        let mime = kind.mime_type();
        tokio::spawn(async move {
            service.run_job(job_id, chunks, spool, mime, prompt, cancel).await;
        });

        Ok(job_id)
    }

    /// Point-in-time status snapshot. Never blocks on orchestration
    /// progress; unknown ids report [`ConvertError::JobNotFound`] with no
    /// side effects.
    pub async fn poll_status(&self, id: JobId) -> Result<JobSnapshot, ConvertError> {
        self.store.snapshot(id).await
    }

    /// Abandon an in-flight job.
    ///
    /// The orchestrator observes the cancellation between chunks and
    /// between retry attempts (a pending back-off delay is cut short),
    /// releases the job's spool artifacts, and finalizes the job as
    /// `error`. Cancelling an already-finished job is a no-op.
    pub async fn cancel(&self, id: JobId) -> Result<(), ConvertError> {
        // Establish existence first so unknown ids fail cleanly.
        self.store.snapshot(id).await?;
        if let Some(token) = self.cancellations.read().await.get(&id) {
            info!(job_id = %id, "Cancellation requested");
            token.cancel();
        }
        Ok(())
    }

    /// Delete a finished job's record. For the external cleanup
    /// collaborator; the orchestrator never deletes records itself.
    pub async fn remove_job(&self, id: JobId) -> bool {
        self.store.remove(id).await
    }

    // ── Submission internals ─────────────────────────────────────────────

    fn validate(&self, document: &[u8]) -> Result<InputKind, ConvertError> {
        if document.is_empty() {
            return Err(ConvertError::EmptyInput);
        }
        let size = document.len() as u64;
        if size > self.config.max_upload_bytes {
            return Err(ConvertError::TooLarge {
                size,
                limit: self.config.max_upload_bytes,
            });
        }
        sniff_kind(document)
    }

    /// Count pages, enforce the page cap, and materialize the chunk set:
    /// a single chunk for small documents, a full split otherwise.
    async fn materialize_pdf(
        &self,
        document: Vec<u8>,
        chunk_size: usize,
        spool: &Path,
    ) -> Result<Vec<ChunkFile>, ConvertError> {
        let (document, pages) = tokio::task::spawn_blocking(move || {
            let pages = split::page_count(&document);
            (document, pages)
        })
        .await
        .map_err(|e| ConvertError::Internal(format!("page-count task: {e}")))?;
        let pages = pages?;

        if pages == 0 {
            return Err(ConvertError::PdfParse {
                detail: "document has no pages".into(),
            });
        }
        if pages > self.config.max_pages {
            return Err(ConvertError::TooManyPages {
                pages,
                limit: self.config.max_pages,
            });
        }

        if pages <= chunk_size {
            // Small document: skip the splitter, the upload itself is the
            // one chunk.
            return Ok(vec![write_single_chunk(
                spool,
                &document,
                InputKind::Pdf,
                pages,
            )?]);
        }

        let plans = split::plan_chunks(pages, chunk_size);
        let spool = spool.to_path_buf();
        tokio::task::spawn_blocking(move || split::split_pdf(&document, &plans, &spool))
            .await
            .map_err(|e| ConvertError::Internal(format!("split task: {e}")))?
    }

    // ── Orchestration ────────────────────────────────────────────────────

    /// Background task body for one job. Holds the spool directory for the
    /// job's lifetime; dropping it removes any chunk files still on disk
    /// (cancellation, store failure), on every exit path.
    async fn run_job(
        self,
        job_id: JobId,
        chunks: Vec<ChunkFile>,
        spool: TempDir,
        mime: &'static str,
        prompt: PromptKind,
        cancel: CancellationToken,
    ) {
        let permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!(job_id = %job_id, "Worker pool closed before job could start");
                let _ = self
                    .store
                    .finalize_err(job_id, "worker pool closed".into())
                    .await;
                return;
            }
        };

        self.drive(job_id, &chunks, mime, prompt, &cancel).await;

        drop(permit);
        self.cancellations.write().await.remove(&job_id);
        drop(spool);
    }

    /// Process every chunk in index order, updating the registry after each,
    /// then assemble, normalize, and finalize.
    async fn drive(
        &self,
        job_id: JobId,
        chunks: &[ChunkFile],
        mime: &'static str,
        prompt: PromptKind,
        cancel: &CancellationToken,
    ) {
        if cancel.is_cancelled() {
            let _ = self
                .store
                .finalize_err(job_id, "job cancelled".into())
                .await;
            return;
        }

        if let Err(e) = self.store.mark_running(job_id).await {
            error!(job_id = %job_id, error = %e, "Failed to mark job running");
            return;
        }

        let credential = match self.store.credential(job_id).await {
            Ok(c) => c,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Job vanished before processing");
                return;
            }
        };

        let model = self.resolver.resolve().await;
        let params = GenerationParams::from(self.config.as_ref());
        debug!(job_id = %job_id, model = %model, "Driving {} chunk(s)", chunks.len());

        let mut parts: Vec<String> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if cancel.is_cancelled() {
                info!(job_id = %job_id, "Job cancelled between chunks");
                let _ = self
                    .store
                    .finalize_err(job_id, "job cancelled".into())
                    .await;
                return;
            }

            let outcome = self
                .process_chunk(chunk, mime, prompt, &model, &credential, params, cancel)
                .await;

            // The chunk's backing file is consumed either way; release it
            // now so a long job never accumulates spool artifacts.
            release_artifact(&chunk.path);

            let text = match outcome {
                ChunkOutcome::Resolved(text) => text,
                ChunkOutcome::Cancelled => {
                    info!(job_id = %job_id, part = chunk.index + 1, "Job cancelled mid-chunk");
                    let _ = self
                        .store
                        .finalize_err(job_id, "job cancelled".into())
                        .await;
                    return;
                }
            };

            if let Err(e) = self
                .store
                .record_chunk_result(job_id, chunk.index, text.clone())
                .await
            {
                error!(job_id = %job_id, error = %e, "Job store update failed");
                let _ = self
                    .store
                    .finalize_err(job_id, format!("job store update failed: {e}"))
                    .await;
                return;
            }
            parts.push(text);
        }

        let aggregate = normalize_formulas(&parts.join(PART_SEPARATOR));
        if let Err(e) = self.store.finalize_ok(job_id, aggregate).await {
            error!(job_id = %job_id, error = %e, "Failed to finalize job");
            return;
        }
        info!(job_id = %job_id, chunks = chunks.len(), "Job completed");
    }

    /// One chunk's attempt cycle: up to `max_attempts` calls with a fixed
    /// back-off between them, cancellation checked before each delay.
    /// Exhaustion and fatal errors degrade to the placeholder string.
    #[allow(clippy::too_many_arguments)]
    async fn process_chunk(
        &self,
        chunk: &ChunkFile,
        mime: &'static str,
        prompt: PromptKind,
        model: &str,
        credential: &str,
        params: GenerationParams,
        cancel: &CancellationToken,
    ) -> ChunkOutcome {
        let document = match tokio::fs::read(&chunk.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(part = chunk.index + 1, error = %e, "Chunk file unreadable");
                return ChunkOutcome::Resolved(placeholder(
                    chunk.index,
                    &format!("chunk file unreadable: {e}"),
                ));
            }
        };

        let mut last_error = TranscribeError::Fatal {
            detail: "no attempts made".into(),
        };

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                warn!(
                    part = chunk.index + 1,
                    attempt,
                    delay_secs = self.config.retry_delay.as_secs(),
                    "Backing off before retry"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return ChunkOutcome::Cancelled,
                    _ = tokio::time::sleep(self.config.retry_delay) => {}
                }
            }

            let request = TranscribeRequest {
                document: document.clone(),
                mime_type: mime.to_string(),
                prompt: prompt.template().to_string(),
                model: model.to_string(),
                credential: credential.to_string(),
                params,
            };

            match self.backend.transcribe(request).await {
                Ok(text) => {
                    debug!(
                        part = chunk.index + 1,
                        attempt,
                        chars = text.len(),
                        "Chunk transcribed"
                    );
                    return ChunkOutcome::Resolved(text);
                }
                Err(e) => {
                    warn!(part = chunk.index + 1, attempt, error = %e, "Chunk attempt failed");
                    let retryable = e.is_retryable();
                    last_error = e;
                    if !retryable {
                        break;
                    }
                }
            }
        }

        ChunkOutcome::Resolved(placeholder(chunk.index, &last_error.to_string()))
    }
}

enum ChunkOutcome {
    /// Real transcription or placeholder; orchestration continues.
    Resolved(String),
    Cancelled,
}

/// Placeholder recorded for a chunk whose transcription could not be
/// obtained; embeds the 1-based part ordinal.
fn placeholder(index: usize, detail: &str) -> String {
    format!("Error processing part {}: {}", index + 1, detail)
}

/// Sniff the input format from magic bytes. Extensions are not trusted —
/// the bytes decide.
fn sniff_kind(document: &[u8]) -> Result<InputKind, ConvertError> {
    if document.len() >= 5 && &document[..5] == b"%PDF-" {
        return Ok(InputKind::Pdf);
    }
    match image::guess_format(document) {
        Ok(image::ImageFormat::Jpeg) => Ok(InputKind::Jpeg),
        Ok(image::ImageFormat::Png) => Ok(InputKind::Png),
        Ok(other) => Err(ConvertError::UnsupportedType {
            detail: format!("{other:?} images are not supported"),
        }),
        Err(_) => Err(ConvertError::UnsupportedType {
            detail: "expected a PDF, JPEG, or PNG document".into(),
        }),
    }
}

/// Write the whole upload as the job's single chunk.
fn write_single_chunk(
    spool: &Path,
    document: &[u8],
    kind: InputKind,
    pages: usize,
) -> Result<ChunkFile, ConvertError> {
    let path = spool.join(format!("part1.{}", kind.extension()));
    std::fs::write(&path, document).map_err(|e| ConvertError::Io {
        path: path.clone(),
        source: e,
    })?;
    Ok(ChunkFile {
        index: 0,
        path,
        pages,
    })
}

/// Delete a consumed chunk file. Failure is logged, never propagated —
/// the spool directory sweep on job exit is the backstop.
fn release_artifact(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "Failed to release chunk artifact");
    }
}
