//! End-to-end tests for the conversion service, driven against scripted
//! in-process transcription backends — no network, no real API key.
//!
//! Run with:
//!   cargo test --test service

use async_trait::async_trait;
use pconvert::{
    ConversionService, ConvertError, JobId, JobStatus, PromptKind, ServiceConfig,
    TranscribeError, TranscribeRequest, TranscriptionBackend, PART_SEPARATOR,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Build a minimal valid PDF with `pages` one-line text pages.
fn sample_pdf(pages: usize) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages);
    for i in 0..pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 36.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::string_literal(format!("Page {}", i + 1))],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn test_config(spool: &tempfile::TempDir) -> ServiceConfig {
    ServiceConfig::builder()
        .chunk_size(5)
        .retry_delay(Duration::from_millis(10))
        .spool_dir(spool.path())
        .build()
        .unwrap()
}

/// Poll until the job reaches a terminal status, with a hard deadline.
async fn wait_terminal(service: &ConversionService, id: JobId) -> pconvert::JobSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snap = service.poll_status(id).await.expect("job should exist");
        if snap.status.is_terminal() {
            return snap;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job did not reach a terminal status in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Scripted backend: answers `part-N` per chunk, with optional per-part
/// failure behaviour. Parts are identified by first-seen document bytes,
/// which matches chunk order because the orchestrator is sequential.
struct ScriptedBackend {
    state: Mutex<ScriptState>,
    /// 1-based part that always reports a rate limit.
    rate_limited_part: Option<usize>,
    /// Text template; `{n}` is replaced with the 1-based part ordinal.
    reply: String,
}

#[derive(Default)]
struct ScriptState {
    seen: Vec<Vec<u8>>,
    attempts: HashMap<usize, usize>,
}

impl ScriptedBackend {
    fn new() -> Arc<Self> {
        Self::with_reply("part-{n}")
    }

    fn with_reply(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ScriptState::default()),
            rate_limited_part: None,
            reply: reply.to_string(),
        })
    }

    fn rate_limiting_part(part: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ScriptState::default()),
            rate_limited_part: Some(part),
            reply: "part-{n}".to_string(),
        })
    }

    fn attempts_for(&self, part: usize) -> usize {
        *self
            .state
            .lock()
            .unwrap()
            .attempts
            .get(&part)
            .unwrap_or(&0)
    }

    fn total_calls(&self) -> usize {
        self.state.lock().unwrap().attempts.values().sum()
    }
}

#[async_trait]
impl TranscriptionBackend for ScriptedBackend {
    async fn transcribe(&self, request: TranscribeRequest) -> Result<String, TranscribeError> {
        let part = {
            let mut state = self.state.lock().unwrap();
            let part = match state.seen.iter().position(|d| *d == request.document) {
                Some(i) => i + 1,
                None => {
                    state.seen.push(request.document.clone());
                    state.seen.len()
                }
            };
            *state.attempts.entry(part).or_insert(0) += 1;
            part
        };

        if self.rate_limited_part == Some(part) {
            return Err(TranscribeError::RateLimited {
                retry_after_secs: None,
            });
        }
        Ok(self.reply.replace("{n}", &part.to_string()))
    }
}

/// Backend that always rate-limits; used for cancellation tests.
struct StonewallBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl TranscriptionBackend for StonewallBackend {
    async fn transcribe(&self, _request: TranscribeRequest) -> Result<String, TranscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TranscribeError::RateLimited {
            retry_after_secs: None,
        })
    }
}

/// Backend that sleeps per call and tracks peak concurrency.
struct SlowBackend {
    current: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl SlowBackend {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay,
        })
    }
}

#[async_trait]
impl TranscriptionBackend for SlowBackend {
    async fn transcribe(&self, _request: TranscribeRequest) -> Result<String, TranscribeError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok("ok".to_string())
    }
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn twelve_page_pdf_is_split_transcribed_and_reassembled() {
    let spool = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new();
    let service = ConversionService::with_backend(test_config(&spool), backend.clone()).unwrap();

    let job_id = service
        .submit(sample_pdf(12), "test-key", PromptKind::PlainText)
        .await
        .unwrap();

    let snap = wait_terminal(&service, job_id).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.total, 3);
    assert_eq!(snap.completed, 3);
    assert_eq!(
        snap.result.as_deref(),
        Some(format!("part-1{PART_SEPARATOR}part-2{PART_SEPARATOR}part-3").as_str())
    );
    assert_eq!(backend.total_calls(), 3);
    assert!(snap.error_detail.is_none());
}

#[tokio::test]
async fn small_pdf_bypasses_the_splitter() {
    let spool = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new();
    let service = ConversionService::with_backend(test_config(&spool), backend.clone()).unwrap();

    let job_id = service
        .submit(sample_pdf(3), "test-key", PromptKind::PlainText)
        .await
        .unwrap();

    let snap = wait_terminal(&service, job_id).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.total, 1, "3 pages at chunk_size 5 is a single chunk");
    assert_eq!(snap.result.as_deref(), Some("part-1"));
    assert_eq!(backend.total_calls(), 1);
}

#[tokio::test]
async fn per_call_chunk_size_overrides_the_profile_default() {
    let spool = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new();
    let service = ConversionService::with_backend(test_config(&spool), backend).unwrap();

    let job_id = service
        .submit_with_chunk_size(sample_pdf(12), 3, "test-key", PromptKind::PlainText)
        .await
        .unwrap();

    let snap = wait_terminal(&service, job_id).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.total, 4, "12 pages at chunk size 3 is 4 chunks");
}

#[tokio::test]
async fn png_upload_is_a_single_chunk_job() {
    let spool = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new();
    let service = ConversionService::with_backend(test_config(&spool), backend.clone()).unwrap();

    // Smallest of PNGs: magic bytes are all the sniffer needs, and the
    // scripted backend never decodes the payload.
    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    let job_id = service
        .submit(png.to_vec(), "test-key", PromptKind::PlainText)
        .await
        .unwrap();

    let snap = wait_terminal(&service, job_id).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.total, 1);
}

#[tokio::test]
async fn aggregate_is_formula_normalized() {
    let spool = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::with_reply("$√16$ and $π$");
    let service = ConversionService::with_backend(test_config(&spool), backend).unwrap();

    let job_id = service
        .submit(sample_pdf(2), "test-key", PromptKind::PlainText)
        .await
        .unwrap();

    let snap = wait_terminal(&service, job_id).await;
    assert_eq!(snap.result.as_deref(), Some("$\\sqrt{16}$ and $\\pi$"));
}

// ── Partial failure ──────────────────────────────────────────────────────────

#[tokio::test]
async fn rate_limited_chunk_degrades_to_placeholder_in_position() {
    let spool = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::rate_limiting_part(2);
    let service = ConversionService::with_backend(test_config(&spool), backend.clone()).unwrap();

    let job_id = service
        .submit(sample_pdf(12), "test-key", PromptKind::PlainText)
        .await
        .unwrap();

    let snap = wait_terminal(&service, job_id).await;

    // Partial failure never fails the job.
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.completed, 3);

    let aggregate = snap.result.unwrap();
    let parts: Vec<&str> = aggregate.split(PART_SEPARATOR).collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "part-1");
    assert!(
        parts[1].starts_with("Error processing part 2:"),
        "placeholder must carry the 1-based ordinal, got: {}",
        parts[1]
    );
    assert_eq!(parts[2], "part-3", "later chunks keep their real text");

    // The failing chunk got the full retry budget; the others one attempt.
    assert_eq!(backend.attempts_for(2), 3);
    assert_eq!(backend.attempts_for(1), 1);
    assert_eq!(backend.attempts_for(3), 1);
}

// ── Progress & polling ───────────────────────────────────────────────────────

#[tokio::test]
async fn poller_observes_monotonic_progress() {
    let spool = tempfile::tempdir().unwrap();
    let backend = SlowBackend::new(Duration::from_millis(25));
    let service = ConversionService::with_backend(test_config(&spool), backend).unwrap();

    let job_id = service
        .submit(sample_pdf(15), "test-key", PromptKind::PlainText)
        .await
        .unwrap();

    let mut last = 0usize;
    loop {
        let snap = service.poll_status(job_id).await.unwrap();
        assert!(
            snap.completed >= last,
            "completed went backwards: {} -> {}",
            last,
            snap.completed
        );
        assert!(snap.completed <= snap.total);
        last = snap.completed;
        if snap.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn unknown_job_id_is_not_found() {
    let spool = tempfile::tempdir().unwrap();
    let service =
        ConversionService::with_backend(test_config(&spool), ScriptedBackend::new()).unwrap();

    let err = service.poll_status(JobId::new()).await.unwrap_err();
    assert!(matches!(err, ConvertError::JobNotFound(_)));

    let err = service.cancel(JobId::new()).await.unwrap_err();
    assert!(matches!(err, ConvertError::JobNotFound(_)));
}

// ── Validation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_input_is_rejected_synchronously() {
    let spool = tempfile::tempdir().unwrap();
    let service =
        ConversionService::with_backend(test_config(&spool), ScriptedBackend::new()).unwrap();

    let err = service
        .submit(Vec::new(), "test-key", PromptKind::PlainText)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::EmptyInput));
    assert!(service.store().is_empty().await, "no job may be registered");
}

#[tokio::test]
async fn unsupported_bytes_are_rejected() {
    let spool = tempfile::tempdir().unwrap();
    let service =
        ConversionService::with_backend(test_config(&spool), ScriptedBackend::new()).unwrap();

    let err = service
        .submit(b"plain text, not a document".to_vec(), "k", PromptKind::PlainText)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::UnsupportedType { .. }));
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let spool = tempfile::tempdir().unwrap();
    let config = ServiceConfig::builder()
        .max_upload_bytes(64)
        .spool_dir(spool.path())
        .build()
        .unwrap();
    let service = ConversionService::with_backend(config, ScriptedBackend::new()).unwrap();

    let err = service
        .submit(sample_pdf(1), "k", PromptKind::PlainText)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::TooLarge { limit: 64, .. }));
}

#[tokio::test]
async fn page_cap_is_enforced() {
    let spool = tempfile::tempdir().unwrap();
    let config = ServiceConfig::builder()
        .max_pages(5)
        .spool_dir(spool.path())
        .build()
        .unwrap();
    let service = ConversionService::with_backend(config, ScriptedBackend::new()).unwrap();

    let err = service
        .submit(sample_pdf(8), "k", PromptKind::PlainText)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConvertError::TooManyPages { pages: 8, limit: 5 }
    ));
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_job_finalizes_as_error_and_releases_spool() {
    let spool = tempfile::tempdir().unwrap();
    // Long back-off: without cancellation this job would sit in retry
    // sleep for minutes.
    let config = ServiceConfig::builder()
        .retry_delay(Duration::from_secs(300))
        .spool_dir(spool.path())
        .build()
        .unwrap();
    let backend = Arc::new(StonewallBackend {
        calls: AtomicUsize::new(0),
    });
    let service = ConversionService::with_backend(config, backend.clone()).unwrap();

    let job_id = service
        .submit(sample_pdf(2), "test-key", PromptKind::PlainText)
        .await
        .unwrap();

    // Let the first attempt land, then abandon the job mid-back-off.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while backend.calls.load(Ordering::SeqCst) == 0 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    service.cancel(job_id).await.unwrap();

    let snap = wait_terminal(&service, job_id).await;
    assert_eq!(snap.status, JobStatus::Error);
    assert!(
        snap.error_detail.as_deref().unwrap_or("").contains("cancel"),
        "detail: {:?}",
        snap.error_detail
    );

    // The job's spool directory is swept on exit.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let leftovers = std::fs::read_dir(spool.path()).unwrap().count();
        if leftovers == 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "spool not released: {leftovers} entries remain"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Worker pool ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn worker_pool_bounds_concurrent_jobs() {
    let spool = tempfile::tempdir().unwrap();
    let config = ServiceConfig::builder()
        .workers(1)
        .spool_dir(spool.path())
        .build()
        .unwrap();
    let backend = SlowBackend::new(Duration::from_millis(30));
    let service = ConversionService::with_backend(config, backend.clone()).unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            service
                .submit(sample_pdf(2), "test-key", PromptKind::PlainText)
                .await
                .unwrap(),
        );
    }

    for id in ids {
        let snap = wait_terminal(&service, id).await;
        assert_eq!(snap.status, JobStatus::Completed);
    }
    assert_eq!(
        backend.peak.load(Ordering::SeqCst),
        1,
        "a single worker must never run two jobs at once"
    );
}

// ── Cleanup collaborator ─────────────────────────────────────────────────────

#[tokio::test]
async fn removed_job_polls_as_not_found() {
    let spool = tempfile::tempdir().unwrap();
    let service =
        ConversionService::with_backend(test_config(&spool), ScriptedBackend::new()).unwrap();

    let job_id = service
        .submit(sample_pdf(1), "test-key", PromptKind::PlainText)
        .await
        .unwrap();
    wait_terminal(&service, job_id).await;

    assert!(service.remove_job(job_id).await);
    let err = service.poll_status(job_id).await.unwrap_err();
    assert!(matches!(err, ConvertError::JobNotFound(_)));
}
