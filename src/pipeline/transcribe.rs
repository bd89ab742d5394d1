//! Remote transcription client: one chunk in, raw transcribed text out.
//!
//! The external service is an opaque generative-AI endpoint; this module is
//! intentionally thin. It builds the request payload (document bytes as
//! base64 `inline_data` plus the prompt template), issues exactly one call,
//! and classifies failures into the three categories the orchestrator's
//! retry policy distinguishes: rate-limited, transient, fatal. The retry
//! loop itself lives in [`crate::service`] — this module never sleeps.
//!
//! [`TranscriptionBackend`] is the seam for tests and alternative
//! providers; [`GeminiBackend`] is the production implementation.

use crate::config::ServiceConfig;
use crate::error::TranscribeError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed decoding parameters for the transcription call.
///
/// Near-zero temperature with tight nucleus/top-k bounds keeps the model
/// transcribing instead of composing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl From<&ServiceConfig> for GenerationParams {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

/// Everything needed for one transcription call.
#[derive(Clone)]
pub struct TranscribeRequest {
    /// The standalone chunk document.
    pub document: Vec<u8>,
    /// `application/pdf`, `image/jpeg`, or `image/png`.
    pub mime_type: String,
    /// Full prompt template text.
    pub prompt: String,
    /// Resolved model identifier.
    pub model: String,
    /// Caller-supplied API credential; redacted from `Debug`.
    pub credential: String,
    pub params: GenerationParams,
}

impl fmt::Debug for TranscribeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscribeRequest")
            .field("document_len", &self.document.len())
            .field("mime_type", &self.mime_type)
            .field("model", &self.model)
            .field("credential", &"<redacted>")
            .field("params", &self.params)
            .finish()
    }
}

/// A transcription provider for a single chunk.
///
/// Implementations must not retry internally; error classification is their
/// whole contract. The orchestrator owns the retry schedule.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    async fn transcribe(&self, request: TranscribeRequest) -> Result<String, TranscribeError>;
}

// ── Gemini-style HTTP backend ────────────────────────────────────────────

/// Production backend calling a Gemini-style `generateContent` endpoint.
pub struct GeminiBackend {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl GeminiBackend {
    pub fn new(config: &ServiceConfig) -> Result<Self, crate::error::ConvertError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| crate::error::ConvertError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.api_timeout_secs),
        })
    }
}

#[async_trait]
impl TranscriptionBackend for GeminiBackend {
    async fn transcribe(&self, request: TranscribeRequest) -> Result<String, TranscribeError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, request.model
        );
        let body = request_body(&request);

        debug!(
            model = %request.model,
            mime = %request.mime_type,
            bytes = request.document.len(),
            "Issuing transcription call"
        );

        let response = self
            .http
            .post(&url)
            .query(&[("key", request.credential.as_str())])
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, &body, retry_after));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            TranscribeError::Fatal {
                detail: format!("malformed response: {e}"),
            }
        })?;

        extract_text(parsed)
    }
}

/// Build the JSON payload: the chunk as inline base64 plus the prompt.
fn request_body(request: &TranscribeRequest) -> serde_json::Value {
    json!({
        "contents": [{
            "parts": [
                {
                    "inline_data": {
                        "mime_type": request.mime_type,
                        "data": STANDARD.encode(&request.document),
                    }
                },
                { "text": request.prompt },
            ]
        }],
        "generationConfig": {
            "temperature": request.params.temperature,
            "topP": request.params.top_p,
            "topK": request.params.top_k,
            "maxOutputTokens": request.params.max_output_tokens,
        }
    })
}

/// Map a failed HTTP status onto the retry taxonomy.
///
/// 429 is the service's rate-limit marker; 5xx is assumed to be a passing
/// backend condition; remaining 4xx (bad credential, unsupported payload)
/// will not improve on retry.
fn classify_http_failure(
    status: StatusCode,
    body: &str,
    retry_after_secs: Option<u64>,
) -> TranscribeError {
    let detail = format!("HTTP {}: {}", status.as_u16(), snippet(body));
    if status == StatusCode::TOO_MANY_REQUESTS {
        TranscribeError::RateLimited { retry_after_secs }
    } else if status.is_server_error() {
        TranscribeError::Transient { detail }
    } else {
        TranscribeError::Fatal { detail }
    }
}

/// Network-level failures (timeout, refused connection, reset) are
/// retryable; the request may succeed on the next attempt.
fn classify_send_error(e: reqwest::Error) -> TranscribeError {
    TranscribeError::Transient {
        detail: if e.is_timeout() {
            "request timed out".to_string()
        } else {
            e.to_string()
        },
    }
}

fn snippet(body: &str) -> String {
    body.trim().chars().take(200).collect()
}

// ── Response shape ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

/// Join the text parts of the first candidate.
fn extract_text(response: GenerateContentResponse) -> Result<String, TranscribeError> {
    if let Some(candidate) = response.candidates.into_iter().next() {
        let text: String = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if !text.is_empty() {
            return Ok(text);
        }
    }

    let reason = response
        .prompt_feedback
        .and_then(|f| f.block_reason)
        .unwrap_or_else(|| "no candidates returned".to_string());
    warn!(reason = %reason, "Transcription response carried no text");
    Err(TranscribeError::Fatal {
        detail: format!("empty response: {reason}"),
    })
}

// ── Model resolution ─────────────────────────────────────────────────────

/// Resolves the model identifier from a lookup endpoint, falling back to a
/// hardcoded default on any failure. Resolution never fails the job.
pub struct ModelResolver {
    http: reqwest::Client,
    endpoint: Option<String>,
    fallback: String,
    timeout: Duration,
}

impl ModelResolver {
    pub fn new(config: &ServiceConfig) -> Result<Self, crate::error::ConvertError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| crate::error::ConvertError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            http,
            endpoint: config.model_endpoint.clone(),
            fallback: config.default_model.clone(),
            timeout: Duration::from_secs(config.lookup_timeout_secs),
        })
    }

    /// The current model name, or the fallback when the endpoint is unset,
    /// unreachable, non-200, or returns an empty body.
    pub async fn resolve(&self) -> String {
        let Some(ref endpoint) = self.endpoint else {
            return self.fallback.clone();
        };

        match self
            .http
            .get(endpoint)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                match response.text().await {
                    Ok(body) => {
                        let name = body.trim();
                        if name.is_empty() {
                            warn!("Model lookup returned empty body, using fallback");
                            self.fallback.clone()
                        } else {
                            debug!(model = %name, "Resolved model name");
                            name.to_string()
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Model lookup body unreadable, using fallback");
                        self.fallback.clone()
                    }
                }
            }
            Ok(response) => {
                warn!(status = %response.status(), "Model lookup failed, using fallback");
                self.fallback.clone()
            }
            Err(e) => {
                warn!(error = %e, "Model lookup unreachable, using fallback");
                self.fallback.clone()
            }
        }
    }
}
