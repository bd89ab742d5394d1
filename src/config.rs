//! Configuration for the conversion service.
//!
//! All behaviour is controlled through [`ServiceConfig`], built via its
//! [`ServiceConfigBuilder`]. The service is constructed once at process start
//! from one of these and passed by reference to request handlers — there is
//! no ambient global state (no module-level API session, no implicit
//! executor), so two services with different configs can coexist in one
//! process and tests can spin up throwaway instances freely.

use crate::error::ConvertError;
use std::path::PathBuf;
use std::time::Duration;

/// The public Gemini-style API base used when none is configured.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used when the lookup endpoint is unreachable or unset.
pub const DEFAULT_MODEL: &str = "gemini-exp-1206";

/// Configuration for a [`ConversionService`](crate::service::ConversionService).
///
/// Built via [`ServiceConfig::builder()`] or [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use pconvert::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .chunk_size(5)
///     .workers(3)
///     .max_attempts(3)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Pages per chunk when splitting a large PDF. Default: 5.
    ///
    /// Deployment profiles trade chunk size against per-call payload size
    /// and retry cost: a failed 20-page chunk re-uploads 20 pages, a failed
    /// 5-page chunk re-uploads 5. Documents at or under this size skip the
    /// splitter entirely and run as a single chunk.
    pub chunk_size: usize,

    /// Concurrent job executions. Default: 3.
    ///
    /// Bounds the background worker pool so one batch of large uploads
    /// cannot starve the submission path. Within one job, chunks are always
    /// processed sequentially.
    pub workers: usize,

    /// Attempts per chunk before degrading to a placeholder. Default: 3.
    pub max_attempts: u32,

    /// Delay between attempts after a rate-limit or transient error.
    /// Default: 60 s, matching the external service's observed recovery time.
    pub retry_delay: Duration,

    /// Sampling temperature for the transcription call. Default: 0.1.
    ///
    /// Near-deterministic decoding keeps the model faithful to what is on
    /// the page, which is what transcription needs.
    pub temperature: f32,

    /// Nucleus sampling bound. Default: 0.95.
    pub top_p: f32,

    /// Top-k sampling bound. Default: 40.
    pub top_k: u32,

    /// Maximum tokens the model may generate per chunk. Default: 32768.
    pub max_output_tokens: u32,

    /// Model name used when the lookup endpoint fails. Default:
    /// [`DEFAULT_MODEL`].
    pub default_model: String,

    /// Optional HTTP endpoint returning the current model name as plain
    /// text. Resolved once per job; any failure falls back to
    /// `default_model`.
    pub model_endpoint: Option<String>,

    /// Base URL of the transcription API. Default: [`DEFAULT_API_BASE`].
    pub api_base: String,

    /// Per-transcription-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Timeout for the model-name lookup in seconds. Default: 10.
    pub lookup_timeout_secs: u64,

    /// Upload size cap in bytes. Default: 16 MiB.
    pub max_upload_bytes: u64,

    /// PDF page-count cap. Default: 500.
    pub max_pages: usize,

    /// Directory under which per-job spool directories are created.
    /// Defaults to the system temp directory.
    pub spool_dir: Option<PathBuf>,

    /// Time budget for the external word-processor converter. Default: 60 s.
    pub export_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            workers: 3,
            max_attempts: 3,
            retry_delay: Duration::from_secs(60),
            temperature: 0.1,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 32_768,
            default_model: DEFAULT_MODEL.to_string(),
            model_endpoint: None,
            api_base: DEFAULT_API_BASE.to_string(),
            api_timeout_secs: 120,
            lookup_timeout_secs: 10,
            max_upload_bytes: 16 * 1024 * 1024,
            max_pages: 500,
            spool_dir: None,
            export_timeout_secs: 60,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Root directory for per-job spool directories.
    pub fn spool_root(&self) -> PathBuf {
        self.spool_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn chunk_size(mut self, pages: usize) -> Self {
        self.config.chunk_size = pages.max(1);
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.config.top_p = p.clamp(0.0, 1.0);
        self
    }

    pub fn top_k(mut self, k: u32) -> Self {
        self.config.top_k = k;
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.config.default_model = model.into();
        self
    }

    pub fn model_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.model_endpoint = Some(url.into());
        self
    }

    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.config.api_base = url.into();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn lookup_timeout_secs(mut self, secs: u64) -> Self {
        self.config.lookup_timeout_secs = secs;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn max_pages(mut self, pages: usize) -> Self {
        self.config.max_pages = pages.max(1);
        self
    }

    pub fn spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.spool_dir = Some(dir.into());
        self
    }

    pub fn export_timeout_secs(mut self, secs: u64) -> Self {
        self.config.export_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ConvertError> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(ConvertError::InvalidConfig(
                "chunk_size must be ≥ 1".into(),
            ));
        }
        if c.workers == 0 {
            return Err(ConvertError::InvalidConfig("workers must be ≥ 1".into()));
        }
        if c.max_attempts == 0 {
            return Err(ConvertError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.api_base.is_empty() {
            return Err(ConvertError::InvalidConfig("api_base must be set".into()));
        }
        Ok(self.config)
    }
}
