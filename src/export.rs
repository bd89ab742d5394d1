//! Word-processor export via an external pandoc-equivalent converter.
//!
//! The converter is an opaque external tool: we hand it a Markdown file,
//! it hands us a `.docx`. The only contracts this module owns are the
//! bounded invocation time, the error taxonomy
//! ([`ConvertError::ExternalTool`] / [`ConvertError::ExternalToolTimeout`]),
//! and temp-file hygiene on every exit path (both temp files are
//! `tempfile`-managed, so they are removed on success, failure, and panic
//! alike).

use crate::error::ConvertError;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Invokes the external converter with a bounded time budget.
pub struct DocxExporter {
    program: PathBuf,
    timeout: Duration,
}

impl Default for DocxExporter {
    fn default() -> Self {
        Self {
            program: PathBuf::from("pandoc"),
            timeout: Duration::from_secs(60),
        }
    }
}

impl DocxExporter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Override the converter binary (tests, non-PATH installs).
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Convert normalized transcription text into `.docx` bytes.
    ///
    /// Single newlines are expanded to blank lines first so that each
    /// transcribed line becomes its own paragraph in the Markdown reading.
    pub async fn to_docx(&self, text: &str) -> Result<Vec<u8>, ConvertError> {
        let expanded = expand_paragraphs(text);

        let mut md_file = tempfile::Builder::new()
            .suffix(".md")
            .tempfile()
            .map_err(|e| ConvertError::ExternalTool {
                detail: format!("failed to create temp markdown file: {e}"),
            })?;
        md_file
            .write_all(expanded.as_bytes())
            .map_err(|e| ConvertError::ExternalTool {
                detail: format!("failed to write temp markdown file: {e}"),
            })?;
        md_file.flush().map_err(|e| ConvertError::ExternalTool {
            detail: format!("failed to flush temp markdown file: {e}"),
        })?;

        let docx_path = tempfile::Builder::new()
            .suffix(".docx")
            .tempfile()
            .map_err(|e| ConvertError::ExternalTool {
                detail: format!("failed to create temp docx file: {e}"),
            })?
            .into_temp_path();

        debug!(program = %self.program.display(), "Invoking document converter");

        let mut child = Command::new(&self.program)
            .arg(md_file.path())
            .arg("-o")
            .arg(docx_path.as_os_str())
            .args(["--from", "markdown", "--to", "docx", "--mathml"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ConvertError::ExternalTool {
                detail: format!("failed to launch '{}': {e}", self.program.display()),
            })?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(waited) => waited.map_err(|e| ConvertError::ExternalTool {
                detail: format!("converter did not run: {e}"),
            })?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out converter");
                }
                return Err(ConvertError::ExternalToolTimeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            return Err(ConvertError::ExternalTool {
                detail: format!(
                    "converter exited with {}: {}",
                    status,
                    stderr.trim()
                ),
            });
        }

        tokio::fs::read(&docx_path)
            .await
            .map_err(|e| ConvertError::ExternalTool {
                detail: format!("converter produced no readable output: {e}"),
            })
    }
}

/// `\n` → `\n\n`, so every transcribed line is a Markdown paragraph.
fn expand_paragraphs(text: &str) -> String {
    text.replace('\n', "\n\n")
}
