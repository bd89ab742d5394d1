//! CLI binary for pconvert.
//!
//! A thin shim over the library crate: submits one document to a local
//! [`ConversionService`], polls it like a web client would, and prints or
//! writes the transcribed text.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pconvert::{
    ConversionService, DocxExporter, JobStatus, PromptKind, ServiceConfig,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

/// Transcribe a PDF or image through a generative-AI OCR service.
#[derive(Parser, Debug)]
#[command(name = "pconvert", version, about)]
struct Cli {
    /// Input document (.pdf, .jpg, .jpeg, .png)
    input: PathBuf,

    /// API credential for the transcription service
    #[arg(long, env = "PCONVERT_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Prompt template: plain_text or structured_exercise
    #[arg(long, default_value = "plain_text")]
    prompt: String,

    /// Write the transcribed text here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Additionally export a Word document to this path
    #[arg(long)]
    docx: Option<PathBuf>,

    /// Pages per chunk when splitting large PDFs
    #[arg(long, default_value_t = 5)]
    chunk_size: usize,

    /// Seconds to wait between retries after a rate-limit error
    #[arg(long, default_value_t = 60)]
    retry_delay: u64,

    /// HTTP endpoint returning the current model name as plain text
    #[arg(long, env = "PCONVERT_MODEL_ENDPOINT")]
    model_endpoint: Option<String>,

    /// Base URL of the transcription API
    #[arg(long, env = "PCONVERT_API_BASE")]
    api_base: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,

    /// Verbose logging (or set RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("pconvert=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pconvert=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let prompt: PromptKind = cli
        .prompt
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
        .context("--prompt must be plain_text or structured_exercise")?;

    let document = std::fs::read(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;

    let mut builder = ServiceConfig::builder()
        .chunk_size(cli.chunk_size)
        .retry_delay(Duration::from_secs(cli.retry_delay));
    if let Some(endpoint) = &cli.model_endpoint {
        builder = builder.model_endpoint(endpoint.as_str());
    }
    if let Some(base) = &cli.api_base {
        builder = builder.api_base(base.as_str());
    }
    let config = builder.build().context("invalid configuration")?;
    let export_timeout = Duration::from_secs(config.export_timeout_secs);

    let service = ConversionService::new(config).context("failed to build service")?;
    let job_id = service
        .submit(document, cli.api_key.clone(), prompt)
        .await
        .context("submission rejected")?;

    eprintln!("{} job {}", dim("submitted"), job_id);

    // ── Poll until terminal, mirroring a web client ──────────────────────
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.green/238}] {pos}/{len} parts  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(Duration::from_millis(80));

    let snapshot = loop {
        let snap = service.poll_status(job_id).await.context("poll failed")?;
        bar.set_length(snap.total as u64);
        bar.set_position(snap.completed as u64);
        if snap.status.is_terminal() {
            break snap;
        }
        tokio::time::sleep(Duration::from_millis(cli.poll_ms)).await;
    };
    bar.finish_and_clear();

    match snapshot.status {
        JobStatus::Completed => {
            eprintln!(
                "{} {}/{} parts transcribed",
                green("✓"),
                snapshot.completed,
                snapshot.total
            );
        }
        JobStatus::Error => {
            bail!(
                "{} conversion failed: {}",
                red("✗"),
                snapshot.error_detail.unwrap_or_else(|| "unknown error".into())
            );
        }
        _ => unreachable!("poll loop exits only on terminal status"),
    }

    let text = snapshot.result.unwrap_or_default();

    match &cli.output {
        Some(path) => {
            std::fs::write(path, &text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{} wrote {}", green("✓"), path.display());
        }
        None => println!("{text}"),
    }

    if let Some(docx_path) = &cli.docx {
        let exporter = DocxExporter::new(export_timeout);
        let bytes = exporter
            .to_docx(&text)
            .await
            .context("word export failed")?;
        std::fs::write(docx_path, bytes)
            .with_context(|| format!("failed to write {}", docx_path.display()))?;
        eprintln!("{} wrote {}", green("✓"), docx_path.display());
    }

    Ok(())
}
