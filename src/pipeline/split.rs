//! Chunk splitting: one large PDF → bounded page-range sub-documents.
//!
//! Planning and materialization are separate steps. [`plan_chunks`] is a
//! pure function over `(total_pages, chunk_size)` so the partition contract
//! is testable without touching a PDF; [`split_pdf`] then extracts each
//! planned range into a standalone PDF file in the job's spool directory so
//! every chunk can be uploaded to the transcription service independently.
//!
//! ## Rollback contract
//!
//! If materialization fails partway through, every chunk file already
//! written is removed before the error propagates. The spool directory
//! never holds an orphaned partial split.
//!
//! `lopdf` is CPU-bound and synchronous; callers on the async path wrap
//! these functions in `spawn_blocking`.

use crate::error::ConvertError;
use lopdf::Document;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A planned page range `[start, end)`, 0-based, before materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// 0-based ordinal; defines reassembly order.
    pub index: usize,
    /// First page of the range, 0-based, inclusive.
    pub start: usize,
    /// One past the last page of the range.
    pub end: usize,
}

impl ChunkPlan {
    pub fn page_count(&self) -> usize {
        self.end - self.start
    }
}

/// A materialized chunk: a standalone document in the spool directory.
#[derive(Debug, Clone)]
pub struct ChunkFile {
    /// 0-based ordinal; defines reassembly order.
    pub index: usize,
    /// Path of the standalone document. Deleted by the orchestrator
    /// immediately after the chunk is consumed.
    pub path: PathBuf,
    /// Pages in this chunk.
    pub pages: usize,
}

/// Partition `[0, total_pages)` into ranges of at most `chunk_size` pages.
///
/// Produces `ceil(total_pages / chunk_size)` ranges in ascending order;
/// every page appears in exactly one range. `chunk_size` of zero is treated
/// as one to keep the function total.
pub fn plan_chunks(total_pages: usize, chunk_size: usize) -> Vec<ChunkPlan> {
    let chunk_size = chunk_size.max(1);
    let count = total_pages.div_ceil(chunk_size);
    (0..count)
        .map(|i| ChunkPlan {
            index: i,
            start: i * chunk_size,
            end: ((i + 1) * chunk_size).min(total_pages),
        })
        .collect()
}

/// Number of pages in a PDF given as raw bytes.
pub fn page_count(bytes: &[u8]) -> Result<usize, ConvertError> {
    let doc = Document::load_mem(bytes).map_err(|e| ConvertError::PdfParse {
        detail: e.to_string(),
    })?;
    Ok(doc.get_pages().len())
}

/// Materialize every planned range as a standalone PDF under `spool`.
///
/// Files are named `part1.pdf`, `part2.pdf`, … in ordinal order. On any
/// failure, already-written files are removed and the error propagates;
/// the caller sees either the complete set of chunks or none.
pub fn split_pdf(
    bytes: &[u8],
    plans: &[ChunkPlan],
    spool: &Path,
) -> Result<Vec<ChunkFile>, ConvertError> {
    let doc = Document::load_mem(bytes).map_err(|e| ConvertError::PdfParse {
        detail: e.to_string(),
    })?;
    let total_pages = doc.get_pages().len();

    info!(
        chunks = plans.len(),
        total_pages, "Splitting PDF into page-range chunks"
    );

    let mut written: Vec<ChunkFile> = Vec::with_capacity(plans.len());
    for plan in plans {
        match extract_range(&doc, total_pages, plan, spool) {
            Ok(chunk) => {
                debug!(part = plan.index + 1, pages = chunk.pages, "Chunk written");
                written.push(chunk);
            }
            Err(detail) => {
                discard_chunks(&written);
                return Err(ConvertError::SplitFailed {
                    part: plan.index + 1,
                    detail,
                });
            }
        }
    }

    Ok(written)
}

/// Extract one page range into `spool/part{N}.pdf`.
fn extract_range(
    doc: &Document,
    total_pages: usize,
    plan: &ChunkPlan,
    spool: &Path,
) -> Result<ChunkFile, String> {
    if plan.end > total_pages || plan.start >= plan.end {
        return Err(format!(
            "page range [{}, {}) out of bounds for {} pages",
            plan.start, plan.end, total_pages
        ));
    }

    // Keep pages [start, end) by deleting everything else. lopdf numbers
    // pages from 1.
    let delete: Vec<u32> = (1..=total_pages as u32)
        .filter(|p| {
            let idx = (*p as usize) - 1;
            idx < plan.start || idx >= plan.end
        })
        .collect();

    let mut part = doc.clone();
    part.delete_pages(&delete);
    part.prune_objects();
    part.renumber_objects();
    part.compress();

    let path = spool.join(format!("part{}.pdf", plan.index + 1));
    part.save(&path).map_err(|e| e.to_string())?;

    Ok(ChunkFile {
        index: plan.index,
        path,
        pages: plan.page_count(),
    })
}

/// Remove every chunk file written so far. Failures are logged, not
/// propagated — rollback runs on an error path already.
fn discard_chunks(written: &[ChunkFile]) {
    for chunk in written {
        if let Err(e) = fs::remove_file(&chunk.path) {
            warn!(path = %chunk.path.display(), error = %e, "Failed to remove partial chunk");
        }
    }
}
