//! Text extraction to UTF-32LE.
//!
//! Output layout: every page is a BOM (`FF FE 00 00`) followed by the page's
//! characters as little-endian code points. A file with no pages holds just
//! the BOM. Worker chunk files use the same layout, so merging is plain
//! concatenation in page order.

use crate::backend::{BackendDocument, BackendPage, RenderContext};
use crate::error::{RenderError, Result};
use crate::metrics::{JobMetrics, MetricsSnapshot};
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const UTF32LE_BOM: [u8; 4] = [0xFF, 0xFE, 0x00, 0x00];

/// Result of extracting a range of pages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextOutcome {
    pub extracted: usize,
    pub failed_pages: Vec<usize>,
    pub metrics: MetricsSnapshot,
}

/// One page's bytes: BOM then UTF-32LE code points.
pub fn encode_page(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + text.len() * 4);
    out.extend_from_slice(&UTF32LE_BOM);
    for c in text.chars() {
        out.extend_from_slice(&(c as u32).to_le_bytes());
    }
    out
}

fn write_failure(path: &Path) -> impl FnOnce(io::Error) -> RenderError + '_ {
    move |source| RenderError::WriteFailure {
        path: path.to_path_buf(),
        source,
    }
}

/// Extract `pages` with `threads` threads and write them to `output`.
///
/// A page whose text cannot be read contributes a bare BOM and is reported
/// in `failed_pages`.
pub fn extract_pages<D: BackendDocument>(
    ctx: &RenderContext<D>,
    pages: std::ops::Range<usize>,
    threads: usize,
    output: &Path,
) -> Result<TextOutcome> {
    let metrics = JobMetrics::new(pages.len());
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("text-{i}"))
        .build()
        .map_err(|e| RenderError::WorkerSpawnFailure {
            worker_id: 0,
            source: io::Error::other(e.to_string()),
        })?;

    // Open and close every page once, in order, before the threads share the document.
    let preloaded: Vec<Result<()>> = pages.clone().map(|index| ctx.with_page(index, |_| Ok(()))).collect();

    let texts: Vec<(usize, Result<String>)> = pool.install(|| {
        pages
            .clone()
            .into_par_iter()
            .zip(preloaded.into_par_iter())
            .map(|(index, loaded)| (index, loaded.and_then(|()| ctx.with_page(index, |page| page.text()))))
            .collect()
    });

    // Written aside and renamed into place, so `output` only ever holds a complete file.
    let staged = staging_path(output);
    let file = File::create(&staged).map_err(write_failure(&staged))?;
    let mut writer = BufWriter::new(file);
    let mut outcome = TextOutcome::default();
    if pages.is_empty() {
        writer.write_all(&UTF32LE_BOM).map_err(write_failure(&staged))?;
    }
    for (index, text) in texts {
        let bytes = match text {
            Ok(text) => {
                outcome.extracted += 1;
                let bytes = encode_page(&text);
                metrics.record_written(bytes.len());
                bytes
            }
            Err(error) => {
                warn!(page = index, %error, "Failed to extract text");
                outcome.failed_pages.push(index);
                metrics.record_failed();
                UTF32LE_BOM.to_vec()
            }
        };
        writer.write_all(&bytes).map_err(write_failure(&staged))?;
    }
    writer.flush().map_err(write_failure(&staged))?;
    drop(writer);
    fs::rename(&staged, output).map_err(write_failure(output))?;

    outcome.metrics = metrics.snapshot();
    info!(
        pages = pages.len(),
        failed = outcome.failed_pages.len(),
        threads,
        "Extracted text"
    );
    Ok(outcome)
}

fn staging_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// One worker's text file and the pages it was asked to extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub path: PathBuf,
    pub pages: std::ops::Range<usize>,
}

/// Concatenate worker chunk files, in page order, into `output`.
///
/// A chunk whose worker never produced its file stands in as one bare BOM
/// per page, the same bytes a failed page gets.
pub fn merge_chunks(chunks: &[TextChunk], output: &Path) -> Result<()> {
    let file = File::create(output).map_err(write_failure(output))?;
    let mut writer = BufWriter::new(file);
    if chunks.is_empty() {
        writer.write_all(&UTF32LE_BOM).map_err(write_failure(output))?;
    }
    for chunk in chunks {
        match File::open(&chunk.path) {
            Ok(mut reader) => {
                io::copy(&mut reader, &mut writer).map_err(write_failure(output))?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    chunk = %chunk.path.display(),
                    start = chunk.pages.start,
                    end = chunk.pages.end,
                    "Text chunk missing, writing its pages as empty"
                );
                for _ in chunk.pages.clone() {
                    writer.write_all(&UTF32LE_BOM).map_err(write_failure(output))?;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    writer.flush().map_err(write_failure(output))?;
    Ok(())
}
