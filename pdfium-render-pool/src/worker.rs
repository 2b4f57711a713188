//! The per-worker pipeline.
//!
//! A worker owns one open document and a contiguous slice of the job's
//! pages. Rendering runs scheduler, fast path, thread pool and write queue
//! in that order; text extraction runs the text pool. The same code runs in
//! the parent when there is only one worker and in child processes
//! otherwise.

use crate::backend::{BackendDocument, RenderBackend, RenderContext};
use crate::config::RenderJob;
use crate::encode::PageWriter;
use crate::error::{RenderError, Result, EXIT_FAILURE, EXIT_SUCCESS};
use crate::metrics::{JobMetrics, MetricsSnapshot};
use crate::page::{DescriptorCache, PageState, PageStates};
use crate::process_pool::{hardware_concurrency, ThreadCount};
use crate::raster::RasterPool;
use crate::scheduler::{self, Schedule};
use crate::text;
use crate::thread_pool::ThreadPoolRenderer;
use crate::write_queue::AsyncWriteQueue;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, info_span, warn};

/// What a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    RenderPages,
    ExtractText,
}

/// Everything a worker needs, serialized to a file for child processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInvocation {
    pub worker_id: usize,
    pub operation: Operation,
    pub input: PathBuf,
    /// Output directory for rendering, output file for text.
    pub output: PathBuf,
    pub job: RenderJob,
    /// First page (inclusive).
    pub start: usize,
    /// Last page (exclusive).
    pub end: usize,
    pub threads: ThreadCount,
}

impl WorkerInvocation {
    pub fn pages(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read(path)?;
        serde_json::from_slice(&json).map_err(|e| {
            RenderError::invalid("worker invocation", e.to_string(), "worker invocations are written by the dispatcher")
        })
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| std::io::Error::other(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// What a worker reports back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub start: usize,
    pub end: usize,
    pub threads: usize,
    pub written: usize,
    pub extracted: usize,
    pub failed: usize,
    pub failed_pages: Vec<usize>,
    pub metrics: MetricsSnapshot,
}

impl WorkerReport {
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            EXIT_FAILURE
        } else {
            EXIT_SUCCESS
        }
    }

    /// Report for a worker that died without reporting: every page failed.
    pub fn lost(worker_id: usize, pages: std::ops::Range<usize>) -> Self {
        let failed_pages: Vec<usize> = pages.clone().collect();
        Self {
            worker_id,
            start: pages.start,
            end: pages.end,
            failed: failed_pages.len(),
            metrics: MetricsSnapshot {
                pages_total: failed_pages.len(),
                pages_failed: failed_pages.len(),
                ..MetricsSnapshot::default()
            },
            failed_pages,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read(path)?;
        serde_json::from_slice(&json).map_err(|e| std::io::Error::other(e.to_string()).into())
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self).map_err(|e| std::io::Error::other(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Shared state for rendering one worker's pages.
pub struct RenderSession<'c, D> {
    pub ctx: &'c RenderContext<D>,
    pub job: RenderJob,
    pub output_dir: PathBuf,
    pub descriptors: DescriptorCache,
    pub states: Arc<PageStates>,
    pub metrics: Arc<JobMetrics>,
    pub pool: RasterPool,
}

impl<'c, D: BackendDocument> RenderSession<'c, D> {
    pub fn new(
        ctx: &'c RenderContext<D>,
        job: &RenderJob,
        output_dir: &Path,
        pages: std::ops::Range<usize>,
        metrics: Arc<JobMetrics>,
    ) -> Self {
        Self {
            ctx,
            job: job.clone(),
            output_dir: output_dir.to_path_buf(),
            descriptors: DescriptorCache::new(ctx.page_count()),
            states: Arc::new(PageStates::new(pages.start, pages.len())),
            metrics,
            pool: RasterPool::default(),
        }
    }

    pub fn writer(&self) -> PageWriter {
        PageWriter::new(
            self.job.clone(),
            self.output_dir.clone(),
            Arc::clone(&self.states),
            Arc::clone(&self.metrics),
        )
    }

    /// Record an unrecoverable error against one page.
    pub fn fail_page(&self, index: usize, error: &RenderError) {
        warn!(page = index, %error, "Failed to render page");
        if self.states.transition(index, PageState::Failed) {
            self.metrics.record_failed();
        }
    }
}

/// Number of render threads for a schedule.
pub fn resolve_threads(threads: ThreadCount, schedule: &Schedule) -> usize {
    match threads {
        ThreadCount::Fixed(k) => k.max(1),
        ThreadCount::Adaptive => match schedule.ranges.as_slice() {
            [only] => crate::process_pool::adaptive_threads(only.len, hardware_concurrency()),
            _ => 1,
        },
    }
}

/// Render `pages` of an open document into `output_dir`.
pub fn render_pages<D: BackendDocument>(
    ctx: &RenderContext<D>,
    job: &RenderJob,
    output_dir: &Path,
    pages: std::ops::Range<usize>,
    threads: ThreadCount,
    worker_id: usize,
) -> Result<WorkerReport> {
    let metrics = Arc::new(JobMetrics::new(pages.len()));
    let session = RenderSession::new(ctx, job, output_dir, pages.clone(), Arc::clone(&metrics));

    let schedule = scheduler::plan(&session, pages.clone());
    let thread_count = resolve_threads(threads, &schedule);

    if !schedule.ranges.is_empty() {
        let renderer = ThreadPoolRenderer::new(thread_count)?;
        let queue = AsyncWriteQueue::for_render_threads(thread_count)?;
        let writer = session.writer();

        for range in &schedule.ranges {
            scheduler::preload(&session, range);
            renderer.render_range(&session, range, |raster| {
                let writer = writer.clone();
                queue.submit(move || {
                    writer.write(raster);
                });
            });
        }
        // Pending writes hold page buffers; drain before the session goes away.
        queue.wait_all();
    }

    let tally = session.states.tally();
    debug_assert_eq!(tally.unfinished, 0);
    let report = WorkerReport {
        worker_id,
        start: pages.start,
        end: pages.end,
        threads: thread_count,
        written: tally.written,
        extracted: tally.extracted,
        failed: tally.failed,
        failed_pages: session.states.indices_in(PageState::Failed),
        metrics: metrics.snapshot(),
    };
    Ok(report)
}

/// Run an invocation against an already open document.
pub fn run_assignment<D: BackendDocument>(
    ctx: &RenderContext<D>,
    invocation: &WorkerInvocation,
) -> Result<WorkerReport> {
    let span = info_span!("worker", worker_id = invocation.worker_id);
    let _enter = span.enter();
    info!(
        start = invocation.start,
        end = invocation.end,
        operation = ?invocation.operation,
        "Worker started"
    );

    let report = match invocation.operation {
        Operation::RenderPages => render_pages(
            ctx,
            &invocation.job,
            &invocation.output,
            invocation.pages(),
            invocation.threads,
            invocation.worker_id,
        )?,
        Operation::ExtractText => {
            let threads = match invocation.threads {
                ThreadCount::Fixed(k) => k,
                ThreadCount::Adaptive => {
                    crate::process_pool::adaptive_threads(invocation.pages().len(), hardware_concurrency())
                }
            };
            let outcome = text::extract_pages(ctx, invocation.pages(), threads, &invocation.output)?;
            WorkerReport {
                worker_id: invocation.worker_id,
                start: invocation.start,
                end: invocation.end,
                threads,
                written: outcome.extracted,
                failed: outcome.failed_pages.len(),
                failed_pages: outcome.failed_pages,
                metrics: outcome.metrics,
                ..WorkerReport::default()
            }
        }
    };

    info!(
        written = report.written,
        extracted = report.extracted,
        failed = report.failed,
        "Worker finished"
    );
    Ok(report)
}

/// Child-process entry: bind the document and run the invocation.
pub fn run_worker<B: RenderBackend>(backend: &B, invocation: &WorkerInvocation) -> Result<WorkerReport> {
    let document = backend.open_document(&invocation.input)?;
    let ctx = RenderContext::new(document);
    run_assignment(&ctx, invocation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::testing::{fake_jpeg, FakeBackend, FakeDocumentSpec};

    fn invocation(input: PathBuf, output: PathBuf, start: usize, end: usize, threads: ThreadCount) -> WorkerInvocation {
        WorkerInvocation {
            worker_id: 1,
            operation: Operation::RenderPages,
            input,
            output,
            job: RenderJob::builder()
                .dpi(72.0)
                .output_format(OutputFormat::Jpg)
                .build()
                .unwrap(),
            start,
            end,
            threads,
        }
    }

    #[test]
    fn test_worker_renders_its_slice_only() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        let path = backend.register("doc.pdf", FakeDocumentSpec::vector(10).with_jpeg_page(6, 1.0));
        let inv = invocation(path, dir.path().to_path_buf(), 4, 8, ThreadCount::Fixed(3));

        let report = run_worker(&backend, &inv).unwrap();
        assert_eq!((report.written, report.extracted, report.failed), (3, 1, 0));
        assert_eq!(report.exit_code(), EXIT_SUCCESS);

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["page_0004.jpg", "page_0005.jpg", "page_0006.jpg", "page_0007.jpg"]);
        assert_eq!(fs::read(dir.path().join("page_0006.jpg")).unwrap(), fake_jpeg(6));
    }

    #[test]
    fn test_missing_document_is_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation(PathBuf::from("missing.pdf"), dir.path().to_path_buf(), 0, 1, ThreadCount::Adaptive);
        let err = run_worker(&FakeBackend::new(), &inv).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_LOAD_FAILURE);
    }

    #[test]
    fn test_invocation_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("worker-0.json");
        let inv = invocation(PathBuf::from("a.pdf"), PathBuf::from("out"), 0, 5, ThreadCount::Fixed(2));
        inv.store(&file).unwrap();
        assert_eq!(WorkerInvocation::load(&file).unwrap(), inv);
    }

    #[test]
    fn test_lost_worker_fails_every_page() {
        let report = WorkerReport::lost(2, 10..13);
        assert_eq!(report.failed_pages, vec![10, 11, 12]);
        assert_eq!(report.exit_code(), EXIT_FAILURE);
        assert_eq!(report.metrics.pages_failed, 3);
    }
}
