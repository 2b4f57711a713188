//! Top-level job entry.

use crate::backend::{BackendDocument, RenderBackend, RenderContext};
use crate::config::{PageSelection, Parallelism, RenderJob};
use crate::error::{RenderError, Result, EXIT_FAILURE, EXIT_SUCCESS};
use crate::metrics::MetricsSnapshot;
use crate::process_pool::{assign, hardware_concurrency, ParallelPlan, ProcessPoolDispatcher, WorkerAssignment, WorkerLauncher};
use crate::text::{self, TextChunk};
use crate::worker::{run_assignment, Operation, WorkerInvocation, WorkerReport};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// One document, one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub operation: Operation,
    pub input: PathBuf,
    /// Directory for rendered pages, file for extracted text.
    pub output: PathBuf,
    pub job: RenderJob,
    pub pages: Option<PageSelection>,
    pub parallelism: Parallelism,
}

/// Outcome of a finished job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub operation: Operation,
    pub input: PathBuf,
    pub pages_selected: usize,
    pub workers: usize,
    pub threads: usize,
    pub written: usize,
    pub extracted: usize,
    pub failed: usize,
    pub failed_pages: Vec<usize>,
    pub metrics: MetricsSnapshot,
}

impl JobSummary {
    fn from_reports(request: &JobRequest, pages_selected: usize, reports: &[WorkerReport], started: Instant) -> Self {
        let mut metrics = MetricsSnapshot::default();
        let mut failed_pages = Vec::new();
        for report in reports {
            metrics.absorb(&report.metrics);
            failed_pages.extend_from_slice(&report.failed_pages);
        }
        failed_pages.sort_unstable();
        metrics.finish(started.elapsed());

        Self {
            operation: request.operation,
            input: request.input.clone(),
            pages_selected,
            workers: reports.len().max(1),
            threads: reports.iter().map(|r| r.threads).max().unwrap_or(1),
            written: reports.iter().map(|r| r.written).sum(),
            extracted: reports.iter().map(|r| r.extracted).sum(),
            failed: reports.iter().map(|r| r.failed).sum(),
            failed_pages,
            metrics,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        }
    }
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.operation {
            Operation::RenderPages => "Rendered",
            Operation::ExtractText => "Extracted text from",
        };
        write!(
            f,
            "{verb} {} pages in {:.2} seconds ({} written, {} extracted, {} failed; {:.1} pages/s, peak memory {:.1} MB, {} workers x {} threads)",
            self.pages_selected,
            self.metrics.elapsed_secs,
            self.written,
            self.extracted,
            self.failed,
            self.metrics.pages_per_second,
            self.metrics.peak_memory_bytes as f64 / (1024.0 * 1024.0),
            self.workers,
            self.threads,
        )
    }
}

fn prepare_output(request: &JobRequest) -> Result<()> {
    let dir = match request.operation {
        Operation::RenderPages => Some(request.output.as_path()),
        Operation::ExtractText => request.output.parent().filter(|p| !p.as_os_str().is_empty()),
    };
    if let Some(dir) = dir {
        fs::create_dir_all(dir).map_err(|source| RenderError::OutputDirectoryFailure {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn invocation_for(request: &JobRequest, assignment: &WorkerAssignment, output: &Path) -> WorkerInvocation {
    WorkerInvocation {
        worker_id: assignment.worker_id,
        operation: request.operation,
        input: request.input.clone(),
        output: output.to_path_buf(),
        job: request.job.clone(),
        start: assignment.page_range.start,
        end: assignment.page_range.end,
        threads: assignment.thread_count,
    }
}

/// Run a job end to end.
///
/// Structural problems (unreadable document, bad page range, output
/// directory, worker spawn) return `Err`. Per-page failures are counted in
/// the summary; its `exit_code` is 1 if any page failed.
pub fn run_job<B: RenderBackend>(backend: &B, request: &JobRequest, launcher: &dyn WorkerLauncher) -> Result<JobSummary> {
    let started = Instant::now();
    request.parallelism.validate()?;

    let document = backend.open_document(&request.input)?;
    let page_count = document.page_count();
    let pages = match request.pages {
        Some(selection) => selection.resolve(page_count)?,
        None => 0..page_count,
    };
    prepare_output(request)?;

    let plan = ParallelPlan::resolve(request.parallelism, hardware_concurrency());
    let assignments = assign(pages.clone(), &plan);
    info!(
        input = %request.input.display(),
        pages = pages.len(),
        workers = assignments.len(),
        threads = ?plan.threads,
        dpi = request.job.dpi(),
        "Starting {:?}",
        request.operation
    );

    let reports = if assignments.len() <= 1 {
        let ctx = RenderContext::new(document);
        match assignments.first() {
            Some(assignment) => vec![run_assignment(&ctx, &invocation_for(request, assignment, &request.output))?],
            None => {
                if request.operation == Operation::ExtractText {
                    text::merge_chunks(&[], &request.output)?;
                }
                Vec::new()
            }
        }
    } else {
        // Workers bind their own library instance; the parent's copy is not needed.
        drop(document);
        dispatch(request, &assignments, launcher)?
    };

    let summary = JobSummary::from_reports(request, pages.len(), &reports, started);
    info!("{summary}");
    Ok(summary)
}

fn dispatch(request: &JobRequest, assignments: &[WorkerAssignment], launcher: &dyn WorkerLauncher) -> Result<Vec<WorkerReport>> {
    let dispatcher = ProcessPoolDispatcher::new(launcher);
    match request.operation {
        Operation::RenderPages => {
            dispatcher.dispatch(assignments, |a| invocation_for(request, a, &request.output))
        }
        Operation::ExtractText => {
            let chunk_dir = tempfile::Builder::new().prefix("pdfium-pool-text-").tempdir()?;
            let chunk_path = |worker_id: usize| chunk_dir.path().join(format!("chunk-{worker_id:02}.txt"));
            let reports = dispatcher.dispatch(assignments, |a| invocation_for(request, a, &chunk_path(a.worker_id)))?;
            let chunks: Vec<TextChunk> = assignments
                .iter()
                .map(|a| TextChunk {
                    path: chunk_path(a.worker_id),
                    pages: a.page_range.clone(),
                })
                .collect();
            text::merge_chunks(&chunks, &request.output)?;
            Ok(reports)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::process_pool::SelfExecLauncher;
    use crate::testing::{FakeBackend, FakeDocumentSpec};

    fn request(input: PathBuf, output: PathBuf) -> JobRequest {
        JobRequest {
            operation: Operation::RenderPages,
            input,
            output,
            job: RenderJob::builder().dpi(72.0).output_format(OutputFormat::Raw).build().unwrap(),
            pages: None,
            parallelism: Parallelism::default(),
        }
    }

    fn launcher() -> SelfExecLauncher {
        SelfExecLauncher::new("/nonexistent/pdfium-pool")
    }

    #[test]
    fn test_zero_page_document() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        let input = backend.register("empty.pdf", FakeDocumentSpec::vector(0));
        let out = dir.path().join("pages");

        let summary = run_job(&backend, &request(input, out.clone()), &launcher()).unwrap();
        assert_eq!(summary.exit_code(), EXIT_SUCCESS);
        assert_eq!(summary.pages_selected, 0);
        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn test_selection_past_end_is_rejected_before_output() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        let input = backend.register("doc.pdf", FakeDocumentSpec::vector(3));
        let out = dir.path().join("pages");
        let mut req = request(input, out.clone());
        req.pages = Some(PageSelection::new(1, 3).unwrap());

        let err = run_job(&backend, &req, &launcher()).unwrap_err();
        assert!(matches!(err, RenderError::PageRangeInvalid { .. }));
        assert!(!out.exists());
    }

    #[test]
    fn test_unreadable_document() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        let input = backend.register("bad.pdf", FakeDocumentSpec::unreadable());
        let err = run_job(&backend, &request(input, dir.path().join("o")), &launcher()).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_LOAD_FAILURE);
    }

    /// Runs each worker in-process, except `lost`, which exits without a report or output.
    #[cfg(unix)]
    struct LosesOneWorker {
        backend: FakeBackend,
        lost: usize,
    }

    #[cfg(unix)]
    impl WorkerLauncher for LosesOneWorker {
        fn launch(&self, worker_id: usize, invocation: &Path, report: &Path) -> std::io::Result<std::process::Child> {
            let code = if worker_id == self.lost {
                101
            } else {
                let invocation = WorkerInvocation::load(invocation).map_err(std::io::Error::other)?;
                let outcome = crate::worker::run_worker(&self.backend, &invocation).map_err(std::io::Error::other)?;
                outcome.store(report).map_err(std::io::Error::other)?;
                outcome.exit_code()
            };
            std::process::Command::new("sh").arg("-c").arg(format!("exit {code}")).spawn()
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_lost_text_worker_keeps_surviving_text() {
        use crate::process_pool::{chunk_pages, ThreadCount};
        use crate::testing::fake_page_text;
        use crate::text::{encode_page, UTF32LE_BOM};

        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        let input = backend.register("doc.pdf", FakeDocumentSpec::vector(6));
        let mut req = request(input, dir.path().join("doc.txt"));
        req.operation = Operation::ExtractText;
        let assignments: Vec<WorkerAssignment> = chunk_pages(0..6, 3)
            .into_iter()
            .enumerate()
            .map(|(worker_id, page_range)| WorkerAssignment {
                worker_id,
                page_range,
                thread_count: ThreadCount::Fixed(1),
            })
            .collect();
        let launcher = LosesOneWorker { backend, lost: 1 };

        let reports = dispatch(&req, &assignments, &launcher).unwrap();
        assert_eq!(reports[1].failed_pages, vec![2, 3]);

        let mut expected = Vec::new();
        for index in [0, 1] {
            expected.extend(encode_page(&fake_page_text(index)));
        }
        expected.extend_from_slice(&UTF32LE_BOM);
        expected.extend_from_slice(&UTF32LE_BOM);
        for index in [4, 5] {
            expected.extend(encode_page(&fake_page_text(index)));
        }
        assert_eq!(fs::read(&req.output).unwrap(), expected);

        let summary = JobSummary::from_reports(&req, 6, &reports, Instant::now());
        assert_eq!((summary.extracted + summary.written, summary.failed), (4, 2));
        assert_eq!(summary.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_summary_line() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new();
        let input = backend.register("doc.pdf", FakeDocumentSpec::vector(4).with_broken_page(3));
        let mut req = request(input, dir.path().join("o"));
        req.pages = Some(PageSelection::new(1, 3).unwrap());

        let summary = run_job(&backend, &req, &launcher()).unwrap();
        assert_eq!(summary.pages_selected, 3);
        assert_eq!((summary.written, summary.failed), (2, 1));
        assert_eq!(summary.failed_pages, vec![3]);
        assert_eq!(summary.exit_code(), EXIT_FAILURE);
        assert!(summary.to_string().starts_with("Rendered 3 pages in "));
    }
}
