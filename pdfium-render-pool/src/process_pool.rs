//! Multi-process dispatch.
//!
//! The page span is cut into N contiguous chunks by ceiling division and each
//! chunk goes to its own worker process with its own PDFium instance. Workers
//! write outputs keyed by global page index, so completion order does not
//! matter. The parent waits for every worker and folds their reports.

use crate::config::Parallelism;
use crate::error::{RenderError, Result, EXIT_LOAD_FAILURE};
use crate::worker::{WorkerInvocation, WorkerReport};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use tracing::{debug, info, warn};

/// Threads used by adaptive mode never exceed this.
pub const MAX_ADAPTIVE_THREADS: usize = 8;
/// Ranges shorter than this render on one thread in adaptive mode.
pub const ADAPTIVE_THREAD_THRESHOLD: usize = 3;

/// Environment variable carrying the log filter to child workers.
pub const LOG_ENV: &str = "RUST_LOG";

pub fn hardware_concurrency() -> usize {
    num_cpus::get().max(1)
}

/// Per-worker thread count, fixed or chosen from the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadCount {
    Fixed(usize),
    Adaptive,
}

/// Threads for a single range of `pages` pages on a host with `hw` cores.
pub fn adaptive_threads(pages: usize, hw: usize) -> usize {
    if pages < ADAPTIVE_THREAD_THRESHOLD {
        1
    } else {
        MAX_ADAPTIVE_THREADS.min(hw).min(pages).max(1)
    }
}

/// Reduce K so that N x K stays within `hw`.
pub fn apply_oversubscription_guard(workers: usize, threads: usize, hw: usize) -> usize {
    let workers = workers.max(1);
    if workers * threads <= hw {
        return threads;
    }
    let reduced = (hw / workers).max(1);
    warn!(
        workers,
        threads,
        hardware_concurrency = hw,
        "{workers} workers x {threads} threads oversubscribes {hw} cores; using {reduced} threads per worker"
    );
    reduced
}

/// Effective process and thread counts for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelPlan {
    pub workers: usize,
    pub threads: ThreadCount,
}

impl ParallelPlan {
    /// Resolve requested counts against the host.
    ///
    /// N defaults to 1 and is capped at `hw`. An explicit K is run through
    /// the oversubscription guard. With one worker and no explicit K, the
    /// worker picks K from its schedule; with several workers it uses 1.
    pub fn resolve(requested: Parallelism, hw: usize) -> Self {
        let hw = hw.max(1);
        let mut workers = requested.workers.unwrap_or(1).max(1);
        if workers > hw {
            warn!(workers, hardware_concurrency = hw, "More workers than cores; capping at {hw}");
            workers = hw;
        }
        let threads = match requested.threads {
            Some(k) => ThreadCount::Fixed(apply_oversubscription_guard(workers, k, hw)),
            None if workers == 1 => ThreadCount::Adaptive,
            None => ThreadCount::Fixed(1),
        };
        Self { workers, threads }
    }
}

/// Split `pages` into at most `workers` contiguous chunks of
/// `ceil(len / workers)` pages. Empty chunks are dropped.
pub fn chunk_pages(pages: std::ops::Range<usize>, workers: usize) -> Vec<std::ops::Range<usize>> {
    let len = pages.len();
    if len == 0 {
        return Vec::new();
    }
    let chunk_size = len.div_ceil(workers.max(1));
    (0..workers.max(1))
        .map(|i| {
            let start = (pages.start + i * chunk_size).min(pages.end);
            let end = (start + chunk_size).min(pages.end);
            start..end
        })
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

/// One worker's share of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAssignment {
    pub worker_id: usize,
    pub page_range: std::ops::Range<usize>,
    pub thread_count: ThreadCount,
}

/// Builds assignments for a plan.
pub fn assign(pages: std::ops::Range<usize>, plan: &ParallelPlan) -> Vec<WorkerAssignment> {
    chunk_pages(pages, plan.workers)
        .into_iter()
        .enumerate()
        .map(|(worker_id, page_range)| WorkerAssignment {
            worker_id,
            page_range,
            thread_count: plan.threads,
        })
        .collect()
}

/// Starts a worker process.
pub trait WorkerLauncher: Send + Sync {
    /// Start a worker that reads its invocation from `invocation` and writes
    /// its report to `report`.
    fn launch(&self, worker_id: usize, invocation: &Path, report: &Path) -> io::Result<Child>;
}

/// Re-executes a binary with its hidden `worker` subcommand.
#[derive(Debug, Clone)]
pub struct SelfExecLauncher {
    program: PathBuf,
    envs: Vec<(OsString, OsString)>,
}

impl SelfExecLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            envs: Vec::new(),
        }
    }

    /// Launcher for the running executable.
    pub fn current_exe() -> io::Result<Self> {
        std::env::current_exe().map(Self::new)
    }

    /// Set an environment variable for every worker.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl WorkerLauncher for SelfExecLauncher {
    fn launch(&self, worker_id: usize, invocation: &Path, report: &Path) -> io::Result<Child> {
        debug!(worker_id, program = %self.program.display(), "Spawning worker");
        Command::new(&self.program)
            .arg("worker")
            .arg("--invocation")
            .arg(invocation)
            .arg("--report")
            .arg(report)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .spawn()
    }
}

/// Spawns one process per assignment and gathers their reports.
pub struct ProcessPoolDispatcher<'l> {
    launcher: &'l dyn WorkerLauncher,
}

struct RunningWorker {
    assignment: WorkerAssignment,
    input: PathBuf,
    report_path: PathBuf,
    child: Child,
}

impl<'l> ProcessPoolDispatcher<'l> {
    pub fn new(launcher: &'l dyn WorkerLauncher) -> Self {
        Self { launcher }
    }

    /// Run every assignment to completion.
    ///
    /// `invocation_for` builds the invocation of one assignment. Returns the
    /// reports in worker order. A worker that exits with the load-failure
    /// code fails the job with `LoadFailure`; a worker that dies without a
    /// report has all of its pages counted as failed.
    pub fn dispatch<F>(&self, assignments: &[WorkerAssignment], invocation_for: F) -> Result<Vec<WorkerReport>>
    where
        F: Fn(&WorkerAssignment) -> WorkerInvocation,
    {
        let scratch = tempfile::Builder::new().prefix("pdfium-pool-").tempdir()?;
        info!(workers = assignments.len(), "Dispatching worker processes");

        let mut running = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let invocation = invocation_for(assignment);
            let invocation_path = scratch.path().join(format!("worker-{}.json", assignment.worker_id));
            let report_path = scratch.path().join(format!("worker-{}-report.json", assignment.worker_id));
            if let Err(e) = invocation.store(&invocation_path) {
                abandon(running);
                return Err(e);
            }

            match self.launcher.launch(assignment.worker_id, &invocation_path, &report_path) {
                Ok(child) => running.push(RunningWorker {
                    assignment: assignment.clone(),
                    input: invocation.input.clone(),
                    report_path,
                    child,
                }),
                Err(source) => {
                    abandon(running);
                    return Err(RenderError::WorkerSpawnFailure {
                        worker_id: assignment.worker_id,
                        source,
                    });
                }
            }
        }

        let mut reports = Vec::with_capacity(running.len());
        let mut fatal: Option<RenderError> = None;
        for mut worker in running {
            let worker_id = worker.assignment.worker_id;
            let status = match worker.child.wait() {
                Ok(status) => status,
                Err(e) => {
                    fatal.get_or_insert(RenderError::WorkerWaitFailure {
                        worker_id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            match collect_report(&worker, status) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    fatal.get_or_insert(e);
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }
}

fn collect_report(worker: &RunningWorker, status: ExitStatus) -> Result<WorkerReport> {
    let worker_id = worker.assignment.worker_id;
    if status.code() == Some(EXIT_LOAD_FAILURE) {
        return Err(RenderError::LoadFailure {
            path: worker.input.clone(),
            reason: format!("worker {worker_id} could not load the document"),
        });
    }
    match WorkerReport::load(&worker.report_path) {
        Ok(report) => {
            debug!(worker_id, %status, failed = report.failed, "Worker exited");
            Ok(report)
        }
        Err(e) => {
            warn!(worker_id, %status, error = %e, "Worker exited without a report; counting its pages as failed");
            Ok(WorkerReport::lost(worker_id, worker.assignment.page_range.clone()))
        }
    }
}

/// Kill and reap workers after a fatal dispatch error.
fn abandon(running: Vec<RunningWorker>) {
    for mut worker in running {
        let _ = worker.child.kill();
        let _ = worker.child.wait();
    }
}
