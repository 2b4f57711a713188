//! Hidden worker entry used by the process pool.
//!
//! The parent writes a `WorkerInvocation` as JSON, starts
//! `pdfium-pool worker --invocation <file> --report <file>` and reads the
//! `WorkerReport` back once the child exits.

use anyhow::{Context as _, Result};
use clap::Args;
use pdfium_render_pool::{run_worker, PdfiumBackend, WorkerInvocation, PDFIUM_LIB_ENV};
use std::path::PathBuf;
use tracing::debug;

#[derive(Args, Debug)]
pub struct WorkerCommand {
    /// Invocation file written by the dispatcher
    #[arg(long, value_name = "PATH")]
    invocation: PathBuf,

    /// Where to write the worker report
    #[arg(long, value_name = "PATH")]
    report: PathBuf,

    /// Directory holding the PDFium shared library
    #[arg(long, env = PDFIUM_LIB_ENV, value_name = "DIR")]
    pdfium_lib: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn execute(self) -> Result<i32> {
        let invocation = WorkerInvocation::load(&self.invocation)
            .with_context(|| format!("Failed to read {}", self.invocation.display()))?;
        debug!(worker_id = invocation.worker_id, pid = std::process::id(), "Worker process up");

        let backend = PdfiumBackend::acquire(self.pdfium_lib.as_deref())?;
        let report = run_worker(&backend, &invocation)?;
        report
            .store(&self.report)
            .with_context(|| format!("Failed to write {}", self.report.display()))?;
        Ok(report.exit_code())
    }
}
