//! Subcommands and the options they share.

pub mod render;
pub mod text;
pub mod worker;

use crate::batch;
use anyhow::{Context as _, Result};
use clap::Args;
use pdfium_render_pool::process_pool::LOG_ENV;
use pdfium_render_pool::{
    run_job, JobRequest, Operation, PageSelection, Parallelism, PdfiumBackend,
    RenderError, RenderJob, SelfExecLauncher, PDFIUM_LIB_ENV,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct JobOptions {
    /// Input PDF file, or a directory of PDFs
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output directory (render-pages) or output file (extract-text)
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Worker processes (1-16, default 1)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Threads per worker (1-32, default adaptive)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Page or inclusive page range, zero-based: "7" or "10-19"
    #[arg(long, value_name = "START-END")]
    pub pages: Option<String>,

    /// File name pattern for directory inputs
    #[arg(long, default_value = "*.pdf")]
    pub pattern: String,

    /// Only process the top level of a directory input
    #[arg(long)]
    pub no_recursive: bool,

    /// Directory holding the PDFium shared library
    #[arg(long, env = PDFIUM_LIB_ENV, value_name = "DIR")]
    pub pdfium_lib: Option<PathBuf>,

    /// Write the job summary and metrics as JSON
    #[arg(long, value_name = "PATH")]
    pub metrics_json: Option<PathBuf>,
}

impl JobOptions {
    /// Everything that can be checked without the rendering library.
    fn validate(&self) -> Result<(Option<PageSelection>, Parallelism)> {
        let pages = self
            .pages
            .as_deref()
            .map(str::parse::<PageSelection>)
            .transpose()?;
        let parallelism = Parallelism::new(self.workers, self.threads)?;
        if !self.input.exists() {
            return Err(RenderError::LoadFailure {
                path: self.input.clone(),
                reason: "no such file or directory".to_string(),
            }
            .into());
        }
        Ok((pages, parallelism))
    }

    fn launcher(&self, log_filter: &str) -> Result<SelfExecLauncher> {
        let mut launcher = SelfExecLauncher::current_exe()
            .context("Failed to locate the pdfium-pool executable")?
            .env(LOG_ENV, log_filter);
        if let Some(dir) = &self.pdfium_lib {
            launcher = launcher.env(PDFIUM_LIB_ENV, dir.as_os_str());
        }
        Ok(launcher)
    }
}

/// Run `operation` over a file or a directory of files.
pub fn run(operation: Operation, options: &JobOptions, job: RenderJob, log_filter: &str) -> Result<i32> {
    let (pages, parallelism) = options.validate()?;
    let backend = PdfiumBackend::acquire(options.pdfium_lib.as_deref())?;
    let launcher = options.launcher(log_filter)?;

    let template = JobRequest {
        operation,
        input: options.input.clone(),
        output: options.output.clone(),
        job,
        pages,
        parallelism,
    };

    if options.input.is_dir() {
        let files = batch::discover(&options.input, &options.pattern, !options.no_recursive)?;
        let outcome = batch::run(&backend, &template, &files, &launcher);
        println!("{outcome}");
        if let Some(path) = &options.metrics_json {
            write_json(path, &outcome.summaries)?;
        }
        return Ok(outcome.exit_code());
    }

    let summary = run_job(&backend, &template, &launcher)
        .with_context(|| format!("Failed to process {}", options.input.display()))?;
    println!("{summary}");
    if let Some(path) = &options.metrics_json {
        write_json(path, &summary)?;
    }
    Ok(summary.exit_code())
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("Failed to write {}", path.display()))
}

