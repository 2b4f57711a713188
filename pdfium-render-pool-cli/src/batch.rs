//! Directory inputs: run the same job over every matching PDF.
//!
//! Each file gets its own output under the output root, mirroring the
//! input tree: `<out>/<rel>/<stem>/` for rendering, `<out>/<rel>/<stem>.txt`
//! for text. A file that fails does not stop the batch.

use anyhow::{Context as _, Result};
use glob::Pattern;
use pdfium_render_pool::{
    run_job, JobRequest, JobSummary, Operation, RenderBackend, WorkerLauncher, EXIT_FAILURE,
    EXIT_SUCCESS,
};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Matching files under `root`, sorted.
pub fn discover(root: &Path, pattern: &str, recursive: bool) -> Result<Vec<PathBuf>> {
    let pattern = Pattern::new(pattern).with_context(|| format!("Invalid --pattern {pattern:?}"))?;
    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files = Vec::new();
    for entry in WalkDir::new(root).max_depth(max_depth).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(%error, "Skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && pattern.matches(&entry.file_name().to_string_lossy()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Output path for one input file of a batch.
pub fn output_for(root: &Path, file: &Path, out: &Path, operation: Operation) -> PathBuf {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let parent = relative.parent().unwrap_or_else(|| Path::new(""));
    let stem = file.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    match operation {
        Operation::RenderPages => out.join(parent).join(stem),
        Operation::ExtractText => out.join(parent).join(format!("{stem}.txt")),
    }
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub summaries: Vec<JobSummary>,
    pub failed_files: Vec<PathBuf>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.summaries.iter().filter(|s| s.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.failed_files.len() + self.summaries.iter().filter(|s| !s.succeeded()).count()
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed() == 0 {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        }
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Batch complete: {} succeeded, {} failed", self.succeeded(), self.failed())
    }
}

/// Run `template` once per file. `template.input` is the batch root.
pub fn run<B: RenderBackend>(
    backend: &B,
    template: &JobRequest,
    files: &[PathBuf],
    launcher: &dyn WorkerLauncher,
) -> BatchOutcome {
    info!(root = %template.input.display(), files = files.len(), "Starting batch");
    let mut outcome = BatchOutcome::default();

    for (i, file) in files.iter().enumerate() {
        let request = JobRequest {
            input: file.clone(),
            output: output_for(&template.input, file, &template.output, template.operation),
            ..template.clone()
        };
        info!("[{}/{}] {}", i + 1, files.len(), file.display());
        match run_job(backend, &request, launcher) {
            Ok(summary) => {
                println!("{}: {summary}", file.display());
                outcome.summaries.push(summary);
            }
            Err(error) => {
                warn!(file = %file.display(), %error, "File failed");
                eprintln!("{}: {error}", file.display());
                outcome.failed_files.push(file.clone());
            }
        }
    }
    outcome
}
