//! Error types for pdfium-render-pool

use std::path::PathBuf;
use thiserror::Error;

/// Result type for pdfium-render-pool operations
pub type Result<T> = std::result::Result<T, RenderError>;

/// Process exit code: success.
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code: write, encode or page failure, invalid options, bad range.
pub const EXIT_FAILURE: i32 = 1;
/// Process exit code: the document (or its page count) could not be loaded.
pub const EXIT_LOAD_FAILURE: i32 = 2;
/// Process exit code: a worker process could not be spawned or waited on.
pub const EXIT_WORKER_FAILURE: i32 = 3;

/// Error types for rendering jobs.
///
/// Variants split into two groups. Page-local errors (`PageLoadFailure`,
/// `EncodeFailure`, `WriteFailure`) are recorded against one page and the job
/// carries on. Every other variant is structural and aborts the job.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Document unreadable
    #[error("Failed to load document {path}: {reason}")]
    LoadFailure { path: PathBuf, reason: String },

    /// The rendering library could not be bound
    #[error("PDFium library unavailable: {reason}")]
    BackendUnavailable { reason: String },

    /// Requested page range outside the document or reversed
    #[error("Invalid page range {start}-{end}: {reason}")]
    PageRangeInvalid {
        start: usize,
        end: usize,
        reason: String,
    },

    /// Failed to load page
    #[error("Failed to load page {index}: {reason}")]
    PageLoadFailure { index: usize, reason: String },

    /// Failed to rasterize or encode page
    #[error("Failed to encode page {index}: {reason}")]
    EncodeFailure { index: usize, reason: String },

    /// Failed to write page output
    #[error("Failed to write {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to spawn a worker process
    #[error("Failed to spawn worker {worker_id}: {source}")]
    WorkerSpawnFailure {
        worker_id: usize,
        #[source]
        source: std::io::Error,
    },

    /// Failed to wait on a worker process or read its report
    #[error("Worker {worker_id} failed: {reason}")]
    WorkerWaitFailure { worker_id: usize, reason: String },

    /// Output directory could not be created
    #[error("Failed to create output directory {path}: {source}")]
    OutputDirectoryFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration value rejected at construction
    #[error("Invalid {option}: {reason}")]
    InvalidOption {
        option: &'static str,
        reason: String,
        remedy: &'static str,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    pub(crate) fn invalid(option: &'static str, reason: impl Into<String>, remedy: &'static str) -> Self {
        RenderError::InvalidOption {
            option,
            reason: reason.into(),
            remedy,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            RenderError::LoadFailure { .. } | RenderError::BackendUnavailable { .. } => {
                EXIT_LOAD_FAILURE
            }
            RenderError::WorkerSpawnFailure { .. } | RenderError::WorkerWaitFailure { .. } => {
                EXIT_WORKER_FAILURE
            }
            _ => EXIT_FAILURE,
        }
    }

    /// True for errors that only affect one page.
    pub fn is_page_local(&self) -> bool {
        matches!(
            self,
            RenderError::PageLoadFailure { .. }
                | RenderError::EncodeFailure { .. }
                | RenderError::WriteFailure { .. }
        )
    }

    /// Suggested remediation shown next to the error.
    pub fn remediation(&self) -> &'static str {
        match self {
            RenderError::LoadFailure { .. } => {
                "check that the file exists, is a PDF and is not password protected"
            }
            RenderError::BackendUnavailable { .. } => {
                "install the PDFium shared library or pass --pdfium-lib / set PDFIUM_DYNAMIC_LIB_PATH"
            }
            RenderError::PageRangeInvalid { .. } => {
                "use --pages START-END with 0 <= START <= END < page count"
            }
            RenderError::PageLoadFailure { .. } => "the page is damaged; other pages were still rendered",
            RenderError::EncodeFailure { .. } => "try a different --format or a lower --dpi",
            RenderError::WriteFailure { .. } | RenderError::Io(_) => {
                "check free disk space and permissions on the output directory"
            }
            RenderError::WorkerSpawnFailure { .. } | RenderError::WorkerWaitFailure { .. } => {
                "reduce --workers or run with --workers 1"
            }
            RenderError::OutputDirectoryFailure { .. } => {
                "choose an output path you can write to"
            }
            RenderError::InvalidOption { remedy, .. } => remedy,
        }
    }
}
