//! # pdfium-render-pool
//!
//! Parallel PDF page rasterization and text extraction over PDFium.
//!
//! - **Hybrid parallelism**: N worker processes, each rendering with K threads
//! - **Identical output** for every N x K combination
//! - **JPEG fast path** for scanned pages: the embedded stream is written as-is
//! - **Bounded write queue** overlapping encoding and disk I/O with rendering
//!
//! ## Quick Start
//!
//! ```no_run
//! use pdfium_render_pool::{
//!     run_job, JobRequest, Operation, OutputFormat, Parallelism, PdfiumBackend, RenderJob,
//!     SelfExecLauncher,
//! };
//!
//! let backend = PdfiumBackend::acquire(None)?;
//! let request = JobRequest {
//!     operation: Operation::RenderPages,
//!     input: "document.pdf".into(),
//!     output: "pages".into(),
//!     job: RenderJob::builder().dpi(150.0).output_format(OutputFormat::Jpg).build()?,
//!     pages: None,
//!     parallelism: Parallelism::new(Some(1), Some(4))?,
//! };
//! let summary = run_job(&backend, &request, &SelfExecLauncher::current_exe()?)?;
//! println!("{summary}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
pub mod config;
pub mod encode;
pub mod error;
pub mod fast_path;
pub mod geometry;
pub mod job;
pub mod metrics;
pub mod page;
pub mod pdfium;
pub mod process_pool;
pub mod raster;
pub mod scheduler;
pub mod text;
pub mod thread_pool;
pub mod worker;
pub mod write_queue;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use backend::{BackendDocument, BackendPage, NoopHooks, PageHooks, RenderBackend, RenderContext};
pub use config::{OutputFormat, PageSelection, Parallelism, PixelFormat, QualityLevel, RenderJob};
pub use error::{
    RenderError, Result, EXIT_FAILURE, EXIT_LOAD_FAILURE, EXIT_SUCCESS, EXIT_WORKER_FAILURE,
};
pub use job::{run_job, JobRequest, JobSummary};
pub use metrics::{JobMetrics, MetricsSnapshot};
pub use pdfium::{PdfiumBackend, PdfiumLibrary, PDFIUM_LIB_ENV};
pub use process_pool::{ProcessPoolDispatcher, SelfExecLauncher, WorkerLauncher};
pub use worker::{run_worker, Operation, WorkerInvocation, WorkerReport};
