//! pdfium-pool - parallel PDF page rendering and text extraction
//!
//! Command-line front end for `pdfium-render-pool`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use pdfium_render_pool::process_pool::LOG_ENV;
use pdfium_render_pool::{RenderError, EXIT_FAILURE, EXIT_SUCCESS};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod batch;
mod commands;

use commands::render::RenderCommand;
use commands::text::ExtractTextCommand;
use commands::worker::WorkerCommand;

#[derive(Parser)]
#[command(
    name = "pdfium-pool",
    version,
    about = "Render PDF pages to images, or extract their text, with N processes x K threads",
    after_help = "EXAMPLES:\n  \
                  # Render every page at 300 DPI as PNG\n  \
                  pdfium-pool render-pages document.pdf pages/\n\n  \
                  # 4 worker processes, 2 threads each, JPEG at 150 DPI\n  \
                  pdfium-pool render-pages --workers 4 --threads 2 --format jpg --dpi 150 document.pdf pages/\n\n  \
                  # Pages 10 through 19 only\n  \
                  pdfium-pool render-pages --pages 10-19 document.pdf pages/\n\n  \
                  # Extract text (UTF-32LE) from a directory of PDFs\n  \
                  pdfium-pool extract-text --workers 2 scans/ text/\n\n\
                  EXIT CODES:\n  \
                  0  success\n  \
                  1  invalid options, or one or more pages failed\n  \
                  2  document could not be opened\n  \
                  3  a worker process could not be started"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Rasterize pages into one image file per page
    RenderPages(RenderCommand),

    /// Extract page text into a single UTF-32LE file
    ExtractText(ExtractTextCommand),

    /// Run one worker's share of a job (spawned by the dispatcher)
    #[command(hide = true)]
    Worker(WorkerCommand),
}

/// `RUST_LOG` wins over the command-line flags so workers inherit the
/// parent's filter verbatim.
fn log_filter(verbose: bool, quiet: bool) -> String {
    match std::env::var(LOG_ENV) {
        Ok(filter) if !filter.trim().is_empty() => filter,
        _ if verbose => "debug".to_string(),
        _ if quiet => "warn".to_string(),
        _ => "info".to_string(),
    }
}

fn init_tracing(filter: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter)?)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {e}"))
}

/// Print an error with its remediation hint and pick the exit code.
fn report_error(err: &anyhow::Error) -> i32 {
    eprintln!("Error: {err:#}");
    match err.chain().find_map(|cause| cause.downcast_ref::<RenderError>()) {
        Some(render_error) => {
            eprintln!("hint: {}", render_error.remediation());
            render_error.exit_code()
        }
        None => EXIT_FAILURE,
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn main() -> ExitCode {
    // Usage errors exit 1; 2 is reserved for documents that fail to open.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return exit_code(if err.use_stderr() { EXIT_FAILURE } else { EXIT_SUCCESS });
        }
    };

    let filter = log_filter(cli.verbose, cli.quiet);
    if let Err(err) = init_tracing(&filter) {
        return exit_code(report_error(&err));
    }

    let result = match cli.command {
        Commands::RenderPages(cmd) => cmd.execute(&filter),
        Commands::ExtractText(cmd) => cmd.execute(&filter),
        Commands::Worker(cmd) => cmd.execute(),
    };

    match result {
        Ok(code) => exit_code(code),
        Err(err) => exit_code(report_error(&err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_render_error_keeps_exit_code_through_context() {
        let err = anyhow::Error::new(RenderError::LoadFailure {
            path: "x.pdf".into(),
            reason: "missing".to_string(),
        })
        .context("Failed to process x.pdf");
        assert_eq!(report_error(&err), pdfium_render_pool::EXIT_LOAD_FAILURE);
        assert_eq!(report_error(&anyhow::anyhow!("plain")), EXIT_FAILURE);
    }
}
