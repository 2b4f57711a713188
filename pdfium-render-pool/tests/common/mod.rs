//! Shared helpers for integration tests.

#![allow(dead_code)]

use pdfium_render_pool::process_pool::WorkerLauncher;
use pdfium_render_pool::testing::FakeBackend;
use pdfium_render_pool::{run_worker, OutputFormat, RenderJob, WorkerInvocation, EXIT_LOAD_FAILURE};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::process::{Child, Command};

pub fn job(format: OutputFormat) -> RenderJob {
    RenderJob::builder().dpi(72.0).output_format(format).build().unwrap()
}

/// Every file in `dir` by name.
pub fn outputs(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            (entry.file_name().to_string_lossy().into_owned(), fs::read(entry.path()).unwrap())
        })
        .collect()
}

/// Runs the worker inside the test process against a fake backend, then
/// hands back a trivial child whose exit code mirrors the worker's.
pub struct InProcessLauncher {
    pub backend: FakeBackend,
}

impl WorkerLauncher for InProcessLauncher {
    fn launch(&self, _worker_id: usize, invocation: &Path, report: &Path) -> io::Result<Child> {
        let invocation = WorkerInvocation::load(invocation).map_err(io::Error::other)?;
        let code = match run_worker(&self.backend, &invocation) {
            Ok(outcome) => {
                outcome.store(report).map_err(io::Error::other)?;
                outcome.exit_code()
            }
            Err(e) => e.exit_code(),
        };
        exit_with(code)
    }
}

/// A child that exits with `code` and writes nothing.
pub fn exit_with(code: i32) -> io::Result<Child> {
    Command::new("sh").arg("-c").arg(format!("exit {code}")).spawn()
}

/// A launcher whose children die without a report.
pub struct CrashingLauncher;

impl WorkerLauncher for CrashingLauncher {
    fn launch(&self, _worker_id: usize, _invocation: &Path, _report: &Path) -> io::Result<Child> {
        exit_with(101)
    }
}

/// A launcher whose children report that the document would not open.
pub struct UnloadableLauncher;

impl WorkerLauncher for UnloadableLauncher {
    fn launch(&self, _worker_id: usize, _invocation: &Path, _report: &Path) -> io::Result<Child> {
        exit_with(EXIT_LOAD_FAILURE)
    }
}

/// A small valid PDF: `pages` letter pages, each showing "Page i" in Helvetica.
pub fn minimal_pdf(pages: usize) -> Vec<u8> {
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {pages} >>",
            (0..pages).map(|i| format!("{} 0 R", 4 + 2 * i)).collect::<Vec<_>>().join(" ")
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];
    for i in 0..pages {
        let content = format!("BT /F1 36 Tf 72 700 Td (Page {i}) Tj ET");
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
            5 + 2 * i
        ));
        objects.push(format!("<< /Length {} >>\nstream\n{content}\nendstream", content.len()));
    }

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }
    let xref = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    pdf.extend_from_slice(
        format!("trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n", objects.len() + 1).as_bytes(),
    );
    pdf
}
