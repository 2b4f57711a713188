//! Multi-process dispatch tests
//!
//! Workers are simulated: the launcher runs the worker in the test process
//! and spawns `sh -c "exit <code>"` as the child, so the dispatcher's wait,
//! report collection and exit-code handling run for real.

#![cfg(unix)]

mod common;

use common::{job, outputs, CrashingLauncher, InProcessLauncher, UnloadableLauncher};
use pdfium_render_pool::process_pool::{ThreadCount, WorkerAssignment};
use pdfium_render_pool::testing::{fake_page_text, FakeBackend, FakeDocumentSpec};
use pdfium_render_pool::text::encode_page;
use pdfium_render_pool::{
    run_job, JobRequest, Operation, OutputFormat, PageSelection, Parallelism,
    ProcessPoolDispatcher, RenderError, WorkerInvocation, EXIT_FAILURE, EXIT_SUCCESS,
};
use std::path::Path;

fn request(operation: Operation, input: &Path, output: &Path, workers: usize, threads: usize) -> JobRequest {
    JobRequest {
        operation,
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        job: job(OutputFormat::Png),
        pages: None,
        parallelism: Parallelism::new(Some(workers), Some(threads)).unwrap(),
    }
}

fn assignments(ranges: &[std::ops::Range<usize>]) -> Vec<WorkerAssignment> {
    ranges
        .iter()
        .enumerate()
        .map(|(worker_id, page_range)| WorkerAssignment {
            worker_id,
            page_range: page_range.clone(),
            thread_count: ThreadCount::Fixed(1),
        })
        .collect()
}

fn invocation(input: &Path, output: &Path) -> impl Fn(&WorkerAssignment) -> WorkerInvocation {
    let input = input.to_path_buf();
    let output = output.to_path_buf();
    move |a| WorkerInvocation {
        worker_id: a.worker_id,
        operation: Operation::RenderPages,
        input: input.clone(),
        output: output.clone(),
        job: job(OutputFormat::Raw),
        start: a.page_range.start,
        end: a.page_range.end,
        threads: a.thread_count,
    }
}

#[test]
fn test_multi_worker_render_matches_single() {
    let backend = FakeBackend::new();
    let input = backend.register("doc.pdf", FakeDocumentSpec::vector(13).with_jpeg_page(4, 1.0));
    let launcher = InProcessLauncher { backend: backend.clone() };
    let dir = tempfile::tempdir().unwrap();

    let single = dir.path().join("single");
    let summary = run_job(&backend, &request(Operation::RenderPages, &input, &single, 1, 1), &launcher).unwrap();
    assert_eq!(summary.exit_code(), EXIT_SUCCESS);

    let multi = dir.path().join("multi");
    let summary = run_job(&backend, &request(Operation::RenderPages, &input, &multi, 4, 1), &launcher).unwrap();
    assert_eq!(summary.exit_code(), EXIT_SUCCESS);
    assert_eq!(summary.written + summary.extracted, 13);
    assert_eq!(summary.metrics.pages_completed(), 13);

    assert_eq!(outputs(&multi), outputs(&single));
}

#[test]
fn test_multi_worker_text_matches_single() {
    let backend = FakeBackend::new();
    let input = backend.register("doc.pdf", FakeDocumentSpec::vector(9));
    let launcher = InProcessLauncher { backend: backend.clone() };
    let dir = tempfile::tempdir().unwrap();

    let single = dir.path().join("single.txt");
    run_job(&backend, &request(Operation::ExtractText, &input, &single, 1, 2), &launcher).unwrap();
    let multi = dir.path().join("multi.txt");
    run_job(&backend, &request(Operation::ExtractText, &input, &multi, 3, 1), &launcher).unwrap();

    let expected: Vec<u8> = (0..9).flat_map(|i| encode_page(&fake_page_text(i))).collect();
    assert_eq!(std::fs::read(&single).unwrap(), expected);
    assert_eq!(std::fs::read(&multi).unwrap(), expected);
}

#[test]
fn test_page_selection_is_split_across_workers() {
    let backend = FakeBackend::new();
    let input = backend.register("doc.pdf", FakeDocumentSpec::vector(40));
    let launcher = InProcessLauncher { backend: backend.clone() };
    let dir = tempfile::tempdir().unwrap();

    let mut req = request(Operation::RenderPages, &input, dir.path(), 3, 1);
    req.pages = Some("10-19".parse::<PageSelection>().unwrap());
    let summary = run_job(&backend, &req, &launcher).unwrap();

    assert_eq!(summary.pages_selected, 10);
    let names: Vec<String> = outputs(dir.path()).into_keys().collect();
    let expected: Vec<String> = (10..20).map(|i| format!("page_{i:04}.png")).collect();
    assert_eq!(names, expected);
}

#[test]
fn test_worker_without_report_fails_its_pages() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = ProcessPoolDispatcher::new(&CrashingLauncher);
    let reports = dispatcher
        .dispatch(&assignments(&[0..3, 3..5]), invocation(Path::new("doc.pdf"), dir.path()))
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].failed_pages, vec![0, 1, 2]);
    assert_eq!(reports[1].failed_pages, vec![3, 4]);
    assert!(reports.iter().all(|r| r.exit_code() == EXIT_FAILURE));
}

#[test]
fn test_worker_load_failure_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = ProcessPoolDispatcher::new(&UnloadableLauncher);
    let err = dispatcher
        .dispatch(&assignments(&[0..2, 2..4]), invocation(Path::new("doc.pdf"), dir.path()))
        .unwrap_err();

    assert!(matches!(err, RenderError::LoadFailure { ref path, .. } if path == Path::new("doc.pdf")));
    assert_eq!(err.exit_code(), pdfium_render_pool::EXIT_LOAD_FAILURE);
}

#[test]
fn test_reports_come_back_in_worker_order() {
    let backend = FakeBackend::new();
    let input = backend.register("doc.pdf", FakeDocumentSpec::vector(10).with_broken_page(8));
    let launcher = InProcessLauncher { backend };
    let dir = tempfile::tempdir().unwrap();

    let dispatcher = ProcessPoolDispatcher::new(&launcher);
    let reports = dispatcher
        .dispatch(&assignments(&[0..4, 4..8, 8..10]), invocation(&input, dir.path()))
        .unwrap();

    let spans: Vec<_> = reports.iter().map(|r| (r.worker_id, r.start, r.end)).collect();
    assert_eq!(spans, [(0, 0, 4), (1, 4, 8), (2, 8, 10)]);
    assert_eq!(reports[2].failed_pages, vec![8]);
    assert_eq!(outputs(dir.path()).len(), 9);
}
