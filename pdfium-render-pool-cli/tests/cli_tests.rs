//! Integration tests for the pdfium-pool binary
//!
//! Everything here fails before the PDFium library is bound, so the tests
//! run on machines without it.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cli() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pdfium-pool"));
    cmd.env_remove("RUST_LOG");
    cmd
}

/// An existing file, so validation gets past the input check.
fn scratch_input() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("doc.pdf");
    std::fs::write(&input, b"%PDF-1.7\n").unwrap();
    (dir, input)
}

#[test]
fn test_help_lists_subcommands() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("render-pages"))
        .stdout(predicate::str::contains("extract-text"))
        .stdout(predicate::str::contains("EXIT CODES"));
}

#[test]
fn test_render_help_lists_options() {
    cli()
        .args(["render-pages", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--workers"))
        .stdout(predicate::str::contains("--jpeg-quality"))
        .stdout(predicate::str::contains("--no-fast-path"));
}

#[test]
fn test_reversed_page_range_exits_1() {
    let (dir, input) = scratch_input();
    cli()
        .arg("render-pages")
        .arg(&input)
        .arg(dir.path().join("out"))
        .args(["--pages", "5-3"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid page range 5-3"))
        .stderr(predicate::str::contains("hint:"));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_missing_input_exits_2() {
    let dir = TempDir::new().unwrap();
    cli()
        .arg("render-pages")
        .arg(dir.path().join("missing.pdf"))
        .arg(dir.path().join("out"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to load document"));
}

#[test]
fn test_missing_input_for_text_exits_2() {
    let dir = TempDir::new().unwrap();
    cli()
        .arg("extract-text")
        .arg(dir.path().join("missing.pdf"))
        .arg(dir.path().join("out.txt"))
        .assert()
        .code(2);
}

#[test]
fn test_out_of_range_options_exit_1_with_hint() {
    let (dir, input) = scratch_input();
    let cases: &[(&[&str], &str)] = &[
        (&["--workers", "17"], "--workers"),
        (&["--workers", "0"], "--workers"),
        (&["--threads", "33"], "--threads"),
        (&["--dpi", "700"], "--dpi"),
        (&["--dpi", "50"], "--dpi"),
        (&["--jpeg-quality", "101"], "--jpeg-quality"),
    ];

    for (args, option) in cases {
        cli()
            .arg("render-pages")
            .arg(&input)
            .arg(dir.path().join("out"))
            .args(*args)
            .assert()
            .code(1)
            .stderr(predicate::str::contains(format!("Invalid {option}")))
            .stderr(predicate::str::contains("hint:"));
    }
}

#[test]
fn test_unknown_format_exits_1() {
    let (dir, input) = scratch_input();
    cli()
        .arg("render-pages")
        .arg(&input)
        .arg(dir.path().join("out"))
        .args(["--format", "bmp"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("bmp"));
}

#[test]
fn test_usage_error_exits_1() {
    cli()
        .args(["render-pages", "--no-such-flag"])
        .assert()
        .code(1);
}

#[test]
fn test_worker_with_missing_invocation_fails() {
    let dir = TempDir::new().unwrap();
    cli()
        .arg("worker")
        .arg("--invocation")
        .arg(dir.path().join("missing.json"))
        .arg("--report")
        .arg(dir.path().join("report.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
    assert!(!dir.path().join("report.json").exists());
}
