//! Process exit code checks for the CLI: bad usage exits 2, a degraded or
//! failing run exits non-zero, and diagnostics go to stderr while stdout
//! stays parseable JSON.

use std::process::Command;
use tempfile::TempDir;

/// Command for the compiled binary with logs routed into a throwaway
/// directory. The TempDir guard must stay alive until the process exits.
fn bin() -> (Command, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_hybrid-rag"));
    cmd.env("LOG_DIR", temp_dir.path().to_str().unwrap());
    (cmd, temp_dir)
}

#[test]
fn test_no_args_exits_2_with_usage() {
    let (mut cmd, _logs) = bin();
    let output = cmd.output().expect("Failed to run binary");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "stderr was: {}", stderr);
}

#[test]
fn test_unknown_command_exits_2() {
    let (mut cmd, _logs) = bin();
    let output = cmd.arg("frobnicate").output().expect("Failed to run binary");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_query_without_text_exits_2() {
    let (mut cmd, _logs) = bin();
    let output = cmd.arg("query").output().expect("Failed to run binary");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_query_with_bad_top_k_exits_2() {
    let (mut cmd, _logs) = bin();
    let output = cmd
        .args(["query", "hello", "not-a-number"])
        .output()
        .expect("Failed to run binary");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_health_reports_degraded_store_with_nonzero_exit() {
    // Ports that are very unlikely to be in use.
    let (mut cmd, _logs) = bin();
    let output = cmd
        .env("QDRANT_URL", "http://127.0.0.1:59999")
        .env("EMBEDDINGS_URL", "http://127.0.0.1:59998/v1")
        .arg("health")
        .output()
        .expect("Failed to run binary");

    assert!(
        !output.status.success(),
        "expected non-zero exit, got: {:?}",
        output.status.code()
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("\"store_ok\": false"),
        "stdout was: {}",
        stdout
    );
}

#[test]
fn test_index_fails_fast_when_provider_unreachable() {
    let docs_dir = tempfile::tempdir().expect("Failed to create docs dir");
    std::fs::write(docs_dir.path().join("a.md"), "# A\n\nhello\n").unwrap();

    let (mut cmd, _logs) = bin();
    let output = cmd
        .env("QDRANT_URL", "http://127.0.0.1:59999")
        .env("EMBEDDINGS_URL", "http://127.0.0.1:59998/v1")
        .args(["index", docs_dir.path().to_str().unwrap(), "docs"])
        .output()
        .expect("Failed to run binary");

    assert!(!output.status.success());
}
