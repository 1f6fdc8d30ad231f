//! CLI tests against the compiled `ragq` binary.
//!
//! Every external provider stays disabled, so these exercise the paths
//! that must work offline: schema setup, dry-run ingestion, degraded
//! answering, feedback, evaluation failures and the read-only reports.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragq_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragq");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(docs_dir.join("nested")).unwrap();
    fs::write(
        docs_dir.join("refunds.txt"),
        "Title: Refund Policy\nCategory: finance\nA refund is issued within 14 days of purchase.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("nested").join("vacation.txt"),
        "Title: Vacation Policy\nCategory: hr\nVacation requests need manager approval.",
    )
    .unwrap();
    fs::write(docs_dir.join("notes.md"), "Not a text file, never indexed.").unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/ragq.sqlite"

[logging]
level = "warn"

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );

    let config_path = config_dir.join("ragq.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ragq(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ragq_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragq binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn initialized() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_ragq(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    (tmp, config_path)
}

/// Ask a question and return the recorded interaction id.
fn ask(config_path: &Path, question: &str) -> String {
    let (stdout, stderr, success) = run_ragq(config_path, &["ask", question]);
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("interaction "))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
        .unwrap_or_else(|| panic!("no interaction id in: {}", stdout))
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ragq(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/ragq.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_ragq(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_ragq(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_ragq(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("nope.toml"));
}

#[test]
fn test_ingest_dry_run_plans_txt_files_only() {
    let (tmp, config_path) = initialized();
    let docs = tmp.path().join("docs");

    let (stdout, stderr, success) =
        run_ragq(&config_path, &["ingest", docs.to_str().unwrap(), "--dry-run"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Refund Policy"));
    assert!(stdout.contains("Vacation Policy"));
    assert!(stdout.contains("2 documents"));
    assert!(stdout.contains("(dry run)"));

    let (stats, _, ok) = run_ragq(&config_path, &["stats"]);
    assert!(ok);
    assert!(stats.contains("Chunks:        0"));
}

#[test]
fn test_ingest_missing_directory_fails() {
    let (tmp, config_path) = initialized();
    let missing = tmp.path().join("missing");

    let (_, stderr, success) = run_ragq(&config_path, &["ingest", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("missing"));
}

#[test]
fn test_ingest_without_embedder_reports_failures() {
    let (tmp, config_path) = initialized();
    let docs = tmp.path().join("docs");

    let (stdout, stderr, success) = run_ragq(&config_path, &["ingest", docs.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("FAILED"));
    assert!(stdout.contains("2 failed"));
}

#[test]
fn test_ask_without_index_degrades_and_records() {
    let (_tmp, config_path) = initialized();

    let (stdout, _, success) = run_ragq(&config_path, &["ask", "How are refunds handled?"]);
    assert!(success);
    assert!(stdout.contains("did not find relevant documents"));

    let (list, _, ok) = run_ragq(&config_path, &["interactions"]);
    assert!(ok);
    assert!(list.contains("How are refunds handled?"));
    assert!(list.contains("1 of 1 shown"));
}

#[test]
fn test_ask_rejects_short_question() {
    let (_tmp, config_path) = initialized();
    let (_, stderr, success) = run_ragq(&config_path, &["ask", "hi"]);
    assert!(!success);
    assert!(stderr.contains("question"));
}

#[test]
fn test_search_without_embedder_fails() {
    let (_tmp, config_path) = initialized();
    let (_, stderr, success) = run_ragq(&config_path, &["search", "refunds"]);
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_feedback_round_trip_and_validation() {
    let (_tmp, config_path) = initialized();
    let id = ask(&config_path, "How are refunds handled?");

    let (_, stderr, success) = run_ragq(&config_path, &["feedback", &id, "9"]);
    assert!(!success);
    assert!(stderr.contains("rating"));

    let (_, _, success) = run_ragq(&config_path, &["feedback", "interaction-does-not-exist", "4"]);
    assert!(!success);

    let (stdout, stderr, success) = run_ragq(&config_path, &["feedback", &id, "5"]);
    assert!(success, "feedback failed: stdout={}, stderr={}", stdout, stderr);

    let (stats, _, ok) = run_ragq(&config_path, &["stats"]);
    assert!(ok);
    assert!(stats.contains("Rated:         1"));
    assert!(stats.contains("Avg rating:    5.00"));
}

#[test]
fn test_evaluate_empty_log_fails() {
    let (_tmp, config_path) = initialized();
    let (_, stderr, success) = run_ragq(&config_path, &["evaluate"]);
    assert!(!success);
    assert!(stderr.contains("no interactions"));
}

#[test]
fn test_evaluate_with_disabled_evaluator_degrades() {
    let (_tmp, config_path) = initialized();
    let id = ask(&config_path, "How are refunds handled?");
    run_ragq(&config_path, &["feedback", &id, "5"]);

    let (stdout, stderr, success) = run_ragq(&config_path, &["evaluate", "--id", &id]);
    assert!(success, "evaluate failed: stdout={}, stderr={}", stdout, stderr);

    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["total_interactions"], 1);
    assert_eq!(report["persisted"], 0);
    assert_eq!(report["perceived_precision"]["value"], 1.0);
    assert!(!report["recommendations"].as_array().unwrap().is_empty());

    // nothing was scored, so the report window is empty
    let (_, _, ok) = run_ragq(&config_path, &["report", "--days", "7"]);
    assert!(!ok);
}

#[test]
fn test_report_window_defaults_to_thirty_days() {
    let (_tmp, config_path) = initialized();
    let (_, stderr, success) = run_ragq(&config_path, &["report"]);
    assert!(!success);
    assert!(stderr.contains("last 30 days"), "stderr: {}", stderr);
}

#[test]
fn test_get_unknown_chunk_fails() {
    let (_tmp, config_path) = initialized();
    let (_, stderr, success) = run_ragq(&config_path, &["get", "finance_0000000000000000"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_add_without_embedder_fails() {
    let (tmp, config_path) = initialized();
    let file = tmp.path().join("docs/refunds.txt");
    let (_, stderr, success) = run_ragq(
        &config_path,
        &["add", file.to_str().unwrap(), "--category", "finance"],
    );
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_reset_requires_confirmation() {
    let (_tmp, config_path) = initialized();

    let (_, stderr, success) = run_ragq(&config_path, &["reset"]);
    assert!(!success);
    assert!(stderr.contains("--yes"));

    let (stdout, stderr, success) = run_ragq(&config_path, &["reset", "--yes"]);
    assert!(success, "reset failed: {}", stderr);
    assert!(stdout.contains("Removed 0 chunks"));
}

#[test]
fn test_export_interactions_json() {
    let (tmp, config_path) = initialized();
    ask(&config_path, "How are refunds handled?");
    let out = tmp.path().join("out/interactions.json");

    let (_, stderr, success) = run_ragq(
        &config_path,
        &["export", "interactions", "--output", out.to_str().unwrap()],
    );
    assert!(success, "export failed: {}", stderr);

    let dumped: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(dumped.as_array().unwrap().len(), 1);
    assert_eq!(dumped[0]["question"], "How are refunds handled?");
}

#[test]
fn test_export_embeddings_on_empty_index() {
    let (tmp, config_path) = initialized();
    let out = tmp.path().join("projector");

    let (_, stderr, success) =
        run_ragq(&config_path, &["export", "embeddings", out.to_str().unwrap()]);
    assert!(success, "export failed: {}", stderr);
    let meta = fs::read_to_string(out.join("metadata.tsv")).unwrap();
    assert_eq!(meta, "title\tcategory\tchunk\n");
}
