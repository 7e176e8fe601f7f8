use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const TOKEN_ENV: &str = "CTRACK_CLI_TEST_TOKEN";

fn setup_test_env(repository: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/commits.sqlite"

[source]
repository = "{}"
api_url = "http://127.0.0.1:9"
token_env = "{}"

[ingest]
commit_utc_offset = "+05:30"

[server]
bind = "127.0.0.1:7341"

[export]
max_commits = 10
"#,
        root.display(),
        repository,
        TOKEN_ENV
    );

    let config_path = config_dir.join("ctrack.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ctrack(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = env!("CARGO_BIN_EXE_ctrack");
    let output = Command::new(binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove(TOKEN_ENV)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ctrack binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("acme/widgets");

    let (stdout, stderr, success) = run_ctrack(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/commits.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("acme/widgets");

    let (_, _, success1) = run_ctrack(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_ctrack(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_commits_on_empty_store() {
    let (_tmp, config_path) = setup_test_env("acme/widgets");
    run_ctrack(&config_path, &["init"]);

    let (stdout, stderr, success) = run_ctrack(&config_path, &["commits"]);
    assert!(success, "commits failed: stderr={}", stderr);
    assert!(stdout.contains("No commits."));
}

#[test]
fn test_commits_rejects_zero_limit() {
    let (_tmp, config_path) = setup_test_env("acme/widgets");
    run_ctrack(&config_path, &["init"]);

    let (_, stderr, success) = run_ctrack(&config_path, &["commits", "--limit", "0"]);
    assert!(!success);
    assert!(stderr.contains("--limit"), "stderr={}", stderr);
}

#[test]
fn test_stats_on_empty_store() {
    let (_tmp, config_path) = setup_test_env("acme/widgets");
    run_ctrack(&config_path, &["init"]);

    let (stdout, stderr, success) = run_ctrack(&config_path, &["stats"]);
    assert!(success, "stats failed: stderr={}", stderr);
    assert!(stdout.contains("Commits:     0"));
    assert!(stdout.contains("Last check:  never"));
}

#[test]
fn test_export_writes_snapshot() {
    let (tmp, config_path) = setup_test_env("acme/widgets");
    run_ctrack(&config_path, &["init"]);

    let out = tmp.path().join("out/commits.json");
    let (_, stderr, success) =
        run_ctrack(&config_path, &["export", "--output", out.to_str().unwrap()]);
    assert!(success, "export failed: stderr={}", stderr);

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(json["total_commits"], 0);
    assert!(json["commits"].as_array().unwrap().is_empty());
    assert!(json["last_updated"].is_string());
}

#[test]
fn test_ingest_without_token_fails() {
    let (_tmp, config_path) = setup_test_env("acme/widgets");
    run_ctrack(&config_path, &["init"]);

    let (_, stderr, success) = run_ctrack(&config_path, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains(TOKEN_ENV), "stderr={}", stderr);
}

#[test]
fn test_analyze_prints_annotation() {
    let (_tmp, config_path) = setup_test_env("acme/widgets");

    let (stdout, stderr, success) =
        run_ctrack(&config_path, &["analyze", "Handle error in parser"]);
    assert!(success, "analyze failed: stderr={}", stderr);
    assert!(stdout.contains("priority:   high"), "stdout={}", stdout);
    assert!(stdout.contains("categories: bug_fix"), "stdout={}", stdout);
    assert!(stdout.contains("Bug fix detected"));
}

#[test]
fn test_analyze_needs_no_config() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("absent.toml");

    let (stdout, stderr, success) = run_ctrack(&missing, &["analyze", "Update README"]);
    assert!(success, "analyze failed: stderr={}", stderr);
    assert!(stdout.contains("categories: documentation"), "stdout={}", stdout);

    let (_, stderr, success) = run_ctrack(&missing, &["analyze", "  "]);
    assert!(!success);
    assert!(stderr.contains("must not be empty"), "stderr={}", stderr);
}

#[test]
fn test_invalid_repository_rejected() {
    let (_tmp, config_path) = setup_test_env("widgets");

    let (_, stderr, success) = run_ctrack(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("owner/name"), "stderr={}", stderr);
}
