use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn learnflow_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_learnflow"))
}

fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/learnflow.sqlite"

[server]
bind = "127.0.0.1:7441"

[llm]
provider = "disabled"

[client]
base_url = "http://127.0.0.1:1"
poll_interval_secs = 1
poll_timeout_secs = 2
user_id = "cli-user"
{}
"#,
        root.display(),
        extra
    );

    let config_path = config_dir.join("learnflow.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_learnflow(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = learnflow_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run learnflow binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_learnflow(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully"));
    assert!(tmp.path().join("data/learnflow.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("");

    let (_, stderr, success) = run_learnflow(&config_path, &["init"]);
    assert!(success, "first init failed: {}", stderr);
    let (_, stderr, success) = run_learnflow(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_stats_on_empty_database() {
    let (_tmp, config_path) = setup_test_env("");
    run_learnflow(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_learnflow(&config_path, &["stats", "--date", "2024-03-09"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Sessions:    0"));
    assert!(stdout.contains("No sort results yet."));
    assert!(stdout.contains("Articles sorted on 2024-03-09: 0"));
}

#[test]
fn test_stats_rejects_bad_date() {
    let (_tmp, config_path) = setup_test_env("");
    run_learnflow(&config_path, &["init"]);

    let (_, stderr, success) = run_learnflow(&config_path, &["stats", "--date", "03/09/2024"]);
    assert!(!success);
    assert!(stderr.contains("YYYY-MM-DD"), "unexpected error: {}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env("\n[sorting]\nworkers = 0\n");

    let (_, stderr, success) = run_learnflow(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("sorting.workers"), "unexpected error: {}", stderr);
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_learnflow(&missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_sort_without_server_fails() {
    let (_tmp, config_path) = setup_test_env("");

    let (stdout, _stderr, success) = run_learnflow(&config_path, &["sort", "7"]);
    assert!(!success);
    assert!(!stdout.contains("sorted:"));
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(learnflow_binary())
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["init", "serve", "sort", "status", "summarize", "notes", "stats"] {
        assert!(stdout.contains(command), "--help is missing {}", command);
    }
}
