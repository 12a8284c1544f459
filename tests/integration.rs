use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ctxchat_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ctxchat"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let inbox = root.join("inbox");
    fs::create_dir_all(&inbox).unwrap();
    fs::write(
        inbox.join("gastos.md"),
        "# Gastos\n\nEl total de gastos del trimestre fue de 1200 euros, casi todo en viajes.",
    )
    .unwrap();
    fs::write(
        inbox.join("empresa.txt"),
        "La empresa desarrolla software educativo para colegios y universidades.",
    )
    .unwrap();
    fs::write(inbox.join("photo.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();

    let config_content = format!(
        r#"[store]
path = "{root}/data/index"

[sources]
root = "{root}/inbox"

[memory]
summary_path = "{root}/data/summary.txt"

[chunking]
chunk_size = 200
chunk_overlap = 40

[embedding]
provider = "hash"
dims = 64

[llm]
provider = "gemini"
credential_envs = ["CTXCHAT_TEST_KEY_THAT_IS_NEVER_SET"]
"#,
        root = root.display()
    );

    let config_path = config_dir.join("chat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ctxchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ctxchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("CTXCHAT_TEST_KEY_THAT_IS_NEVER_SET")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ctxchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_ingest_indexes_and_archives() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ctxchat(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("sources indexed: 2"), "stdout={}", stdout);
    assert!(stdout.contains("ok"));

    let processed = tmp.path().join("inbox").join("processed");
    assert!(processed.join("gastos.md").exists());
    assert!(processed.join("empresa.txt").exists());
    assert!(tmp.path().join("inbox").join("photo.png").exists());
}

#[test]
fn test_ingest_twice_is_noop() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_ctxchat(&config_path, &["ingest"]);
    assert!(first);

    let (stdout, _, second) = run_ctxchat(&config_path, &["ingest"]);
    assert!(second);
    assert!(stdout.contains("nothing new to ingest"), "stdout={}", stdout);
}

#[test]
fn test_ingest_dry_run_moves_nothing() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ctxchat(&config_path, &["ingest", "--dry-run"]);
    assert!(success, "dry-run failed: {}", stderr);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("new sources: 2"));
    assert!(tmp.path().join("inbox").join("gastos.md").exists());
}

#[test]
fn test_search_after_ingest() {
    let (_tmp, config_path) = setup_test_env();
    run_ctxchat(&config_path, &["ingest"]);

    let (stdout, stderr, success) =
        run_ctxchat(&config_path, &["search", "total gastos", "--k", "1"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("gastos.md"), "stdout={}", stdout);
    assert!(!stdout.contains("2. ["));
}

#[test]
fn test_search_is_deterministic() {
    let (_tmp, config_path) = setup_test_env();
    run_ctxchat(&config_path, &["ingest"]);

    let (first, _, _) = run_ctxchat(&config_path, &["search", "software colegios"]);
    let (second, _, _) = run_ctxchat(&config_path, &["search", "software colegios"]);
    assert_eq!(first, second);
}

#[test]
fn test_search_empty_index() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_ctxchat(&config_path, &["search", "anything"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();
    run_ctxchat(&config_path, &["ingest"]);

    let (stdout, stderr, success) = run_ctxchat(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Sources:     2"), "stdout={}", stdout);
    assert!(stdout.contains("Dimensions:  64"));
}

#[test]
fn test_summary_before_any_session() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_ctxchat(&config_path, &["summary"]);
    assert!(success);
    assert!(stdout.contains("No summary saved yet."));
}

#[test]
fn test_ask_without_credentials_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_ctxchat(&config_path, &["ask", "total gastos"]);
    assert!(!success);
    assert!(stderr.contains("No LLM credentials"), "stderr={}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_ctxchat(&missing, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_overlap_rejected() {
    let (tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("chunk_overlap = 40", "chunk_overlap = 200");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_ctxchat(&config_path, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("chunk_overlap"), "stderr={}", stderr);
    assert!(tmp.path().join("inbox").join("gastos.md").exists());
}
