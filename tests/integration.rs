use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;

use serde_json::json;
use tempfile::TempDir;
use tokio::process::Command;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Variables that would change the binary's behaviour if inherited.
const SCRUBBED_ENV: &[&str] = &[
    "RUST_LOG",
    "DB_PATH",
    "PAGE_SIZE",
    "TOTAL_PAGES_PER_SEARCH",
    "S3_BUCKET",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "SNOWFLAKE_TOKEN",
    "SNOWFLAKE_ACCOUNT",
    "SNOWFLAKE_WAREHOUSE_NAME",
    "SNOWFLAKE_DATABASE_NAME",
    "SNOWFLAKE_SCHEMA_NAME",
    "SNOWFLAKE_ROLE",
];

fn csync_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_csync"))
}

fn setup_test_env(base_url: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[store]
path = "{}/data/catalog.sqlite"

[catalog]
base_url = "{}"
search_terms = ["tea"]
page_size = 2
max_retries = 1
backoff_unit_ms = 1
pacing_min_ms = 0
pacing_max_ms = 0

[object_store]
bucket = "exports"
"#,
        root.display(),
        base_url
    );

    let config_path = config_dir.join("catalog-sync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

async fn run_csync(cwd: &Path, config_path: Option<&Path>, args: &[&str]) -> (String, String, bool) {
    let binary = csync_binary();
    let mut cmd = Command::new(&binary);
    cmd.current_dir(cwd);
    for var in SCRUBBED_ENV {
        cmd.env_remove(var);
    }
    if let Some(p) = config_path {
        cmd.arg("--config").arg(p);
    }
    let output: Output = cmd
        .args(args)
        .output()
        .await
        .unwrap_or_else(|e| panic!("Failed to run csync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[tokio::test]
async fn test_init_creates_store() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (stdout, stderr, success) = run_csync(tmp.path(), Some(&config_path), &["init"]).await;
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Store initialized"));
    assert!(tmp.path().join("data").join("catalog.sqlite").exists());
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    for _ in 0..2 {
        let (stdout, stderr, success) = run_csync(tmp.path(), Some(&config_path), &["init"]).await;
        assert!(success, "init failed: {}", stderr);
        assert!(stdout.trim_end().ends_with("ok"));
    }
}

#[tokio::test]
async fn test_select_prints_latest() {
    let tmp = TempDir::new().unwrap();
    let (stdout, stderr, success) = run_csync(
        tmp.path(),
        None,
        &[
            "select",
            "openfoodfacts_export_20240101_000000.json",
            "openfoodfacts_export_20240115_120000.json",
            "bad_name.json",
        ],
    )
    .await;
    assert!(success, "select failed: {}", stderr);
    assert!(stdout.contains("selected openfoodfacts_export_20240115_120000.json"));
}

#[tokio::test]
async fn test_select_without_match_fails() {
    let tmp = TempDir::new().unwrap();
    let (_stdout, stderr, success) =
        run_csync(tmp.path(), None, &["select", "bad_name.json"]).await;
    assert!(!success);
    assert!(stderr.contains("no artifact matching"), "{}", stderr);
}

#[tokio::test]
async fn test_export_requires_credentials() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (_stdout, stderr, success) = run_csync(tmp.path(), Some(&config_path), &["export"]).await;
    assert!(!success);
    assert!(stderr.contains("AWS_ACCESS_KEY_ID"), "{}", stderr);
    // Nothing was touched
    assert!(!tmp.path().join("data").exists());
}

#[tokio::test]
async fn test_load_requires_token() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let mut cmd = Command::new(csync_binary());
    cmd.current_dir(tmp.path());
    for var in SCRUBBED_ENV {
        cmd.env_remove(var);
    }
    let output = cmd
        .env("AWS_ACCESS_KEY_ID", "AKID")
        .env("AWS_SECRET_ACCESS_KEY", "secret")
        .arg("--config")
        .arg(&config_path)
        .arg("load")
        .output()
        .await
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SNOWFLAKE_TOKEN"), "{}", stderr);
}

#[tokio::test]
async fn test_invalid_config_fails() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9");
    fs::write(&config_path, "[catalog]\npage_size = 0\n").unwrap();

    let (_stdout, stderr, success) = run_csync(tmp.path(), Some(&config_path), &["init"]).await;
    assert!(!success);
    assert!(stderr.contains("page_size"), "{}", stderr);
}

#[tokio::test]
async fn test_missing_explicit_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_stdout, stderr, success) = run_csync(tmp.path(), Some(&missing), &["init"]).await;
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ingest_tea_twice() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi/search.pl"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": [
            {"code": "0001", "product_name": "Green tea"},
            {"code": "0002", "product_name": "Black tea"}
        ]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cgi/search.pl"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": []})))
        .mount(&server)
        .await;

    let (tmp, config_path) = setup_test_env(&server.uri());

    let (stdout, stderr, success) = run_csync(tmp.path(), Some(&config_path), &["ingest"]).await;
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("tea: pages=1 records=2"), "{}", stdout);
    assert!(stdout.contains("total upserted: 2"), "{}", stdout);
    assert!(stdout.trim_end().ends_with("ok"));

    let (stdout, stderr, success) = run_csync(tmp.path(), Some(&config_path), &["ingest"]).await;
    assert!(success, "second ingest failed: {}", stderr);
    assert!(stdout.contains("total upserted: 0"), "{}", stdout);
    assert!(stdout.contains("total matched: 2"), "{}", stdout);
    assert!(stdout.contains("total modified: 0"), "{}", stdout);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ingest_term_override_and_failure_exit_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("search_terms", "milk"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let (tmp, config_path) = setup_test_env(&server.uri());

    let (stdout, stderr, success) = run_csync(
        tmp.path(),
        Some(&config_path),
        &["ingest", "--term", "milk"],
    )
    .await;
    assert!(!success);
    assert!(!stdout.contains("ok"));
    assert!(stderr.contains("aborted at term 'milk'"), "{}", stderr);
}
