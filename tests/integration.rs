use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docroute_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docroute");
    path
}

fn guide(second_heading: &str) -> String {
    format!(
        "# Guide\n\n## Install\n\n{}\n\n## {}\n\n{}\n",
        "Install the agent with the package manager. ".repeat(4).trim(),
        second_heading,
        "Run the agent as a service and check its status. ".repeat(4).trim()
    )
}

fn config_text(root: &Path, bind: &str) -> String {
    format!(
        r#"[db]
path = "{root}/data/docroute.sqlite"

[chunking]
large_file_threshold = 300
max_chunk_chars = 300
min_section_chars = 10

[embedding]
provider = "disabled"

[server]
bind = "{bind}"

[sources.handbook]
source_type = "docs"
root = "{root}/handbook"
"#,
        root = root.display(),
        bind = bind
    )
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let handbook = root.join("handbook");
    fs::create_dir_all(&handbook).unwrap();
    fs::write(
        handbook.join("errors.md"),
        "# Errors\n\nNET.Retry.3 means the upstream connection was retried three times.\n",
    )
    .unwrap();
    fs::write(handbook.join("guide.md"), guide("Usage")).unwrap();
    fs::write(handbook.join("notes.txt"), "not markdown, never indexed").unwrap();

    let config_path = config_dir.join("docroute.toml");
    fs::write(&config_path, config_text(&root, "127.0.0.1:7340")).unwrap();

    (tmp, config_path)
}

fn run_docroute(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docroute_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docroute binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn synced_env() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    let (_, stderr, ok) = run_docroute(&config_path, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    let (stdout, stderr, ok) = run_docroute(&config_path, &["sync", "all"]);
    assert!(ok, "sync failed: stdout={}, stderr={}", stdout, stderr);
    (tmp, config_path)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docroute(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/docroute.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_docroute(&config_path, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_docroute(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sync_chunks_large_documents() {
    let (_tmp, config_path) = setup_test_env();
    run_docroute(&config_path, &["init"]);

    let (stdout, stderr, success) = run_docroute(&config_path, &["sync", "handbook"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents scanned: 2"), "{}", stdout);
    assert!(stdout.contains("records written: 3"), "{}", stdout);
    assert!(stdout.contains("embeddings pending: 3"), "{}", stdout);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_resync_is_noop() {
    let (_tmp, config_path) = synced_env();

    let (stdout, _, success) = run_docroute(&config_path, &["sync", "all"]);
    assert!(success);
    assert!(stdout.contains("records written: 0"), "{}", stdout);
    assert!(stdout.contains("records unchanged: 3"), "{}", stdout);
    assert!(stdout.contains("records deleted: 0"), "{}", stdout);
}

#[test]
fn test_heading_change_purges_stale_chunk() {
    let (tmp, config_path) = synced_env();
    let (_, _, found) = run_docroute(&config_path, &["get", "guide.md::Usage"]);
    assert!(found);

    fs::write(tmp.path().join("handbook/guide.md"), guide("Operation")).unwrap();
    let (stdout, _, success) = run_docroute(&config_path, &["sync", "handbook"]);
    assert!(success);
    assert!(stdout.contains("records written: 1"), "{}", stdout);
    assert!(stdout.contains("records unchanged: 2"), "{}", stdout);
    assert!(stdout.contains("records deleted: 1"), "{}", stdout);

    let (_, stderr, found) = run_docroute(&config_path, &["get", "guide.md::Usage"]);
    assert!(!found);
    assert!(stderr.contains("not found"), "{}", stderr);
    let (stdout, _, found) = run_docroute(&config_path, &["get", "guide.md::Operation"]);
    assert!(found);
    assert!(stdout.contains("> Guide > Operation"));
}

#[test]
fn test_removed_document_is_pruned() {
    let (tmp, config_path) = synced_env();
    fs::remove_file(tmp.path().join("handbook/guide.md")).unwrap();

    let (stdout, _, success) = run_docroute(&config_path, &["sync", "handbook"]);
    assert!(success);
    assert!(stdout.contains("documents removed: 1"), "{}", stdout);
    assert!(stdout.contains("records deleted: 2"), "{}", stdout);

    let (_, _, found) = run_docroute(&config_path, &["get", "guide.md::Install"]);
    assert!(!found);
}

#[test]
fn test_sync_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    run_docroute(&config_path, &["init"]);

    let (stdout, _, success) = run_docroute(&config_path, &["sync", "all", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("records written: 3"));

    let (stdout, _, success) = run_docroute(&config_path, &["sources", "--json"]);
    assert!(success);
    let sources: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(sources, json!([]));
}

#[test]
fn test_unknown_source() {
    let (_tmp, config_path) = setup_test_env();
    run_docroute(&config_path, &["init"]);

    let (_, stderr, success) = run_docroute(&config_path, &["sync", "wiki"]);
    assert!(!success);
    assert!(stderr.contains("Unknown source"), "{}", stderr);
}

#[test]
fn test_identifier_search_uses_fuzzy_path() {
    let (_tmp, config_path) = synced_env();

    let (stdout, stderr, success) = run_docroute(&config_path, &["search", "NET.Retry.3", "--json"]);
    assert!(success, "search failed: {}", stderr);
    let hits: Value = serde_json::from_str(&stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["filename"], "errors.md");
    assert_eq!(hits[0]["matched_by"], "fuzzy");
    assert_eq!(hits[0]["source_type"], "docs");
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = synced_env();

    let (out1, _, _) = run_docroute(&config_path, &["search", "NET.Retry.3"]);
    let (out2, _, _) = run_docroute(&config_path, &["search", "NET.Retry.3"]);
    assert_eq!(out1, out2);
    assert!(out1.contains("1. [0.90] errors.md"), "{}", out1);
}

#[test]
fn test_search_rejects_bad_input() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_docroute(&config_path, &["search", "   "]);
    assert!(!success);
    assert!(stderr.contains("query must not be empty"), "{}", stderr);

    let (_, stderr, success) =
        run_docroute(&config_path, &["search", "NET.Retry.3", "--source", "wiki"]);
    assert!(!success);
    assert!(stderr.contains("invalid input"), "{}", stderr);

    let (_, _, success) = run_docroute(&config_path, &["search", "NET.Retry.3", "--limit", "0"]);
    assert!(!success);
}

#[test]
fn test_natural_language_search_needs_embeddings() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) =
        run_docroute(&config_path, &["search", "how do I install the agent"]);
    assert!(!success);
    assert!(stderr.contains("embedding provider"), "{}", stderr);
}

#[test]
fn test_get_document() {
    let (_tmp, config_path) = synced_env();

    let (stdout, stderr, success) =
        run_docroute(&config_path, &["get", "guide.md::Install", "--source", "handbook", "--json"]);
    assert!(success, "get failed: {}", stderr);
    let doc: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(doc["filename"], "guide.md::Install");
    assert_eq!(doc["document"], "guide.md");
    assert_eq!(doc["embedded"], false);
    assert_eq!(doc["fingerprint"].as_str().unwrap().len(), 32);
    assert!(doc["content"]
        .as_str()
        .unwrap()
        .starts_with("> Guide > Install\n\n## Install"));
}

#[test]
fn test_get_missing_document() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_docroute(&config_path, &["get", "missing.md"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_sources() {
    let (_tmp, config_path) = synced_env();

    let (stdout, _, success) = run_docroute(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("handbook"));
    assert!(stdout.contains("docs"));

    let (stdout, _, success) = run_docroute(&config_path, &["sources", "--json"]);
    assert!(success);
    let sources: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(
        sources,
        json!([{ "source": "handbook", "source_type": "docs", "count": 3 }])
    );

    let (stdout, _, _) = run_docroute(&config_path, &["sources", "--source-type", "wiki", "--json"]);
    let sources: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(sources, json!([]));
}

#[test]
fn test_embed_pending_errors_when_disabled() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_docroute(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "{}", stderr);
}

#[test]
fn test_chunk_preview() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("handbook/guide.md");

    let (stdout, stderr, success) =
        run_docroute(&config_path, &["chunk", file.to_str().unwrap(), "--json"]);
    assert!(success, "chunk failed: {}", stderr);
    let chunks: Value = serde_json::from_str(&stdout).unwrap();
    let names: Vec<&str> = chunks
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["filename"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names[0].ends_with("guide.md::Install"));
    assert!(names[1].ends_with("guide.md::Usage"));
}

#[test]
fn test_completions() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docroute(&config_path, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("docroute"));
}

// ─── HTTP server ────────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

#[tokio::test]
async fn test_http_tools() {
    let (tmp, _) = setup_test_env();
    let port = find_free_port();
    let bind = format!("127.0.0.1:{}", port);
    let cfg = docroute::config::parse_config(&config_text(tmp.path(), &bind)).unwrap();

    docroute::migrate::run_migrations(&cfg).await.unwrap();
    docroute::ingest::run_sync(&cfg, "all", false).await.unwrap();

    let cfg_clone = cfg.clone();
    let server_handle = tokio::spawn(async move {
        docroute::server::run_server(&cfg_clone).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    // Identifier query
    let resp = client
        .post(format!("{}/tools/search", base))
        .json(&json!({ "query": "NET.Retry.3", "source_type": "docs" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"][0]["filename"], "errors.md");

    // Empty query
    let resp = client
        .post(format!("{}/tools/search", base))
        .json(&json!({ "query": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    // Malformed body keeps the error envelope
    let resp = client
        .post(format!("{}/tools/search", base))
        .json(&json!({ "limit": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    // Natural-language query with embeddings disabled
    let resp = client
        .post(format!("{}/tools/search", base))
        .json(&json!({ "query": "how do I install the agent" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "upstream_error");

    // Lookup
    let resp = client
        .post(format!("{}/tools/get", base))
        .json(&json!({ "filename": "guide.md::Install" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["source"], "handbook");

    let resp = client
        .post(format!("{}/tools/get", base))
        .json(&json!({ "filename": "missing.md" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["result"].is_null());

    let resp = client
        .post(format!("{}/tools/sources", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"][0]["count"], 3);

    server_handle.abort();
}
