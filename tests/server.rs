//! Integration tests for the HTTP server and for [`GitHubSource`] against a
//! local fake of the GitHub REST API.

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use commit_tracker::analyzer::HeuristicAnalyzer;
use commit_tracker::config::Config;
use commit_tracker::error::FetchError;
use commit_tracker::pipeline::{Pipeline, PipelineSettings};
use commit_tracker::server::{router, run_server};
use commit_tracker::service::IngestionService;
use commit_tracker::source::{CommitSource, GitHubSource};
use commit_tracker::store::{CommitStore, SqliteCommitStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TOKEN: &str = "test-token";

// ─── Fake GitHub API ────────────────────────────────────────────────

fn fake_commit(sha: &str, message: &str) -> Value {
    json!({
        "sha": sha,
        "commit": {
            "message": message,
            "author": {
                "name": "Dev One",
                "email": "one@example.com",
                "date": "2025-08-15T11:29:38Z"
            }
        }
    })
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("token {}", TOKEN))
        .unwrap_or(false)
}

async fn list_commits(
    Path((owner, name)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "Bad credentials"})));
    }
    if owner != "acme" || name != "widgets" {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "Not Found"})));
    }
    if params.get("sha").map(String::as_str) != Some("main") {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"message": "bad branch"})));
    }

    let per_page: usize = params
        .get("per_page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(30);
    let commits: Vec<Value> = vec![
        fake_commit("c3", "Fix crash on startup"),
        fake_commit("c2", "Add export command"),
        json!({"sha": "broken", "commit": {"message": "no author"}}),
        fake_commit("c1", "Initial commit"),
    ]
    .into_iter()
    .take(per_page)
    .collect();
    (StatusCode::OK, Json(Value::Array(commits)))
}

async fn commit_detail(
    Path((_owner, _name, sha)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "Bad credentials"})));
    }
    if sha == "slow" {
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
    if !["c1", "c2", "c3", "slow"].contains(&sha.as_str()) {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "No commit found"})));
    }

    let mut commit = fake_commit(&sha, "detail message");
    commit["files"] = json!([
        {"filename": "src/main.rs", "status": "modified", "additions": 4, "deletions": 1, "changes": 5, "patch": "@@ -1 +1 @@"},
        {"filename": "docs/export.md", "status": "added", "additions": 20, "deletions": 0, "changes": 20}
    ]);
    (StatusCode::OK, Json(commit))
}

async fn spawn_fake_github() -> String {
    let app = Router::new()
        .route("/repos/{owner}/{name}/commits", get(list_commits))
        .route("/repos/{owner}/{name}/commits/{sha}", get(commit_detail));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config(tmp: &TempDir, api_url: &str, port: u16) -> Config {
    let toml_str = format!(
        r#"
[db]
path = "{}/commits.sqlite"

[source]
repository = "acme/widgets"
api_url = "{}"
token_env = "CTRACK_TEST_TOKEN_NEVER_SET"
page_size = 10
detail_limit = 2
timeout_secs = 1

[server]
bind = "127.0.0.1:{}"
"#,
        tmp.path().display(),
        api_url,
        port
    );
    toml::from_str(&toml_str).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Service wired to the fake GitHub API, served on an ephemeral port.
async fn serve_with_github(tmp: &TempDir) -> (String, Arc<SqliteCommitStore>) {
    let api_url = spawn_fake_github().await;
    let cfg = test_config(tmp, &api_url, 0);
    let store = Arc::new(SqliteCommitStore::open(&cfg).await.unwrap());
    let source = GitHubSource::with_token(&cfg.source, TOKEN.to_string()).unwrap();
    let pipeline = Pipeline::new(
        Arc::new(source),
        store.clone(),
        Arc::new(HeuristicAnalyzer::new()),
        PipelineSettings::from_config(&cfg).unwrap(),
    );
    let service = IngestionService::new(Ok(Arc::new(pipeline)), store.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(service)).await.unwrap();
    });
    (format!("http://{}", addr), store)
}

// ─── GitHubSource ───────────────────────────────────────────────────

#[tokio::test]
async fn test_github_list_skips_malformed_entries() {
    let tmp = TempDir::new().unwrap();
    let api_url = spawn_fake_github().await;
    let cfg = test_config(&tmp, &api_url, 0);
    let source = GitHubSource::with_token(&cfg.source, TOKEN.to_string()).unwrap();

    let commits = source.list_commits("acme/widgets").await.unwrap();
    let revs: Vec<&str> = commits.iter().map(|c| c.revision_id.as_str()).collect();
    assert_eq!(revs, vec!["c3", "c2", "c1"]);
    assert!(commits.iter().all(|c| c.files.is_empty()));
}

#[tokio::test]
async fn test_github_detail_carries_files() {
    let tmp = TempDir::new().unwrap();
    let api_url = spawn_fake_github().await;
    let cfg = test_config(&tmp, &api_url, 0);
    let source = GitHubSource::with_token(&cfg.source, TOKEN.to_string()).unwrap();

    let detail = source.get_commit_detail("acme/widgets", "c2").await.unwrap();
    assert_eq!(detail.files.len(), 2);
    assert_eq!(detail.files[1].file_name(), "export.md");
    assert_eq!(detail.files[1].extension(), Some("md"));
}

#[tokio::test]
async fn test_github_errors_are_classified() {
    let tmp = TempDir::new().unwrap();
    let api_url = spawn_fake_github().await;
    let cfg = test_config(&tmp, &api_url, 0);

    let source = GitHubSource::with_token(&cfg.source, TOKEN.to_string()).unwrap();
    let err = source.get_commit_detail("acme/widgets", "nope").await.unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 404, .. }), "{}", err);

    let err = source.list_commits("acme/unknown").await.unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 404, .. }), "{}", err);

    let err = source.get_commit_detail("acme/widgets", "slow").await.unwrap_err();
    assert!(matches!(err, FetchError::Timeout(1)), "{}", err);

    let bad = GitHubSource::with_token(&cfg.source, "wrong".to_string()).unwrap();
    let err = bad.list_commits("acme/widgets").await.unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 401, .. }), "{}", err);

    let mut down = cfg.source.clone();
    down.api_url = format!("http://127.0.0.1:{}", find_free_port());
    let unreachable = GitHubSource::with_token(&down, TOKEN.to_string()).unwrap();
    let err = unreachable.list_commits("acme/widgets").await.unwrap_err();
    assert!(matches!(err, FetchError::Unreachable(_)), "{}", err);
}

// ─── HTTP server ────────────────────────────────────────────────────

#[tokio::test]
async fn test_ingest_endpoint_runs_cycle_in_background() {
    let tmp = TempDir::new().unwrap();
    let (base, store) = serve_with_github(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client.post(format!("{}/ingest", base)).send().await.unwrap();
    assert_eq!(resp.status(), 202);
    let ack: Value = resp.json().await.unwrap();
    assert_eq!(ack["repository"], "acme/widgets");

    let mut total = 0;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        total = store.statistics().await.unwrap().total_commits;
        if total == 3 {
            break;
        }
    }
    assert_eq!(total, 3);

    let body: Value = client
        .get(format!("{}/commits?limit=10", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let commits = body["commits"].as_array().unwrap();
    assert_eq!(commits.len(), 3);
    let with_files = commits
        .iter()
        .filter(|c| c["files_changed"].as_i64() == Some(2))
        .count();
    assert_eq!(with_files, 2);
    assert!(commits.iter().all(|c| c["annotation"].is_object()));

    let stats: Value = client
        .get(format!("{}/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_commits"], 3);
    assert_eq!(stats["distinct_repositories"], json!(["acme/widgets"]));
    assert!(stats["last_checkpoint_time"].is_string());
}

#[tokio::test]
async fn test_commits_endpoint_validates_limit() {
    let tmp = TempDir::new().unwrap();
    let (base, _store) = serve_with_github(&tmp).await;
    let client = reqwest::Client::new();

    for limit in ["0", "5000"] {
        let resp = client
            .get(format!("{}/commits?limit={}", base, limit))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }

    let resp = client
        .get(format!("{}/commits?repository=acme/other", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["commits"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_analyze_endpoint_annotates_without_storing() {
    let tmp = TempDir::new().unwrap();
    let (base, store) = serve_with_github(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/analyze", base))
        .json(&json!({ "message": "fix: critical security vulnerability" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["analysis"]["priority"], "high");
    let categories = body["analysis"]["categories"].as_array().unwrap();
    assert!(categories.contains(&json!("bug_fix")));
    assert!(categories.contains(&json!("security")));
    assert!(body["analysis"]["confidence_score"].as_f64().unwrap() > 0.0);
    assert!(body["timestamp"].is_string());

    assert_eq!(store.statistics().await.unwrap().total_commits, 0);

    for payload in [json!({ "message": "   " }), json!({ "text": "fix" })] {
        let resp = client
            .post(format!("{}/analyze", base))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }
}

#[tokio::test]
async fn test_server_without_credential_serves_queries() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "http://127.0.0.1:9", port);

    tokio::spawn(async move {
        run_server(&cfg).await.unwrap();
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
    assert_eq!(health["source_configured"], false);
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

    let resp = client.post(format!("{}/ingest", base)).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "configuration_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("CTRACK_TEST_TOKEN_NEVER_SET"));

    let stats: Value = client
        .get(format!("{}/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        stats,
        json!({
            "total_commits": 0,
            "annotated_count": 0,
            "distinct_repositories": [],
            "last_checkpoint_time": null
        })
    );
}
