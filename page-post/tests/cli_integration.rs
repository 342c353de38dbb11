//! CLI integration tests for page-post

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Command isolated from the user's config, token store and log settings
fn page_post(dir: &TempDir, graph_base: &str, page_tokens: &str) -> Command {
    let mut cmd = Command::cargo_bin("page-post").unwrap();
    cmd.env("PAGECAST_CONFIG", dir.path().join("config.toml"))
        .env("TOKENS_FILE", dir.path().join("tokens.json"))
        .env("PAGE_TOKENS", page_tokens)
        .env("GRAPH_BASE", graph_base)
        .env("GRAPH_MIN_INTERVAL_GLOBAL", "0")
        .env("GRAPH_MIN_INTERVAL_PAGE", "0")
        .env("PAGECAST_LOG_LEVEL", "error")
        .env_remove("RUST_LOG");
    cmd
}

/// Run a blocking command while the mock server keeps serving
async fn run(mut cmd: Command) -> assert_cmd::assert::Assert {
    tokio::task::spawn_blocking(move || cmd.assert())
        .await
        .unwrap()
}

#[test]
fn test_help_flag_output() {
    Command::cargo_bin("page-post")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Publish posts and media to managed pages"))
        .stdout(predicate::str::contains("--page"))
        .stdout(predicate::str::contains("--kind"))
        .stdout(predicate::str::contains("--format"))
        .stdout(predicate::str::contains("EXIT CODES"));
}

#[test]
fn test_page_is_required() {
    Command::cargo_bin("page-post")
        .unwrap()
        .arg("hello")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--page"));
}

#[test]
fn test_no_token_exits_2() {
    let dir = TempDir::new().unwrap();
    page_post(&dir, "http://127.0.0.1:9", "")
        .args(["--page", "111", "hello"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No access token configured for page 111"));
}

#[test]
fn test_empty_message_exits_3() {
    let dir = TempDir::new().unwrap();
    page_post(&dir, "http://127.0.0.1:9", "111|tok")
        .args(["--page", "111"])
        .write_stdin("   \n")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Message cannot be empty"));
}

#[test]
fn test_photo_without_media_exits_3() {
    let dir = TempDir::new().unwrap();
    page_post(&dir, "http://127.0.0.1:9", "111|tok")
        .args(["--page", "111", "--kind", "photo", "caption"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("requires --media"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_feed_post_with_permalink() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/111/feed"))
        .and(header("authorization", "Bearer tok-111"))
        .and(body_string_contains("message=Hello+pages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "111_5"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/111_5"))
        .and(query_param("fields", "permalink_url"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"id": "111_5", "permalink_url": "https://example.com/111/posts/5"}),
        ))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut cmd = page_post(&dir, &server.uri(), "111|tok-111");
    cmd.args(["--page", "111", "Hello pages"]);

    run(cmd)
        .await
        .success()
        .stdout(predicate::str::contains("111:111_5 https://example.com/111/posts/5"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_json_output_per_page() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/111/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut cmd = page_post(&dir, &server.uri(), "111|a");
    cmd.args(["-p", "111", "-p", "222", "--format", "json", "Hi"]);

    let output = run(cmd).await.code(2).get_output().stdout.clone();
    let outcomes: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let outcomes = outcomes.as_array().unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0]["page_id"], "111");
    assert_eq!(outcomes[0]["success"], true);
    assert_eq!(outcomes[1]["page_id"], "222");
    assert_eq!(outcomes[1]["success"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_long_throttle_exits_4() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/111/feed"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "30")
                .set_body_json(serde_json::json!({"error": {"message": "Too many calls", "code": 4}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut cmd = page_post(&dir, &server.uri(), "111|tok");
    cmd.args(["--page", "111", "Busy"]);

    run(cmd)
        .await
        .code(4)
        .stderr(predicate::str::contains("Try again in 30 seconds"))
        .stderr(predicate::str::contains("cooldown active"));
}
