//! End-to-end governor behaviour over real HTTP against a mock platform

use std::sync::Arc;
use std::time::Duration;

use libpagecast::{ApiExecutor, CallError, GovernorConfig, GraphRequest, HttpTransport, PageService};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_config(base: &str, dir: &tempfile::TempDir) -> GovernorConfig {
    GovernorConfig {
        graph_base: base.to_string(),
        tokens_file: dir.path().join("tokens.json").to_string_lossy().to_string(),
        page_tokens: "42|page-token".to_string(),
        min_interval_global_secs: 0.0,
        min_interval_target_secs: 0.0,
        ..Default::default()
    }
}

fn executor(config: &GovernorConfig) -> ApiExecutor {
    let transport = HttpTransport::new(config.base_url()).unwrap();
    ApiExecutor::new(config, Arc::new(transport))
}

#[tokio::test]
async fn test_short_retry_after_is_retried_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/42"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "42"})))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let exec = executor(&fast_config(&server.uri(), &dir));

    let started = std::time::Instant::now();
    let response = exec.execute(GraphRequest::get("42")).await.unwrap();
    assert_eq!(response.body["id"], "42");
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_usage_header_blocks_following_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-app-usage", r#"{"call_count":91,"total_cputime":12,"total_time":8}"#)
                .set_body_json(serde_json::json!({})),
        )
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let exec = executor(&fast_config(&server.uri(), &dir));

    exec.execute(GraphRequest::get("42")).await.unwrap();
    let err = exec.execute(GraphRequest::get("42")).await.unwrap_err();
    match err {
        CallError::RateLimited { retry_after_secs } => assert!(retry_after_secs >= 299),
        other => panic!("Expected RateLimited, got {:?}", other),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(exec.usage().snapshot().app, Some(91.0));
}

#[tokio::test]
async fn test_platform_error_body_passes_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/42/feed"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let service = PageService::new(
        &fast_config(&server.uri(), &dir),
        Arc::new(HttpTransport::new(server.uri()).unwrap()),
    );

    let err = service.publish_feed("42", "Hello").await.unwrap_err();
    match err {
        libpagecast::PagecastError::Call(CallError::Platform { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, serde_json::json!({"error": "<html>oops</html>"}));
        }
        other => panic!("Expected Platform error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_user_token_lookup_is_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"id": "77", "name": "Cafe", "access_token": "tok-77"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/77/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("tokens.json"),
        r#"{"user_long": {"access_token": "user-tok", "expires_in": 5183944}}"#,
    )
    .unwrap();

    let mut config = fast_config(&server.uri(), &dir);
    config.page_tokens = String::new();
    let service = PageService::new(&config, Arc::new(HttpTransport::new(server.uri()).unwrap()));

    service.publish_feed("77", "first").await.unwrap();
    service.publish_feed("77", "second").await.unwrap();

    let stored: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("tokens.json")).unwrap()).unwrap();
    assert_eq!(stored["pages"]["77"], "tok-77");
    assert_eq!(stored["user_long"]["expires_in"], 5183944);
}
