//! Mock transport for testing
//!
//! Replays scripted responses instead of touching the network and records
//! every request it sees, so tests can assert on call counts, spacing and
//! the exact parameters the governor sent.
//!
//! Replies are chosen in this order: a route registered for the exact path,
//! then the next queued reply, then the fallback (`200 {"id": "mock-<uuid>"}`).

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::{RawResponse, Transport, TransportError};
use crate::types::{GraphRequest, Method};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    Response(RawResponse),
    Failure(TransportError),
}

/// A request as seen by the mock
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub target: Option<String>,
    /// Whether a bearer credential was attached
    pub authorized: bool,
    pub media_count: usize,
    pub at: Instant,
}

impl RecordedCall {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Mock transport; clones share the same script and call log
#[derive(Clone, Default)]
pub struct MockTransport {
    queue: Arc<Mutex<VecDeque<MockReply>>>,
    routes: Arc<Mutex<HashMap<String, MockReply>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    delay: Duration,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that waits before every reply
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Queue a response for the next unrouted call
    pub fn push(&self, response: RawResponse) -> &Self {
        self.queue
            .lock()
            .unwrap()
            .push_back(MockReply::Response(response));
        self
    }

    pub fn push_json(&self, status: u16, body: serde_json::Value) -> &Self {
        self.push(RawResponse::json(status, body))
    }

    /// Queue a network failure for the next unrouted call
    pub fn push_failure(&self, error: TransportError) -> &Self {
        self.queue
            .lock()
            .unwrap()
            .push_back(MockReply::Failure(error));
        self
    }

    /// Always answer calls to `path` with `response`
    pub fn route(&self, path: &str, response: RawResponse) -> &Self {
        self.routes.lock().unwrap().insert(
            path.trim_start_matches('/').to_string(),
            MockReply::Response(response),
        );
        self
    }

    pub fn route_json(&self, path: &str, status: u16, body: serde_json::Value) -> &Self {
        self.route(path, RawResponse::json(status, body))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Calls whose path equals `path`
    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.path == path)
            .collect()
    }

    fn next_reply(&self, path: &str) -> MockReply {
        if let Some(reply) = self.routes.lock().unwrap().get(path) {
            return reply.clone();
        }
        self.queue.lock().unwrap().pop_front().unwrap_or_else(|| {
            MockReply::Response(RawResponse::json(
                200,
                serde_json::json!({ "id": format!("mock-{}", uuid::Uuid::new_v4()) }),
            ))
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &GraphRequest) -> Result<RawResponse, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: request.method,
            path: request.path.clone(),
            params: request.params.clone(),
            target: request.target.clone(),
            authorized: request.credential.is_some(),
            media_count: request.media.len(),
            at: Instant::now(),
        });

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match self.next_reply(&request.path) {
            MockReply::Response(response) => Ok(response),
            MockReply::Failure(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fallback_reply() {
        let transport = MockTransport::new();
        let response = transport.send(&GraphRequest::get("42")).await.unwrap();

        assert_eq!(response.status, 200);
        assert!(response.body["id"].as_str().unwrap().starts_with("mock-"));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_queue_is_consumed_in_order() {
        let transport = MockTransport::new();
        transport
            .push_json(429, serde_json::json!({"error": "slow down"}))
            .push_json(200, serde_json::json!({"id": "second"}));

        let first = transport.send(&GraphRequest::get("a")).await.unwrap();
        let second = transport.send(&GraphRequest::get("b")).await.unwrap();
        assert_eq!(first.status, 429);
        assert_eq!(second.body["id"], "second");
    }

    #[tokio::test]
    async fn test_route_wins_over_queue() {
        let transport = MockTransport::new();
        transport.push_json(500, serde_json::json!({}));
        transport.route_json("/me/accounts", 200, serde_json::json!({"data": []}));

        let routed = transport.send(&GraphRequest::get("me/accounts")).await.unwrap();
        assert_eq!(routed.status, 200);
        // Route is persistent
        let again = transport.send(&GraphRequest::get("me/accounts")).await.unwrap();
        assert_eq!(again.status, 200);

        let queued = transport.send(&GraphRequest::get("other")).await.unwrap();
        assert_eq!(queued.status, 500);
    }

    #[tokio::test]
    async fn test_failure_and_recording() {
        let transport = MockTransport::new();
        transport.push_failure(TransportError::Timeout("read".to_string()));

        let request = GraphRequest::post("42/feed")
            .param("message", "hi")
            .target("42");
        let err = transport.send(&request).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));

        let calls = transport.calls_to("42/feed");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].param("message"), Some("hi"));
        assert_eq!(calls[0].target.as_deref(), Some("42"));
        assert!(!calls[0].authorized);
    }
}
