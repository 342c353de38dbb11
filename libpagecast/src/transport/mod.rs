//! Raw transport to the remote page platform
//!
//! The executor is the only caller of a [`Transport`]. Implementations turn a
//! [`GraphRequest`] into an HTTP exchange and report network failures as a
//! [`TransportError`] value instead of panicking or propagating foreign
//! error types.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::GraphRequest;

pub mod http;
// Mock transport is available for all builds (not just tests) to support integration tests
pub mod mock;

pub use http::HttpTransport;
pub use mock::MockTransport;

/// Response headers keyed by lower-cased name
pub type Headers = HashMap<String, String>;

/// Response as received, before any governor interpretation
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: serde_json::Value,
}

impl RawResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body,
        }
    }

    /// Add a header; the name is lower-cased
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request failed: {0}")]
    Request(String),
}

/// Normalise a response body
///
/// JSON is kept as is. A non-JSON error body, empty included, becomes
/// `{"error": "<text>"}`. On success an empty body is null and any other
/// non-JSON body becomes a JSON string.
pub fn parse_body(status: u16, text: &str) -> serde_json::Value {
    match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) if status >= 400 => serde_json::json!({ "error": text }),
        Err(_) if text.trim().is_empty() => serde_json::Value::Null,
        Err(_) => serde_json::Value::String(text.to_string()),
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &GraphRequest) -> Result<RawResponse, TransportError>;
}
