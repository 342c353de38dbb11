//! Core types for Pagecast

use std::path::Path;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::credentials::Credential;
use crate::error::{PagecastError, Result};

/// Kind of write action guarded against accidental repetition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Feed,
    Photo,
    Video,
    Reel,
    Message,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Reel => "reel",
            Self::Message => "message",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "feed" => Ok(Self::Feed),
            "photo" => Ok(Self::Photo),
            "video" => Ok(Self::Video),
            "reel" => Ok(Self::Reel),
            "message" => Ok(Self::Message),
            _ => Err(format!(
                "Invalid kind: '{}'. Valid options: feed, photo, video, reel, message",
                s
            )),
        }
    }
}

/// HTTP shape of a platform call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    /// Form-encoded POST
    Post,
    /// multipart/form-data POST carrying media
    Multipart,
}

impl Method {
    /// Transport timeout for this kind of call
    pub fn timeout(&self) -> Duration {
        match self {
            Method::Get => Duration::from_secs(60),
            Method::Post => Duration::from_secs(180),
            Method::Multipart => Duration::from_secs(600),
        }
    }
}

/// A media file attached to a multipart call
#[derive(Debug, Clone)]
pub struct MediaPart {
    /// Form field name (the platform expects "source")
    pub field: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl MediaPart {
    pub fn source(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            field: "source".to_string(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read a media file from disk as a `source` part
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            PagecastError::InvalidInput(format!("Cannot read media file {}: {}", path.display(), e))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::source(file_name, mime_for_path(path), bytes))
    }
}

/// Content type from the file extension, `application/octet-stream` if unknown
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "m4v" => "video/x-m4v",
        _ => "application/octet-stream",
    }
}

/// Everything the executor needs to issue one platform call
#[derive(Debug, Clone)]
pub struct GraphRequest {
    pub method: Method,
    /// Path relative to the platform base URL, without a leading slash
    pub path: String,
    /// Query parameters for GET, form fields otherwise
    pub params: Vec<(String, String)>,
    pub media: Vec<MediaPart>,
    pub credential: Option<Credential>,
    /// Page the call acts on; selects the per-target throttle key
    pub target: Option<String>,
}

impl GraphRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn multipart(path: impl Into<String>) -> Self {
        Self::new(Method::Multipart, path)
    }

    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into().trim_start_matches('/').to_string(),
            params: Vec::new(),
            media: Vec::new(),
            credential: None,
            target: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn media(mut self, part: MediaPart) -> Self {
        self.media.push(part);
        self
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Bearer header value, if a credential is attached
    pub fn bearer(&self) -> Option<String> {
        self.credential
            .as_ref()
            .map(|c| format!("Bearer {}", c.secret().expose_secret()))
    }
}

/// Successful platform response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Result of publishing to one page as part of a batch
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub page_id: String,
    pub success: bool,
    /// Platform object id of the new post
    pub post_id: Option<String>,
    pub permalink_url: Option<String>,
    pub error: Option<String>,
    /// Process exit code this outcome maps to, 0 on success
    #[serde(skip)]
    pub exit_code: i32,
}
