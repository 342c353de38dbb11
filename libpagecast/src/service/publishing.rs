//! Publishing to page feeds
//!
//! Each publish resolves the page token, then passes the duplicate guard,
//! then issues one governed call. Feed posts and videos get a best-effort
//! permalink lookup afterwards.

use futures::future::join_all;
use serde::Serialize;

use super::PageService;
use crate::credentials::Credential;
use crate::dedup::media_content;
use crate::error::{PagecastError, Result};
use crate::types::{ActionKind, GraphRequest, MediaPart, PublishOutcome};

/// What to publish
#[derive(Debug, Clone)]
pub enum PublishRequest {
    Feed { message: String },
    Photo { media: MediaPart, caption: String },
    Video { media: MediaPart, description: String },
    Reel { media: MediaPart, description: String },
}

impl PublishRequest {
    pub fn kind(&self) -> ActionKind {
        match self {
            PublishRequest::Feed { .. } => ActionKind::Feed,
            PublishRequest::Photo { .. } => ActionKind::Photo,
            PublishRequest::Video { .. } => ActionKind::Video,
            PublishRequest::Reel { .. } => ActionKind::Reel,
        }
    }
}

/// A successful publish
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Published {
    pub page_id: String,
    pub kind: ActionKind,
    pub post_id: Option<String>,
    pub permalink_url: Option<String>,
    /// Platform response, unmodified
    pub body: serde_json::Value,
}

fn string_field(body: &serde_json::Value, key: &str) -> Option<String> {
    match body.get(key)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn require_media(media: &MediaPart) -> Result<()> {
    if media.bytes.is_empty() {
        return Err(PagecastError::InvalidInput(format!(
            "Media file '{}' is empty",
            media.file_name
        )));
    }
    Ok(())
}

impl PublishOutcome {
    pub fn from_result(page_id: &str, result: &Result<Published>) -> Self {
        match result {
            Ok(published) => Self {
                page_id: page_id.to_string(),
                success: true,
                post_id: published.post_id.clone(),
                permalink_url: published.permalink_url.clone(),
                error: None,
                exit_code: 0,
            },
            Err(e) => Self {
                page_id: page_id.to_string(),
                success: false,
                post_id: None,
                permalink_url: None,
                error: Some(match e {
                    PagecastError::Call(call) => call.user_message(),
                    other => other.to_string(),
                }),
                exit_code: e.exit_code(),
            },
        }
    }
}

impl PageService {
    /// Publish a text post to a page feed
    pub async fn publish_feed(&self, page_id: &str, message: &str) -> Result<Published> {
        self.publish(
            page_id,
            &PublishRequest::Feed {
                message: message.to_string(),
            },
        )
        .await
    }

    pub async fn publish_photo(
        &self,
        page_id: &str,
        media: MediaPart,
        caption: &str,
    ) -> Result<Published> {
        self.publish(
            page_id,
            &PublishRequest::Photo {
                media,
                caption: caption.to_string(),
            },
        )
        .await
    }

    pub async fn publish_video(
        &self,
        page_id: &str,
        media: MediaPart,
        description: &str,
    ) -> Result<Published> {
        self.publish(
            page_id,
            &PublishRequest::Video {
                media,
                description: description.to_string(),
            },
        )
        .await
    }

    pub async fn publish_reel(
        &self,
        page_id: &str,
        media: MediaPart,
        description: &str,
    ) -> Result<Published> {
        self.publish(
            page_id,
            &PublishRequest::Reel {
                media,
                description: description.to_string(),
            },
        )
        .await
    }

    /// Publish `request` to one page
    pub async fn publish(&self, page_id: &str, request: &PublishRequest) -> Result<Published> {
        let page_id = page_id.trim();
        if page_id.is_empty() {
            return Err(PagecastError::InvalidInput("Page id cannot be empty".to_string()));
        }

        // Validate before resolving so bad input never costs a lookup
        let (graph_request, fingerprint_input) = match request {
            PublishRequest::Feed { message } => {
                let message = message.trim();
                if message.is_empty() {
                    return Err(PagecastError::InvalidInput(
                        "Message cannot be empty".to_string(),
                    ));
                }
                (
                    GraphRequest::post(format!("{}/feed", page_id)).param("message", message),
                    message.to_string(),
                )
            }
            PublishRequest::Photo { media, caption } => {
                require_media(media)?;
                (
                    GraphRequest::multipart(format!("{}/photos", page_id))
                        .param("caption", caption.as_str())
                        .param("published", "true")
                        .media(media.clone()),
                    media_content(caption, &media.bytes),
                )
            }
            PublishRequest::Video { media, description }
            | PublishRequest::Reel { media, description } => {
                require_media(media)?;
                (
                    GraphRequest::multipart(format!("{}/videos", page_id))
                        .param("description", description.as_str())
                        .media(media.clone()),
                    media_content(description, &media.bytes),
                )
            }
        };

        let kind = request.kind();
        let credential = self.resolve_credential(page_id).await?;
        self.check_duplicate(kind, page_id, &fingerprint_input)?;

        let response = self
            .execute_admitted(
                kind,
                page_id,
                &fingerprint_input,
                graph_request.credential(credential.clone()).target(page_id),
            )
            .await?;
        let body = response.body;

        let post_id = match kind {
            ActionKind::Photo => string_field(&body, "post_id").or_else(|| string_field(&body, "id")),
            _ => string_field(&body, "id"),
        };
        let permalink_object = match kind {
            ActionKind::Feed => string_field(&body, "id"),
            ActionKind::Video => string_field(&body, "id").or_else(|| string_field(&body, "video_id")),
            _ => None,
        };
        let permalink_url = match permalink_object {
            Some(object_id) => self.permalink(page_id, &object_id, &credential).await,
            None => None,
        };

        tracing::info!(page = page_id, kind = %kind, post_id = ?post_id, "Published");
        Ok(Published {
            page_id: page_id.to_string(),
            kind,
            post_id,
            permalink_url,
            body,
        })
    }

    /// Best-effort permalink lookup; failures only log
    async fn permalink(&self, page_id: &str, object_id: &str, credential: &Credential) -> Option<String> {
        let request = GraphRequest::get(object_id)
            .param("fields", "permalink_url")
            .credential(credential.clone())
            .target(page_id);
        match self.execute(request).await {
            Ok(response) => string_field(&response.body, "permalink_url"),
            Err(e) => {
                tracing::debug!(page = page_id, "Permalink lookup failed: {}", e);
                None
            }
        }
    }

    /// Publish the same request to several pages concurrently
    ///
    /// Returns one outcome per page in input order.
    pub async fn publish_many(&self, page_ids: &[String], request: &PublishRequest) -> Vec<PublishOutcome> {
        join_all(page_ids.iter().map(|page_id| async move {
            let result = self.publish(page_id, request).await;
            PublishOutcome::from_result(page_id, &result)
        }))
        .await
    }

    pub async fn publish_feed_many(&self, page_ids: &[String], message: &str) -> Vec<PublishOutcome> {
        self.publish_many(
            page_ids,
            &PublishRequest::Feed {
                message: message.to_string(),
            },
        )
        .await
    }
}
