//! Page listing and messaging

use futures::future::join_all;
use serde::Serialize;

use super::PageService;
use crate::credentials::Credential;
use crate::error::{CallError, PagecastError, Result};
use crate::types::{ActionKind, GraphRequest};

const CONVERSATION_FIELDS: &str = "id,link,updated_time,unread_count,participants,senders";
const THREAD_FIELDS: &str = "id,link,messages.limit(50){id,created_time,from,to,message,attachments,shares,permalink_url},participants";

/// A page the operator can act on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSummary {
    pub id: String,
    pub name: String,
    #[serde(skip)]
    pub access_token: Option<Credential>,
}

/// Id field that may come back as a string or a number
fn id_of(value: &serde_json::Value) -> Option<String> {
    match value.get("id")? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn data_array(value: &serde_json::Value) -> &[serde_json::Value] {
    value
        .get("data")
        .and_then(|d| d.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Pages listed by a `me/accounts` response
pub fn pages_from_accounts(body: &serde_json::Value) -> Vec<PageSummary> {
    data_array(body)
        .iter()
        .filter_map(|entry| {
            let id = id_of(entry)?;
            let name = entry
                .get("name")
                .and_then(|n| n.as_str())
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| id.clone());
            let access_token = entry
                .get("access_token")
                .and_then(|t| t.as_str())
                .and_then(Credential::new);
            Some(PageSummary {
                id,
                name,
                access_token,
            })
        })
        .collect()
}

/// Who a reply in `thread` should go to
///
/// Walks the messages in order and takes the first `to` participant that is
/// not the page, else the sender of a message the page did not send.
pub fn reply_recipient(page_id: &str, thread: &serde_json::Value) -> Option<String> {
    let messages = thread.get("messages").map(data_array).unwrap_or_default();
    for message in messages {
        let to = message.get("to").map(data_array).unwrap_or_default();
        if let Some(id) = to.iter().filter_map(id_of).find(|id| id != page_id) {
            return Some(id);
        }
        if let Some(id) = message.get("from").and_then(id_of) {
            if id != page_id {
                return Some(id);
            }
        }
    }
    None
}

/// Display name of the other side of a conversation
pub fn counterpart_name(page_id: &str, conversation: &serde_json::Value) -> Option<String> {
    let participants = conversation
        .get("participants")
        .map(data_array)
        .unwrap_or_default();
    participants
        .iter()
        .find(|p| id_of(p).is_some_and(|id| id != page_id))
        .and_then(|p| p.get("name").and_then(|n| n.as_str()))
        .map(str::to_string)
}

impl PageService {
    /// Pages reachable with the configured tokens
    ///
    /// With a stored user token the platform lists them. Otherwise each
    /// inline-mapped page is looked up by id for its name.
    pub async fn list_pages(&self) -> Result<Vec<PageSummary>> {
        let mut lookup_error = None;
        if let Some(user_token) = self.resolver().user_token() {
            let request = GraphRequest::get("me/accounts")
                .param("limit", "200")
                .credential(user_token);
            match self.execute(request).await {
                Ok(response) => return Ok(pages_from_accounts(&response.body)),
                Err(e) => {
                    tracing::warn!("Listing pages via user token failed: {}", e);
                    lookup_error = Some(e);
                }
            }
        }

        let mut inline: Vec<(&String, &String)> = self.resolver().inline_pages().iter().collect();
        if inline.is_empty() {
            let error = lookup_error
                .unwrap_or_else(|| CallError::NoCredential("any page".to_string()));
            return Err(error.into());
        }
        inline.sort();

        let pages = join_all(
            inline
                .into_iter()
                .filter_map(|(id, token)| Some((id.clone(), Credential::new(token.as_str())?)))
                .map(|(id, credential)| async move {
                    let request = GraphRequest::get(id.as_str())
                        .param("fields", "name")
                        .credential(credential.clone())
                        .target(id.as_str());
                    let name = match self.execute(request).await {
                        Ok(response) => response
                            .body
                            .get("name")
                            .and_then(|n| n.as_str())
                            .filter(|n| !n.is_empty())
                            .map(str::to_string),
                        Err(e) => {
                            tracing::debug!(page = %id, "Name lookup failed: {}", e);
                            None
                        }
                    };
                    PageSummary {
                        name: name.unwrap_or_else(|| id.clone()),
                        id,
                        access_token: Some(credential),
                    }
                }),
        )
        .await;
        Ok(pages)
    }

    /// Recent conversations of a page, as returned by the platform
    pub async fn list_conversations(&self, page_id: &str) -> Result<serde_json::Value> {
        let credential = self.resolve_credential(page_id).await?;
        let request = GraphRequest::get(format!("{}/conversations", page_id))
            .param("fields", CONVERSATION_FIELDS)
            .param("limit", "20")
            .credential(credential)
            .target(page_id);
        Ok(self.execute(request).await?.body)
    }

    /// One conversation with its latest 50 messages
    pub async fn get_conversation(&self, page_id: &str, thread_id: &str) -> Result<serde_json::Value> {
        let thread_id = thread_id.trim();
        if thread_id.is_empty() {
            return Err(PagecastError::InvalidInput("Thread id cannot be empty".to_string()));
        }
        let credential = self.resolve_credential(page_id).await?;
        let request = GraphRequest::get(thread_id)
            .param("fields", THREAD_FIELDS)
            .credential(credential)
            .target(page_id);
        Ok(self.execute(request).await?.body)
    }

    /// Send a text reply from the page to `recipient_id`
    pub async fn send_message(
        &self,
        page_id: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<serde_json::Value> {
        let recipient_id = recipient_id.trim();
        let text = text.trim();
        if recipient_id.is_empty() || text.is_empty() {
            return Err(PagecastError::InvalidInput(
                "Recipient and text are required".to_string(),
            ));
        }

        let credential = self.resolve_credential(page_id).await?;
        let content = format!("{}\n{}", recipient_id, text);
        self.check_duplicate(ActionKind::Message, page_id, &content)?;

        let request = GraphRequest::post(format!("{}/messages", page_id))
            .param("recipient", serde_json::json!({ "id": recipient_id }).to_string())
            .param("message", serde_json::json!({ "text": text }).to_string())
            .param("messaging_type", "RESPONSE")
            .credential(credential)
            .target(page_id);
        let body = self
            .execute_admitted(ActionKind::Message, page_id, &content, request)
            .await?
            .body;
        tracing::info!(page = page_id, "Message sent");
        Ok(body)
    }
}
