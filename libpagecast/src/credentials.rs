//! Page token resolution
//!
//! A page token is looked up from three sources, first match wins:
//!
//! 1. The inline `PAGE_TOKENS` mapping from configuration
//! 2. The `pages` map of the persisted JSON token store
//! 3. A `me/accounts` lookup using the long-lived user token in the store,
//!    whose results are merged back into the store for next time
//!
//! Absence of a token is reported as `None`; it never raises an error.
//!
//! # Token store format
//!
//! ```json
//! {
//!   "user_long": { "access_token": "EAAB..." },
//!   "pages": { "1234567890": "EAAG..." }
//! }
//! ```

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::GovernorConfig;
use crate::error::{Result, StoreError};

/// Opaque bearer token for a page or user
///
/// Never empty. The secret is zeroed on drop and redacted from `Debug`.
#[derive(Clone)]
pub struct Credential(Arc<SecretString>);

impl Credential {
    /// Wrap a token, returning `None` for an empty or whitespace-only string
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return None;
        }
        Some(Self(Arc::new(SecretString::from(token))))
    }

    pub fn secret(&self) -> &SecretString {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential([REDACTED])")
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.0.expose_secret() == other.0.expose_secret()
    }
}

/// Parse the inline page token mapping
///
/// Accepts either a JSON object (`{"42": "tok"}`) or lines/comma-separated
/// entries of `id|token`, `id:token` or `id=token`.
pub fn parse_inline_tokens(raw: &str) -> HashMap<String, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return HashMap::new();
    }

    if raw.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
            return match value {
                serde_json::Value::Object(map) => map
                    .into_iter()
                    .filter_map(|(id, tok)| tok.as_str().map(|t| (id, t.to_string())))
                    .collect(),
                _ => HashMap::new(),
            };
        }
        // Not valid JSON, try the line format instead
    }

    let mut tokens = HashMap::new();
    for line in raw.split(|c: char| c == '\n' || c == ',') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        for sep in ['|', ':', '='] {
            if let Some((id, tok)) = line.split_once(sep) {
                tokens.insert(id.trim().to_string(), tok.trim().to_string());
                break;
            }
        }
    }
    tokens
}

/// Long-lived user token section of the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserToken {
    #[serde(default)]
    pub access_token: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// On-disk token store document
///
/// Unknown keys are carried through a rewrite untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_long: Option<UserToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenDocument {
    pub fn page_token(&self, page_id: &str) -> Option<&str> {
        self.pages
            .as_ref()
            .and_then(|pages| pages.get(page_id))
            .map(String::as_str)
    }

    pub fn user_token(&self) -> Option<&str> {
        self.user_long
            .as_ref()
            .map(|u| u.access_token.as_str())
            .filter(|t| !t.is_empty())
    }
}

/// JSON file holding page tokens and the long-lived user token
pub struct TokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole document; a missing file is an empty document
    pub fn load(&self) -> Result<TokenDocument> {
        if !self.path.exists() {
            return Ok(TokenDocument::default());
        }
        let content = std::fs::read_to_string(&self.path).map_err(StoreError::Io)?;
        if content.trim().is_empty() {
            return Ok(TokenDocument::default());
        }
        let doc = serde_json::from_str(&content).map_err(StoreError::Json)?;
        Ok(doc)
    }

    /// Add newly discovered page tokens, keeping every existing entry
    ///
    /// The file is rewritten via a sibling temp file and a rename.
    pub fn merge_pages(&self, discovered: &HashMap<String, String>) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut doc = self.load()?;
        let pages = doc.pages.get_or_insert_with(BTreeMap::new);
        for (id, token) in discovered {
            pages.insert(id.clone(), token.clone());
        }

        let json = serde_json::to_string_pretty(&doc).map_err(StoreError::Json)?;
        write_atomic(&self.path, json.as_bytes())?;

        tracing::debug!(
            "Stored {} page token(s) in {:?}",
            discovered.len(),
            self.path
        );
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents).map_err(StoreError::Io)?;

    // Set file permissions to 600 on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&tmp, perms).map_err(StoreError::Io)?;
    }

    std::fs::rename(&tmp, path).map_err(StoreError::Io)?;
    Ok(())
}

/// Source of page tokens owned by a user token
///
/// Implemented by the executor (a governed `me/accounts` call) and by test
/// doubles. `None` means the lookup failed or returned nothing usable.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn page_tokens(&self, user_token: &Credential) -> Option<HashMap<String, String>>;
}

/// Extract `{id: access_token}` pairs from a `me/accounts` response body
pub fn page_tokens_from_accounts(body: &serde_json::Value) -> HashMap<String, String> {
    let mut pages = HashMap::new();
    let Some(entries) = body.get("data").and_then(|d| d.as_array()) else {
        return pages;
    };
    for entry in entries {
        let id = match entry.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        let token = entry
            .get("access_token")
            .and_then(|t| t.as_str())
            .unwrap_or_default();
        if !id.is_empty() && !token.is_empty() {
            pages.insert(id, token.to_string());
        }
    }
    pages
}

/// Resolves the credential to use for a page
pub struct TokenResolver {
    inline: HashMap<String, String>,
    store: TokenStore,
}

impl TokenResolver {
    pub fn new(inline: HashMap<String, String>, store: TokenStore) -> Self {
        Self { inline, store }
    }

    pub fn from_config(config: &GovernorConfig) -> Self {
        Self::new(
            parse_inline_tokens(&config.page_tokens),
            TokenStore::new(config.tokens_path()),
        )
    }

    /// Pages configured through the inline mapping
    pub fn inline_pages(&self) -> &HashMap<String, String> {
        &self.inline
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Store contents, or an empty document when the store is unreadable
    fn load_store(&self) -> TokenDocument {
        self.store.load().unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable token store {:?}: {}", self.store.path(), e);
            TokenDocument::default()
        })
    }

    /// Long-lived user token from the store, if any
    pub fn user_token(&self) -> Option<Credential> {
        self.load_store().user_token().and_then(Credential::new)
    }

    /// Resolve the token for `page_id`, walking the source chain in order
    pub async fn resolve(
        &self,
        page_id: &str,
        directory: &dyn AccountDirectory,
    ) -> Option<Credential> {
        if let Some(credential) = self.inline.get(page_id).cloned().and_then(Credential::new) {
            tracing::debug!(page = page_id, "Page token from inline mapping");
            return Some(credential);
        }

        let doc = self.load_store();
        if let Some(credential) = doc.page_token(page_id).and_then(Credential::new) {
            tracing::debug!(page = page_id, "Page token from token store");
            return Some(credential);
        }

        let user_token = doc.user_token().and_then(Credential::new)?;
        let discovered = directory.page_tokens(&user_token).await?;
        if discovered.is_empty() {
            return None;
        }

        if let Err(e) = self.store.merge_pages(&discovered) {
            tracing::warn!("Failed to persist discovered page tokens: {}", e);
        }

        let found = discovered.get(page_id).cloned().and_then(Credential::new);
        if found.is_some() {
            tracing::debug!(page = page_id, "Page token from account lookup");
        }
        found
    }
}
