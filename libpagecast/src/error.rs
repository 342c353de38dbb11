//! Error types for Pagecast

use thiserror::Error;

use crate::types::ActionKind;

pub type Result<T> = std::result::Result<T, PagecastError>;

#[derive(Error, Debug)]
pub enum PagecastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Token store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Call(#[from] CallError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PagecastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PagecastError::InvalidInput(_) => 3,
            PagecastError::Call(CallError::NoCredential(_)) => 2,
            PagecastError::Call(CallError::RateLimited { .. })
            | PagecastError::Call(CallError::Duplicate { .. }) => 4,
            PagecastError::Call(_) => 1,
            PagecastError::Config(_) => 1,
            PagecastError::Store(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed token store: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of a governed platform call that did not produce a usable response.
///
/// Every variant is an ordinary return value. None of them indicate a bug in
/// the caller; they describe why the platform was not (successfully) reached.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// Every credential source was exhausted for the target
    #[error("No page token available for {0}")]
    NoCredential(String),

    /// The same content was already sent to the same target recently
    #[error("Duplicate {kind} for {target} suppressed")]
    Duplicate { kind: ActionKind, target: String },

    /// Pre-emptive cooldown or platform-signalled throttling
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Network or timeout failure before a response was received
    #[error("Transport error: {0}")]
    Transport(String),

    /// The platform rejected the request; body is passed through verbatim
    #[error("Platform returned {status}: {body}")]
    Platform {
        status: u16,
        body: serde_json::Value,
    },
}

impl CallError {
    /// Text suitable for showing to an operator
    pub fn user_message(&self) -> String {
        match self {
            CallError::NoCredential(target) => format!(
                "No access token configured for page {}. Check PAGE_TOKENS or the token store.",
                target
            ),
            CallError::Duplicate { .. } => "Already sent recently; skipped.".to_string(),
            CallError::RateLimited { retry_after_secs } => {
                format!("Rate limited. Try again in {} seconds.", retry_after_secs)
            }
            CallError::Transport(detail) => format!("Could not reach the platform: {}", detail),
            CallError::Platform { status, body } => format!("Platform error {}: {}", status, body),
        }
    }

}
