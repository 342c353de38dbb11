//! Pagecast - governed publishing to externally managed social pages
//!
//! Every call to the remote page platform goes through one executor. It
//! spaces calls out and backs off when the platform reports high usage.
//! Duplicate publishes are suppressed before they reach it.

pub mod config;
pub mod credentials;
pub mod dedup;
pub mod error;
pub mod executor;
pub mod logging;
pub mod service;
pub mod throttle;
pub mod transport;
pub mod types;
pub mod usage;

// Re-export commonly used types
pub use config::{Config, GovernorConfig};
pub use credentials::{Credential, TokenResolver, TokenStore};
pub use dedup::DuplicateGuard;
pub use error::{CallError, PagecastError, Result};
pub use executor::{ApiExecutor, RetryPolicy};
pub use service::publishing::PublishRequest;
pub use service::{PageService, PageSummary, Published};
pub use transport::{HttpTransport, MockTransport, Transport};
pub use types::{ActionKind, ApiResponse, GraphRequest, MediaPart, PublishOutcome};
