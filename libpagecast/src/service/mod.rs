//! Page operations on top of the governed executor
//!
//! `PageService` is the entry point for front ends. It owns one executor,
//! one token resolver and one duplicate guard, and every operation it offers
//! goes through them:
//!
//! - [`PageService::resolve_credential`], [`PageService::execute`] and
//!   [`PageService::check_duplicate`] are the low-level contract
//! - `publishing` adds feed, photo, video and reel publishing
//! - `inbox` adds page listing, conversations and replies
//!
//! # Example
//!
//! ```no_run
//! use libpagecast::PageService;
//!
//! # async fn example() -> libpagecast::Result<()> {
//! let service = PageService::load()?;
//! let posted = service.publish_feed("1234567890", "Hello from pagecast").await?;
//! println!("{}", posted.post_id.unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod inbox;
pub mod publishing;

pub use inbox::PageSummary;
pub use publishing::Published;

use std::sync::Arc;

use crate::config::{Config, GovernorConfig};
use crate::credentials::{Credential, TokenResolver};
use crate::dedup::DuplicateGuard;
use crate::error::{CallError, Result};
use crate::executor::ApiExecutor;
use crate::transport::Transport;
use crate::types::{ActionKind, ApiResponse, GraphRequest};

/// Facade over the governor; clones share all state
#[derive(Clone)]
pub struct PageService {
    executor: ApiExecutor,
    resolver: Arc<TokenResolver>,
    dedup: Arc<DuplicateGuard>,
}

impl PageService {
    /// Load configuration from file and environment, then talk HTTP
    pub fn load() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let executor = ApiExecutor::from_config(&config.governor)?;
        Ok(Self::with_executor(&config.governor, executor))
    }

    /// Service over a custom transport (tests, alternative clients)
    pub fn new(config: &GovernorConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_executor(config, ApiExecutor::new(config, transport))
    }

    fn with_executor(config: &GovernorConfig, executor: ApiExecutor) -> Self {
        Self {
            executor,
            resolver: Arc::new(TokenResolver::from_config(config)),
            dedup: Arc::new(DuplicateGuard::new(config.duplicate_window())),
        }
    }

    pub fn executor(&self) -> &ApiExecutor {
        &self.executor
    }

    pub fn resolver(&self) -> &TokenResolver {
        &self.resolver
    }

    pub fn dedup(&self) -> &DuplicateGuard {
        &self.dedup
    }

    /// Token for `page_id`, or `NoCredential` once every source is exhausted
    pub async fn resolve_credential(
        &self,
        page_id: &str,
    ) -> std::result::Result<Credential, CallError> {
        self.resolver
            .resolve(page_id, &self.executor)
            .await
            .ok_or_else(|| CallError::NoCredential(page_id.to_string()))
    }

    /// Run a prepared request through the governor
    pub async fn execute(
        &self,
        request: GraphRequest,
    ) -> std::result::Result<ApiResponse, CallError> {
        self.executor.execute(request).await
    }

    /// `Duplicate` if the same content went to the same page recently;
    /// otherwise records it and returns `Ok`
    pub fn check_duplicate(
        &self,
        kind: ActionKind,
        target: &str,
        content: &str,
    ) -> std::result::Result<(), CallError> {
        if self.dedup.is_duplicate(kind, target, content) {
            return Err(CallError::Duplicate {
                kind,
                target: target.to_string(),
            });
        }
        Ok(())
    }

    /// Run a write that already passed [`check_duplicate`](Self::check_duplicate)
    ///
    /// When the governor refuses the call before sending anything, the
    /// duplicate record is dropped so the same content can go out once the
    /// cooldown ends.
    pub async fn execute_admitted(
        &self,
        kind: ActionKind,
        target: &str,
        content: &str,
        request: GraphRequest,
    ) -> std::result::Result<ApiResponse, CallError> {
        let report = self.executor.execute_report(request).await;
        if report.result.is_err() && !report.dispatched {
            self.dedup.forget(kind, target, content);
        }
        report.result
    }
}
