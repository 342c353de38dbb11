//! The governed call path
//!
//! Every request to the platform goes through [`ApiExecutor::execute`]:
//!
//! 1. refuse while a cooldown window is open, without touching the network
//! 2. wait for a throttle turn (global plus the request's page), then check
//!    the cooldown again since it may have been raised while waiting
//! 3. send the request
//! 4. feed the usage headers to the tracker
//! 5. on a throttled response, retry once inline when the platform asks for
//!    a short wait, otherwise return `RateLimited` and extend the cooldown
//! 6. pass any other error response through verbatim
//!
//! Failures are returned as [`CallError`] values, never panics.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::GovernorConfig;
use crate::credentials::{page_tokens_from_accounts, AccountDirectory, Credential};
use crate::error::{CallError, Result};
use crate::throttle::{ThrottleKey, ThrottleScheduler};
use crate::transport::{HttpTransport, RawResponse, Transport};
use crate::types::{ApiResponse, GraphRequest};
use crate::usage::{
    parse_business_usage, wait_from_secs, CooldownPolicy, UsageTracker, BUSINESS_USAGE_HEADER,
};

/// Graph error codes that mean "too many calls" even without a 429
const THROTTLE_ERROR_CODES: [i64; 4] = [4, 17, 32, 613];
const THROTTLE_ERROR_RANGE: std::ops::RangeInclusive<i64> = 80001..=80014;

/// How the executor reacts to a throttled response
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Inline retries allowed per call
    pub max_retries: u32,
    /// Longest platform-requested wait that is slept through inline
    pub max_inline_delay: Duration,
    /// Minimum cooldown opened after a terminal throttle
    pub cooldown_floor: Duration,
    /// Wait assumed when the platform gives no hint
    pub default_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            max_inline_delay: Duration::from_secs(5),
            cooldown_floor: Duration::from_secs(120),
            default_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &GovernorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            max_inline_delay: Duration::from_secs(config.max_inline_wait_secs),
            ..Default::default()
        }
    }
}

/// A governed call's result, plus whether any attempt reached the transport
#[derive(Debug)]
pub struct CallReport {
    pub result: std::result::Result<ApiResponse, CallError>,
    /// False when the call was refused locally (cooldown) before sending
    pub dispatched: bool,
}

/// Whether a response is the platform telling us to slow down
pub fn is_throttled(response: &RawResponse) -> bool {
    if response.status == 429 {
        return true;
    }
    if response.is_success() {
        return false;
    }
    response
        .body
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_i64())
        .is_some_and(|code| THROTTLE_ERROR_CODES.contains(&code) || THROTTLE_ERROR_RANGE.contains(&code))
}

/// Wait requested by a throttled response
///
/// `Retry-After` (seconds) wins, then the business-use-case regain time,
/// then `fallback`.
pub fn retry_delay(response: &RawResponse, fallback: Duration) -> Duration {
    if let Some(wait) = response
        .header("retry-after")
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(wait_from_secs)
    {
        return wait;
    }
    if let Some(regain) = response
        .header(BUSINESS_USAGE_HEADER)
        .and_then(|h| parse_business_usage(h).1)
    {
        return regain;
    }
    fallback
}

/// Whole seconds, rounded up so a caller never retries too early
fn ceil_secs(delay: Duration) -> u64 {
    let secs = delay.as_secs();
    if delay.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Single choke point for platform calls; clones share all governor state
#[derive(Clone)]
pub struct ApiExecutor {
    transport: Arc<dyn Transport>,
    throttle: Arc<ThrottleScheduler>,
    usage: Arc<UsageTracker>,
    policy: RetryPolicy,
}

impl ApiExecutor {
    pub fn new(config: &GovernorConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            throttle: Arc::new(ThrottleScheduler::new(
                config.min_interval_global(),
                config.min_interval_target(),
            )),
            usage: Arc::new(UsageTracker::new(CooldownPolicy::from_config(config))),
            policy: RetryPolicy::from_config(config),
        }
    }

    /// Executor talking HTTP to the configured base URL
    pub fn from_config(config: &GovernorConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.base_url())
            .map_err(|e| CallError::Transport(e.to_string()))?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    fn check_cooldown(&self) -> std::result::Result<(), CallError> {
        let remaining = self.usage.remaining_cooldown();
        if remaining.is_zero() {
            return Ok(());
        }
        tracing::info!(
            retry_after_secs = ceil_secs(remaining),
            "Cooldown active, call refused"
        );
        Err(CallError::RateLimited {
            retry_after_secs: ceil_secs(remaining),
        })
    }

    /// Issue one governed call
    pub async fn execute(&self, request: GraphRequest) -> std::result::Result<ApiResponse, CallError> {
        self.execute_report(request).await.result
    }

    /// Like [`execute`](Self::execute), also telling whether anything was sent
    pub async fn execute_report(&self, request: GraphRequest) -> CallReport {
        let span = tracing::debug_span!(
            "graph_call",
            call_id = %Uuid::new_v4(),
            path = %request.path,
            page = request.target.as_deref().unwrap_or("-"),
        );
        let mut dispatched = false;
        let result = self.run(&request, &mut dispatched).instrument(span).await;
        CallReport { result, dispatched }
    }

    async fn run(
        &self,
        request: &GraphRequest,
        dispatched: &mut bool,
    ) -> std::result::Result<ApiResponse, CallError> {
        let key = match &request.target {
            Some(target) => ThrottleKey::target(target.clone()),
            None => ThrottleKey::Global,
        };

        self.check_cooldown()?;

        let mut retries = 0;
        loop {
            self.throttle.await_turn(&key).await;
            self.check_cooldown()?;

            *dispatched = true;
            let response = self.transport.send(request).await.map_err(|e| {
                tracing::warn!(error = %e, "Transport failure");
                CallError::Transport(e.to_string())
            })?;
            self.usage.observe(&response.headers);

            if is_throttled(&response) {
                let delay = retry_delay(&response, self.policy.default_delay);
                if retries < self.policy.max_retries && delay <= self.policy.max_inline_delay {
                    retries += 1;
                    tracing::info!(
                        status = response.status,
                        retry_after_ms = delay.as_millis() as u64,
                        "Throttled, retrying"
                    );
                    sleep(delay).await;
                    continue;
                }

                let retry_after_secs = ceil_secs(delay);
                self.usage.extend(delay.max(self.policy.cooldown_floor));
                tracing::warn!(
                    status = response.status,
                    retry_after_secs,
                    "Throttled by platform"
                );
                return Err(CallError::RateLimited { retry_after_secs });
            }

            if response.status >= 400 {
                tracing::warn!(status = response.status, "Platform rejected request");
                return Err(CallError::Platform {
                    status: response.status,
                    body: response.body,
                });
            }

            tracing::debug!(status = response.status, "Call completed");
            return Ok(ApiResponse {
                status: response.status,
                body: response.body,
            });
        }
    }
}

/// Page lookup through the user token: one governed `me/accounts` call
#[async_trait]
impl AccountDirectory for ApiExecutor {
    async fn page_tokens(&self, user_token: &Credential) -> Option<HashMap<String, String>> {
        let request = GraphRequest::get("me/accounts")
            .param("limit", "200")
            .credential(user_token.clone());
        match self.execute(request).await {
            Ok(response) => Some(page_tokens_from_accounts(&response.body)),
            Err(e) => {
                tracing::warn!("Page lookup via user token failed: {}", e);
                None
            }
        }
    }
}
