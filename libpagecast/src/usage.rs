//! Platform usage tracking and pre-emptive cooldown
//!
//! The platform reports how much of its quota the app and each page have
//! consumed through compact JSON response headers. When the highest reported
//! percentage crosses a threshold, a cooldown window opens during which the
//! executor refuses new calls without touching the network.

use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::GovernorConfig;
use crate::transport::Headers;

pub const APP_USAGE_HEADER: &str = "x-app-usage";
pub const PAGE_USAGE_HEADER: &str = "x-page-usage";
pub const BUSINESS_USAGE_HEADER: &str = "x-business-use-case-usage";

/// Business-use-case field that is a wait time in minutes, not a percentage
const REGAIN_ACCESS_FIELD: &str = "estimated_time_to_regain_access";

/// Longest wait honoured from any single signal; larger values are clamped
pub const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Platform-supplied seconds as a wait, clamped to [`MAX_WAIT`]
///
/// Negative, NaN and infinite values yield `None`.
pub fn wait_from_secs(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let wait = Duration::try_from_secs_f64(secs).unwrap_or(MAX_WAIT);
    Some(wait.min(MAX_WAIT))
}

/// Deadline `wait` after `now`, with the wait clamped to [`MAX_WAIT`]
fn deadline(now: Instant, wait: Duration) -> Instant {
    let wait = wait.min(MAX_WAIT);
    now.checked_add(wait).unwrap_or(now)
}

/// Last observed usage percentages
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub app: Option<f64>,
    pub target: Option<f64>,
    pub business: Option<f64>,
}

impl UsageSnapshot {
    /// Highest percentage across every level
    pub fn peak(&self) -> Option<f64> {
        [self.app, self.target, self.business]
            .into_iter()
            .flatten()
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
    }
}

/// Maximum numeric sub-field of a usage header such as
/// `{"call_count":28,"total_time":25,"total_cputime":25}`
pub fn parse_usage_percent(raw: &str) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;
    max_numeric(value.as_object()?, &[])
}

/// Parse the business-use-case header
///
/// Shape: `{"<id>": [{"type": "pages", "call_count": 5, ...,
/// "estimated_time_to_regain_access": 0}]}`. Returns the peak percentage and
/// the longest regain-access wait, if any.
pub fn parse_business_usage(raw: &str) -> (Option<f64>, Option<Duration>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw.trim()) else {
        return (None, None);
    };
    let Some(ids) = value.as_object() else {
        return (None, None);
    };

    let mut peak: Option<f64> = None;
    let mut regain_minutes: Option<f64> = None;
    for entries in ids.values().filter_map(|v| v.as_array()) {
        for entry in entries.iter().filter_map(|e| e.as_object()) {
            if let Some(pct) = max_numeric(entry, &[REGAIN_ACCESS_FIELD]) {
                peak = Some(peak.map_or(pct, |p| p.max(pct)));
            }
            if let Some(minutes) = entry.get(REGAIN_ACCESS_FIELD).and_then(|v| v.as_f64()) {
                regain_minutes = Some(regain_minutes.map_or(minutes, |m| m.max(minutes)));
            }
        }
    }

    let regain = regain_minutes
        .filter(|m| *m > 0.0)
        .and_then(|m| wait_from_secs(m * 60.0));
    (peak, regain)
}

fn max_numeric(
    fields: &serde_json::Map<String, serde_json::Value>,
    skip: &[&str],
) -> Option<f64> {
    fields
        .iter()
        .filter(|(k, _)| !skip.contains(&k.as_str()))
        .filter_map(|(_, v)| v.as_f64())
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
}

/// Usage thresholds and the cooldown each one imposes
#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    pub warn_pct: f64,
    pub high_pct: f64,
    pub warn_cooldown: Duration,
    pub high_cooldown: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            warn_pct: 80.0,
            high_pct: 90.0,
            warn_cooldown: Duration::from_secs(120),
            high_cooldown: Duration::from_secs(300),
        }
    }
}

impl CooldownPolicy {
    pub fn from_config(config: &GovernorConfig) -> Self {
        Self {
            warn_pct: config.usage_warn_pct,
            high_pct: config.usage_high_pct,
            warn_cooldown: Duration::from_secs(config.warn_cooldown_secs),
            high_cooldown: Duration::from_secs(config.high_cooldown_secs),
        }
    }

    pub fn cooldown_for(&self, pct: f64) -> Option<Duration> {
        if pct >= self.high_pct {
            Some(self.high_cooldown)
        } else if pct >= self.warn_pct {
            Some(self.warn_cooldown)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct CooldownState {
    until: Option<Instant>,
    last: UsageSnapshot,
}

impl CooldownState {
    /// Move the deadline later, never earlier
    fn raise(&mut self, until: Instant) -> bool {
        match self.until {
            Some(current) if current >= until => false,
            _ => {
                self.until = Some(until);
                true
            }
        }
    }
}

/// Tracks platform usage and owns the process-wide cooldown deadline
pub struct UsageTracker {
    policy: CooldownPolicy,
    state: Mutex<CooldownState>,
}

impl UsageTracker {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(CooldownState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CooldownState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Feed response headers (lower-cased names) into the tracker
    ///
    /// Missing or malformed headers are ignored.
    pub fn observe(&self, headers: &Headers) {
        let app = headers.get(APP_USAGE_HEADER).and_then(|h| parse_usage_percent(h));
        let target = headers.get(PAGE_USAGE_HEADER).and_then(|h| parse_usage_percent(h));
        let (business, regain) = headers
            .get(BUSINESS_USAGE_HEADER)
            .map(|h| parse_business_usage(h))
            .unwrap_or((None, None));

        if app.is_none() && target.is_none() && business.is_none() && regain.is_none() {
            return;
        }

        let mut state = self.state();
        let now = Instant::now();

        if app.is_some() {
            state.last.app = app;
        }
        if target.is_some() {
            state.last.target = target;
        }
        if business.is_some() {
            state.last.business = business;
        }

        let observed = UsageSnapshot {
            app,
            target,
            business,
        };
        if let Some(peak) = observed.peak() {
            if let Some(cooldown) = self.policy.cooldown_for(peak) {
                if state.raise(deadline(now, cooldown)) {
                    tracing::warn!(
                        usage_pct = peak,
                        cooldown_secs = cooldown.as_secs(),
                        "Platform usage high, cooling down"
                    );
                }
            }
        }
        if let Some(wait) = regain {
            if state.raise(deadline(now, wait)) {
                tracing::warn!(
                    cooldown_secs = wait.as_secs(),
                    "Platform reported time to regain access"
                );
            }
        }
    }

    /// Raise the cooldown to at least `delay` from now
    pub fn extend(&self, delay: Duration) {
        let mut state = self.state();
        if state.raise(deadline(Instant::now(), delay)) {
            tracing::debug!(cooldown_secs = delay.as_secs(), "Cooldown extended");
        }
    }

    /// Time left in the current cooldown window, zero when none
    pub fn remaining_cooldown(&self) -> Duration {
        let state = self.state();
        match state.until {
            Some(until) => until.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        self.state().last.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn usage(pct: u32) -> String {
        format!(
            r#"{{"call_count":{},"total_cputime":10,"total_time":5}}"#,
            pct
        )
    }

    #[test]
    fn test_parse_usage_percent() {
        assert_eq!(
            parse_usage_percent(r#"{"call_count":28,"total_time":25,"total_cputime":91}"#),
            Some(91.0)
        );
        assert_eq!(parse_usage_percent(r#"{"call_count":"high"}"#), None);
        assert_eq!(parse_usage_percent("not json"), None);
        assert_eq!(parse_usage_percent("[1,2]"), None);
    }

    #[test]
    fn test_parse_business_usage() {
        let raw = r#"{
            "111": [{"type":"pages","call_count":12,"total_cputime":40,"total_time":3,"estimated_time_to_regain_access":0}],
            "222": [{"type":"messenger","call_count":85,"total_cputime":1,"total_time":1,"estimated_time_to_regain_access":7}]
        }"#;
        let (peak, regain) = parse_business_usage(raw);
        assert_eq!(peak, Some(85.0));
        assert_eq!(regain, Some(Duration::from_secs(7 * 60)));

        assert_eq!(parse_business_usage("garbage"), (None, None));
    }

    #[test]
    fn test_policy_thresholds() {
        let policy = CooldownPolicy::default();
        assert_eq!(policy.cooldown_for(95.0), Some(Duration::from_secs(300)));
        assert_eq!(policy.cooldown_for(90.0), Some(Duration::from_secs(300)));
        assert_eq!(policy.cooldown_for(85.0), Some(Duration::from_secs(120)));
        assert_eq!(policy.cooldown_for(80.0), Some(Duration::from_secs(120)));
        assert_eq!(policy.cooldown_for(79.9), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_usage_opens_long_cooldown() {
        let tracker = UsageTracker::new(CooldownPolicy::default());
        tracker.observe(&headers(&[(APP_USAGE_HEADER, usage(95).as_str())]));
        assert!(tracker.remaining_cooldown() >= Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_warn_usage_opens_short_cooldown() {
        let tracker = UsageTracker::new(CooldownPolicy::default());
        tracker.observe(&headers(&[(PAGE_USAGE_HEADER, usage(85).as_str())]));
        let remaining = tracker.remaining_cooldown();
        assert!(remaining >= Duration::from_secs(120));
        assert!(remaining < Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_usage_leaves_cooldown_unchanged() {
        let tracker = UsageTracker::new(CooldownPolicy::default());
        tracker.observe(&headers(&[(APP_USAGE_HEADER, usage(50).as_str())]));
        assert_eq!(tracker.remaining_cooldown(), Duration::ZERO);
        assert_eq!(tracker.snapshot().app, Some(50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_across_levels_decides() {
        let tracker = UsageTracker::new(CooldownPolicy::default());
        tracker.observe(&headers(&[
            (APP_USAGE_HEADER, usage(10).as_str()),
            (PAGE_USAGE_HEADER, usage(92).as_str()),
        ]));
        assert!(tracker.remaining_cooldown() >= Duration::from_secs(300));
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.app, Some(10.0));
        assert_eq!(snapshot.target, Some(92.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_headers_are_ignored() {
        let tracker = UsageTracker::new(CooldownPolicy::default());
        tracker.observe(&headers(&[(APP_USAGE_HEADER, usage(40).as_str())]));
        tracker.observe(&headers(&[
            (APP_USAGE_HEADER, "{broken"),
            (PAGE_USAGE_HEADER, ""),
        ]));
        assert_eq!(tracker.remaining_cooldown(), Duration::ZERO);
        assert_eq!(tracker.snapshot().app, Some(40.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_is_never_lowered() {
        let tracker = UsageTracker::new(CooldownPolicy::default());
        tracker.observe(&headers(&[(APP_USAGE_HEADER, usage(95).as_str())]));
        tokio::time::advance(Duration::from_secs(10)).await;

        // A later warn-level signal would end sooner; it must not shorten the window
        tracker.observe(&headers(&[(APP_USAGE_HEADER, usage(85).as_str())]));
        assert_eq!(tracker.remaining_cooldown(), Duration::from_secs(290));

        tracker.extend(Duration::from_secs(5));
        assert_eq!(tracker.remaining_cooldown(), Duration::from_secs(290));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_elapses() {
        let tracker = UsageTracker::new(CooldownPolicy::default());
        tracker.observe(&headers(&[(APP_USAGE_HEADER, usage(85).as_str())]));
        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(tracker.remaining_cooldown(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_regain_access_extends_cooldown() {
        let tracker = UsageTracker::new(CooldownPolicy::default());
        tracker.observe(&headers(&[(
            BUSINESS_USAGE_HEADER,
            r#"{"1":[{"type":"pages","call_count":20,"estimated_time_to_regain_access":10}]}"#,
        )]));
        assert_eq!(tracker.remaining_cooldown(), Duration::from_secs(600));
    }

    #[test]
    fn test_wait_from_secs_clamps() {
        assert_eq!(wait_from_secs(1.5), Some(Duration::from_millis(1500)));
        assert_eq!(wait_from_secs(1e20), Some(MAX_WAIT));
        assert_eq!(wait_from_secs(1e300), Some(MAX_WAIT));
        assert_eq!(wait_from_secs(-1.0), None);
        assert_eq!(wait_from_secs(f64::NAN), None);
        assert_eq!(wait_from_secs(f64::INFINITY), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_regain_access_is_clamped() {
        let tracker = UsageTracker::new(CooldownPolicy::default());
        tracker.observe(&headers(&[(
            BUSINESS_USAGE_HEADER,
            r#"{"1":[{"type":"pages","call_count":20,"estimated_time_to_regain_access":1e300}]}"#,
        )]));
        assert_eq!(tracker.remaining_cooldown(), MAX_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_cooldowns_are_clamped() {
        let policy = CooldownPolicy {
            high_cooldown: Duration::from_secs(u64::MAX),
            ..Default::default()
        };
        let tracker = UsageTracker::new(policy);
        tracker.observe(&headers(&[(APP_USAGE_HEADER, usage(99).as_str())]));
        assert_eq!(tracker.remaining_cooldown(), MAX_WAIT);

        tracker.extend(Duration::MAX);
        assert_eq!(tracker.remaining_cooldown(), MAX_WAIT);
    }

    #[test]
    fn test_snapshot_peak() {
        let snapshot = UsageSnapshot {
            app: Some(12.0),
            target: None,
            business: Some(40.0),
        };
        assert_eq!(snapshot.peak(), Some(40.0));
        assert_eq!(UsageSnapshot::default().peak(), None);
    }
}
