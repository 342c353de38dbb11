//! Configuration management for Pagecast
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables, so a deployment can run from env alone.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::usage::MAX_WAIT;

pub const DEFAULT_GRAPH_BASE: &str = "https://graph.facebook.com/v20.0";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub governor: GovernorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub graph_base: String,
    pub tokens_file: String,
    /// Inline page-id to token mapping, JSON object or `id|token` lines
    pub page_tokens: String,
    pub min_interval_global_secs: f64,
    pub min_interval_target_secs: f64,
    pub duplicate_window_secs: u64,
    pub usage_warn_pct: f64,
    pub usage_high_pct: f64,
    pub warn_cooldown_secs: u64,
    pub high_cooldown_secs: u64,
    /// Inline retries after a short platform throttle
    pub max_retries: u32,
    /// Longest platform-requested wait that is retried inline
    pub max_inline_wait_secs: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            graph_base: DEFAULT_GRAPH_BASE.to_string(),
            tokens_file: default_tokens_file(),
            page_tokens: String::new(),
            min_interval_global_secs: 1.0,
            min_interval_target_secs: 2.0,
            duplicate_window_secs: 3600,
            usage_warn_pct: 80.0,
            usage_high_pct: 90.0,
            warn_cooldown_secs: 120,
            high_cooldown_secs: 300,
            max_retries: 1,
            max_inline_wait_secs: 5,
        }
    }
}

fn default_tokens_file() -> String {
    match dirs::config_dir() {
        Some(dir) => dir
            .join("pagecast")
            .join("tokens.json")
            .to_string_lossy()
            .to_string(),
        None => "tokens.json".to_string(),
    }
}

impl GovernorConfig {
    /// Zero when the configured value is out of range (see [`validate`](Self::validate))
    pub fn min_interval_global(&self) -> Duration {
        Duration::try_from_secs_f64(self.min_interval_global_secs).unwrap_or_default()
    }

    pub fn min_interval_target(&self) -> Duration {
        Duration::try_from_secs_f64(self.min_interval_target_secs).unwrap_or_default()
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs(self.duplicate_window_secs)
    }

    /// Token store path with `~` expanded
    pub fn tokens_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.tokens_file).to_string())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.graph_base.trim_end_matches('/')
    }

    /// Check that intervals and thresholds are usable
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("min_interval_global_secs", self.min_interval_global_secs),
            ("min_interval_target_secs", self.min_interval_target_secs),
        ] {
            let in_range = Duration::try_from_secs_f64(value).is_ok_and(|d| d <= MAX_WAIT);
            if !in_range {
                return Err(invalid(key, value).into());
            }
        }
        if self.usage_warn_pct > self.usage_high_pct {
            return Err(invalid("usage_warn_pct", self.usage_warn_pct).into());
        }
        if self.graph_base.trim().is_empty() {
            return Err(ConfigError::MissingField("graph_base".to_string()).into());
        }
        Ok(())
    }

    /// Apply overrides from a key lookup (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GRAPH_BASE") {
            self.graph_base = v.trim().to_string();
        }
        if let Some(v) = lookup("TOKENS_FILE") {
            self.tokens_file = v.trim().to_string();
        }
        if let Some(v) = lookup("PAGE_TOKENS") {
            self.page_tokens = v;
        }
        if let Some(v) = lookup("GRAPH_MIN_INTERVAL_GLOBAL") {
            self.min_interval_global_secs = parse_num("GRAPH_MIN_INTERVAL_GLOBAL", &v)?;
        }
        if let Some(v) = lookup("GRAPH_MIN_INTERVAL_PAGE") {
            self.min_interval_target_secs = parse_num("GRAPH_MIN_INTERVAL_PAGE", &v)?;
        }
        if let Some(v) = lookup("DUPLICATE_WINDOW_SECS") {
            self.duplicate_window_secs = parse_num("DUPLICATE_WINDOW_SECS", &v)?;
        }
        if let Some(v) = lookup("USAGE_WARN_PCT") {
            self.usage_warn_pct = parse_num("USAGE_WARN_PCT", &v)?;
        }
        if let Some(v) = lookup("USAGE_HIGH_PCT") {
            self.usage_high_pct = parse_num("USAGE_HIGH_PCT", &v)?;
        }
        if let Some(v) = lookup("GRAPH_MAX_RETRIES") {
            self.max_retries = parse_num("GRAPH_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("GRAPH_MAX_INLINE_WAIT") {
            self.max_inline_wait_secs = parse_num("GRAPH_MAX_INLINE_WAIT", &v)?;
        }
        Ok(())
    }
}

fn invalid(key: &str, value: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| invalid(key, raw).into())
}

impl Config {
    /// Load configuration from the default location plus environment overrides
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Self::default()
        };
        config
            .governor
            .apply_overrides(|key| std::env::var(key).ok())?;
        config.governor.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }
}

/// Configuration file path: `PAGECAST_CONFIG`, else the XDG config directory
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("PAGECAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("pagecast").join("config.toml"))
}
