//! Logging setup shared by the pagecast binaries
//!
//! Logs always go to stderr so command output on stdout stays pipeable.
//! `RUST_LOG` wins when set; otherwise the level comes from
//! `PAGECAST_LOG_LEVEL` (or `--verbose`) and HTTP client internals are
//! held at `warn`.
//!
//! ```no_run
//! use libpagecast::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "debug", false).init();
//! // or, from PAGECAST_LOG_FORMAT / PAGECAST_LOG_LEVEL
//! libpagecast::logging::init_default();
//! ```

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "PAGECAST_LOG_FORMAT";
pub const LOG_LEVEL_ENV: &str = "PAGECAST_LOG_LEVEL";

/// Crates whose debug output is noise for an operator
const QUIET_CRATES: [&str; 3] = ["hyper", "reqwest", "h2"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain text, no colours
    Text,
    /// One JSON object per line
    Json,
    /// Multi-line with colours, for development
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: impl Into<String>, verbose: bool) -> Self {
        Self {
            format,
            level: level.into(),
            verbose,
        }
    }

    /// Build from a key lookup; unknown formats fall back to text
    pub fn from_lookup<F>(lookup: F, verbose: bool) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = lookup(LOG_FORMAT_ENV)
            .and_then(|s| s.parse().ok())
            .unwrap_or(LogFormat::Text);
        let level = lookup(LOG_LEVEL_ENV)
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "info".to_string());
        Self::new(format, level, verbose)
    }

    pub fn from_env(verbose: bool) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), verbose)
    }

    /// Filter directive used when `RUST_LOG` is not set
    pub fn directive(&self) -> String {
        let level = if self.verbose { "debug" } else { self.level.as_str() };
        let mut directive = level.to_string();
        for name in QUIET_CRATES {
            directive.push_str(&format!(",{}=warn", name));
        }
        directive
    }

    /// Install the global subscriber
    ///
    /// A second call is a no-op, so tests and binaries can both call it.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.directive()));

        let installed = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(false)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false)
                .try_init(),
        };

        if installed.is_err() {
            tracing::debug!("Logging already initialised");
        }
    }
}

/// Initialise from `PAGECAST_LOG_FORMAT` and `PAGECAST_LOG_LEVEL`
pub fn init_default() {
    LoggingConfig::from_env(false).init();
}
