//! Agent configuration.
//!
//! All settings come from the environment (a `.env` file is honored via
//! `dotenvy` in `main`). Intervals default to the cadence the Ocado mobile
//! app exhibits: data every 10 minutes, token refresh every hour.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Data poll interval (seconds).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 600;
/// Scheduled token refresh interval (seconds).
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3600;
/// Proactive refresh margin before estimated session expiry (seconds).
pub const DEFAULT_PROACTIVE_MARGIN_SECS: u64 = 600;
/// Estimated session token lifetime (seconds); the API does not report one.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
/// HTTP request timeout (seconds).
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Runtime configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Bootstrap session token (ignored once a persisted pair exists).
    pub session_token: String,
    /// Bootstrap refresh token.
    pub refresh_token: String,
    /// Account key namespacing persisted tokens; derived from the refresh
    /// token's subject claim when unset.
    pub account: Option<String>,
    /// Override for the API base URL.
    pub api_base: Option<String>,
    /// Path of the JSON state file holding rotated tokens across restarts.
    pub state_file: Option<PathBuf>,
    /// Directory for daily-rotated log files.
    pub log_dir: Option<PathBuf>,
    pub poll_interval: Duration,
    pub refresh_interval: Duration,
    pub proactive_margin: Duration,
    pub session_ttl: Duration,
    pub http_timeout: Duration,
}

impl AgentConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            session_token: require("OCADO_SESSION_TOKEN")?,
            refresh_token: require("OCADO_REFRESH_TOKEN")?,
            account: optional("OCADO_ACCOUNT"),
            api_base: optional("OCADO_API_BASE"),
            state_file: optional("OCADO_STATE_FILE").map(PathBuf::from),
            log_dir: optional("OCADO_LOG_DIR").map(PathBuf::from),
            poll_interval: seconds_var("OCADO_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
            refresh_interval: seconds_var(
                "OCADO_REFRESH_INTERVAL_SECS",
                DEFAULT_REFRESH_INTERVAL_SECS,
            )?,
            proactive_margin: seconds_var(
                "OCADO_PROACTIVE_MARGIN_SECS",
                DEFAULT_PROACTIVE_MARGIN_SECS,
            )?,
            session_ttl: seconds_var("OCADO_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?,
            http_timeout: seconds_var("OCADO_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
        })
    }
}

fn require(var: &str) -> Result<String> {
    optional(var).ok_or_else(|| Error::config(format!("{var} must be set")))
}

fn optional(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn seconds_var(var: &str, default: u64) -> Result<Duration> {
    parse_seconds(var, optional(var), default)
}

/// Parse a seconds value, falling back to `default` when unset.
fn parse_seconds(var: &str, raw: Option<String>, default: u64) -> Result<Duration> {
    match raw {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| Error::config(format!("{var} must be a number of seconds, got {raw:?}"))),
    }
}
