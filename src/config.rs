//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::policy::UngatedStages;

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on each generator / evaluator call.
    pub call_timeout: Duration,
    /// Extra attempts after a transient turn failure.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles on each further retry.
    pub retry_base_delay: Duration,
    pub ungated_stages: UngatedStages,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(250),
            ungated_stages: UngatedStages::default(),
        }
    }
}

impl SessionConfig {
    /// Build from environment variables, falling back to defaults.
    ///
    /// - `FLOW_CALL_TIMEOUT_SECS` (default 30)
    /// - `FLOW_MAX_RETRIES` (default 2)
    /// - `FLOW_RETRY_BASE_MS` (default 250)
    /// - `FLOW_UNGATED_STAGES`: `advance_after_first_turn` (default) or `hold_until_turn_limit`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            call_timeout: env_parse::<u64>("FLOW_CALL_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
            max_retries: env_parse("FLOW_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            retry_base_delay: env_parse::<u64>("FLOW_RETRY_BASE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            ungated_stages: match std::env::var("FLOW_UNGATED_STAGES") {
                Ok(v) if !v.trim().is_empty() => v.parse()?,
                _ => defaults.ungated_stages,
            },
        })
    }
}

/// Binary-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory of `<flow_id>.json` files. Built-in flows are used when unset.
    pub flow_dir: Option<PathBuf>,
    /// Serve the HTTP API on this port when set.
    pub http_port: Option<u16>,
    /// Flow used by the interactive CLI chat.
    pub cli_flow_id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            flow_dir: None,
            http_port: None,
            cli_flow_id: "customer_support".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            flow_dir: std::env::var("FLOW_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            http_port: env_parse("FLOW_HTTP_PORT")?,
            cli_flow_id: std::env::var("FLOW_ID")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.cli_flow_id),
        })
    }
}

/// Parse an optional environment variable. Unset or empty is `None`.
fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("'{raw}': {e}"),
                })
        }
        _ => Ok(None),
    }
}
