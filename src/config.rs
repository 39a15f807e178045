use crate::error::{ProxyConfError, Result};
use std::env;
use std::time::Duration;

/// Library configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Upper bound for a PAC resolution in seconds
    pub resolve_timeout_secs: u64,
    /// Start the change watcher when a context is built from this config
    pub watch_changes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ProxyConfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ProxyConfError::InvalidConfig(format!(
                "PROXYCONF_LOG_FORMAT must be pretty or json, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            resolve_timeout_secs: 30,
            watch_changes: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let resolve_timeout_secs: u64 = get_env_or("PROXYCONF_RESOLVE_TIMEOUT_SECS", "30")
            .parse()
            .map_err(|_| {
                ProxyConfError::InvalidConfig(
                    "PROXYCONF_RESOLVE_TIMEOUT_SECS must be a valid number".into(),
                )
            })?;
        if resolve_timeout_secs == 0 {
            return Err(ProxyConfError::InvalidConfig(
                "PROXYCONF_RESOLVE_TIMEOUT_SECS must be greater than zero".into(),
            ));
        }

        Ok(Config {
            log: LogConfig {
                level: get_env_or("PROXYCONF_LOG_LEVEL", "info"),
                format: get_env_or("PROXYCONF_LOG_FORMAT", "pretty").parse()?,
            },
            resolve_timeout_secs,
            watch_changes: get_env_or("PROXYCONF_WATCH_CHANGES", "false")
                .parse()
                .unwrap_or(false),
        })
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
