//! Tracing subscriber setup

use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, LogFormat};
use crate::error::{ProxyConfError, Result};

/// Install the global subscriber. `RUST_LOG` takes precedence over `config.level`.
///
/// Calling this when a subscriber is already installed leaves the existing one in place.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(&config.level)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    };

    if installed.is_err() {
        debug!("Global tracing subscriber already installed");
    }
    Ok(())
}

fn default_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(format!("proxyconf={}", level.trim()))
        .map_err(|e| ProxyConfError::InvalidConfig(format!("invalid log level {level:?}: {e}")))
}
