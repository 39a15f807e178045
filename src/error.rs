use thiserror::Error;

/// Unified error type for proxy configuration discovery
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyConfError {
    // Probe errors
    #[error("Proxy source {probe} unavailable: {reason}")]
    SourceUnavailable { probe: String, reason: String },

    #[error("Proxy configuration could not be resolved: {0}")]
    ResolutionFailure(String),

    // OS resolution engine errors
    #[error("{call} failed with code {code}")]
    OsCall { call: &'static str, code: u32 },

    #[error("Invalid target URL: {0}")]
    InvalidUrl(String),

    #[error("Proxy resolution timed out after {timeout_ms}ms")]
    ResolveTimeout { timeout_ms: u64 },

    // Watcher errors
    #[error("Change watcher setup failed: {0}")]
    WatcherSetup(String),

    #[error("Change watcher stopped unexpectedly: {0}")]
    WatcherRuntime(String),

    #[error("Change watcher is already running")]
    AlreadyWatching,

    // Platform / configuration errors
    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for proxyconf operations
pub type Result<T> = std::result::Result<T, ProxyConfError>;

impl ProxyConfError {
    pub fn source_unavailable(probe: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        ProxyConfError::SourceUnavailable {
            probe: probe.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that only move configuration resolution on to the next tier
    pub fn is_fallback_trigger(&self) -> bool {
        matches!(
            self,
            ProxyConfError::SourceUnavailable { .. } | ProxyConfError::Unsupported(_)
        )
    }

    /// Errors raised by a call into the OS resolution engine
    pub fn is_os_failure(&self) -> bool {
        matches!(self, ProxyConfError::OsCall { .. })
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for ProxyConfError {
    fn from(err: url::ParseError) -> Self {
        ProxyConfError::InvalidUrl(err.to_string())
    }
}
