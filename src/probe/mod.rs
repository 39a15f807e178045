//! Raw OS proxy configuration sources
//!
//! A probe returns one record per source. A failing source means "unavailable"
//! and only moves resolution on to the next tier.

#[cfg(windows)]
mod windows;

#[cfg(windows)]
pub use self::windows::WindowsProbe;
#[cfg(windows)]
pub(crate) use self::windows::{to_wide, wide_to_string};

use std::sync::Arc;

use crate::error::{ProxyConfError, Result};
use crate::models::{ProbeSource, RawProbeResult, RegistryValues};

/// Trait for querying the OS proxy configuration stores
pub trait RawSourceProbe: Send + Sync {
    /// Per-user browser settings
    fn current_user(&self) -> Result<RawProbeResult>;

    /// System default proxy settings
    fn system_default(&self) -> Result<RawProbeResult>;

    /// Policy / registry record, read directly
    fn registry(&self) -> Result<RegistryValues>;
}

/// Probe for platforms without an OS proxy store
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedProbe;

impl UnsupportedProbe {
    fn unavailable(source: ProbeSource) -> ProxyConfError {
        ProxyConfError::source_unavailable(source, std::env::consts::OS)
    }
}

impl RawSourceProbe for UnsupportedProbe {
    fn current_user(&self) -> Result<RawProbeResult> {
        Err(Self::unavailable(ProbeSource::CurrentUser))
    }

    fn system_default(&self) -> Result<RawProbeResult> {
        Err(Self::unavailable(ProbeSource::SystemDefault))
    }

    fn registry(&self) -> Result<RegistryValues> {
        Err(Self::unavailable(ProbeSource::Registry))
    }
}

/// Probe answering from fixed records, `None` meaning the source is unavailable
#[derive(Debug, Default, Clone)]
pub struct StaticProbe {
    pub current_user: Option<RawProbeResult>,
    pub system_default: Option<RawProbeResult>,
    pub registry: Option<RegistryValues>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_current_user(mut self, record: RawProbeResult) -> Self {
        self.current_user = Some(record);
        self
    }

    pub fn with_system_default(mut self, record: RawProbeResult) -> Self {
        self.system_default = Some(record);
        self
    }

    pub fn with_registry(mut self, values: RegistryValues) -> Self {
        self.registry = Some(values);
        self
    }
}

impl RawSourceProbe for StaticProbe {
    fn current_user(&self) -> Result<RawProbeResult> {
        self.current_user
            .clone()
            .ok_or_else(|| ProxyConfError::source_unavailable(ProbeSource::CurrentUser, "not configured"))
    }

    fn system_default(&self) -> Result<RawProbeResult> {
        self.system_default
            .clone()
            .ok_or_else(|| ProxyConfError::source_unavailable(ProbeSource::SystemDefault, "not configured"))
    }

    fn registry(&self) -> Result<RegistryValues> {
        self.registry
            .clone()
            .ok_or_else(|| ProxyConfError::source_unavailable(ProbeSource::Registry, "not configured"))
    }
}

/// Probe for the current platform
pub fn default_probe() -> Arc<dyn RawSourceProbe> {
    #[cfg(windows)]
    {
        Arc::new(WindowsProbe::new())
    }
    #[cfg(not(windows))]
    {
        Arc::new(UnsupportedProbe)
    }
}
