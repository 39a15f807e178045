use serde::{Deserialize, Serialize};

use super::proxy_conf::{parse_protocols, normalize_bypass, ProxyConf, ProxyScriptConf, StaticProxyConf};

/// OS source a raw probe record came from, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeSource {
    /// Per-user browser settings
    CurrentUser,
    /// System default (WinHTTP) proxy settings
    SystemDefault,
    /// Policy / registry record
    Registry,
}

impl ProbeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeSource::CurrentUser => "current_user",
            ProbeSource::SystemDefault => "system_default",
            ProbeSource::Registry => "registry",
        }
    }
}

impl std::fmt::Display for ProbeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transient record returned by one probe source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProbeResult {
    pub source: ProbeSource,
    pub proxy: Option<String>,
    pub bypass: Option<String>,
    pub auto_config_url: Option<String>,
    pub auto_detect: bool,
}

impl RawProbeResult {
    pub fn empty(source: ProbeSource) -> Self {
        Self {
            source,
            proxy: None,
            bypass: None,
            auto_config_url: None,
            auto_detect: false,
        }
    }

    /// Static proxy string, `""` when absent
    pub fn proxy_str(&self) -> &str {
        self.proxy.as_deref().unwrap_or("")
    }

    pub fn bypass_str(&self) -> &str {
        self.bypass.as_deref().unwrap_or("")
    }

    pub fn auto_config_url_str(&self) -> &str {
        self.auto_config_url.as_deref().unwrap_or("")
    }
}

/// Raw `Internet Settings` registry values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryValues {
    pub proxy_server: String,
    pub proxy_override: String,
    pub proxy_enable: u64,
    pub auto_config_url: String,
}

impl RegistryValues {
    /// Derive a snapshot directly from the registry record
    pub fn to_proxy_conf(&self) -> ProxyConf {
        let static_conf = if self.proxy_enable > 0 {
            StaticProxyConf {
                active: true,
                protocols: parse_protocols(&self.proxy_server),
                no_proxy: normalize_bypass(&self.proxy_override),
            }
        } else {
            StaticProxyConf::default()
        };

        ProxyConf {
            static_conf,
            automatic: ProxyScriptConf::new(!self.auto_config_url.is_empty(), &self.auto_config_url),
        }
    }
}
