use serde::{Deserialize, Serialize};

pub const AUTOPROXY_AUTO_DETECT: u32 = 0x0000_0001;
pub const AUTOPROXY_CONFIG_URL: u32 = 0x0000_0002;
pub const AUTO_DETECT_TYPE_DHCP: u32 = 0x0000_0001;
pub const AUTO_DETECT_TYPE_DNS_A: u32 = 0x0000_0002;

/// Scheme codes reported by the resolution engine
pub const SCHEME_HTTP: u32 = 1;
pub const SCHEME_HTTPS: u32 = 2;
pub const SCHEME_SOCKS: u32 = 4;

/// How the resolution engine should locate the PAC script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoProxyMode {
    /// Evaluate the script at an explicit URL
    ConfigUrl(String),
    /// Discover the script through DNS-A and DHCP
    AutoDetect,
}

impl AutoProxyMode {
    pub fn from_url(auto_config_url: &str) -> Self {
        if auto_config_url.is_empty() {
            AutoProxyMode::AutoDetect
        } else {
            AutoProxyMode::ConfigUrl(auto_config_url.to_string())
        }
    }
}

/// Options passed to the get-proxy-for-url call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoProxyOptions {
    pub flags: u32,
    pub auto_detect_flags: u32,
    pub auto_config_url: Option<String>,
    pub auto_logon_if_challenged: bool,
}

impl From<&AutoProxyMode> for AutoProxyOptions {
    fn from(mode: &AutoProxyMode) -> Self {
        match mode {
            AutoProxyMode::ConfigUrl(url) => Self {
                flags: AUTOPROXY_CONFIG_URL,
                auto_detect_flags: 0,
                auto_config_url: Some(url.clone()),
                auto_logon_if_challenged: true,
            },
            AutoProxyMode::AutoDetect => Self {
                flags: AUTOPROXY_AUTO_DETECT,
                auto_detect_flags: AUTO_DETECT_TYPE_DNS_A | AUTO_DETECT_TYPE_DHCP,
                auto_config_url: None,
                auto_logon_if_challenged: true,
            },
        }
    }
}

/// One candidate returned by the resolution engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResultEntry {
    pub is_proxy: bool,
    pub is_bypass: bool,
    pub scheme: u32,
    pub proxy: String,
    pub port: u16,
}

/// Normalized proxy scheme of a PAC result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacScheme {
    #[default]
    None,
    Http,
    Https,
    Socks5,
}

impl PacScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacScheme::None => "none",
            PacScheme::Http => "http",
            PacScheme::Https => "https",
            PacScheme::Socks5 => "socks5",
        }
    }
}

impl std::fmt::Display for PacScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized outcome of a PAC resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacResult {
    pub scheme: PacScheme,
    pub host: String,
    pub port: u16,
}

impl PacResult {
    pub fn no_proxy() -> Self {
        Self::default()
    }

    /// Translate the first proxy entry of an engine result
    pub fn from_entries(entries: &[ProxyResultEntry]) -> Self {
        entries
            .iter()
            .find(|entry| entry.is_proxy)
            .map(Self::from_entry)
            .unwrap_or_default()
    }

    pub fn from_entry(entry: &ProxyResultEntry) -> Self {
        let (scheme, host) = match entry.scheme {
            SCHEME_HTTP => (PacScheme::Http, entry.proxy.as_str()),
            SCHEME_HTTPS => (PacScheme::Https, entry.proxy.as_str()),
            SCHEME_SOCKS => {
                if entry.proxy.starts_with("4 ") {
                    // SOCKS4 is not supported
                    return Self::no_proxy();
                }
                let host = entry.proxy.strip_prefix("5 ").unwrap_or(&entry.proxy);
                (PacScheme::Socks5, host)
            }
            _ => return Self::no_proxy(),
        };

        Self {
            scheme,
            host: host.to_string(),
            port: entry.port,
        }
    }

    pub fn is_proxy(&self) -> bool {
        self.scheme != PacScheme::None
    }

    /// `scheme://host:port`, or `""` for no proxy
    pub fn to_proxy_url(&self) -> String {
        if !self.is_proxy() {
            return String::new();
        }
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}
