use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Normalized proxy configuration snapshot
///
/// Built once per reload and never mutated afterwards. Callers must check
/// `active` on each half before reading the remaining fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConf {
    #[serde(rename = "static")]
    pub static_conf: StaticProxyConf,
    pub automatic: ProxyScriptConf,
}

impl ProxyConf {
    /// True when neither static nor automatic configuration is active
    pub fn is_direct(&self) -> bool {
        !self.static_conf.active && !self.automatic.active
    }
}

/// Static (manually configured) proxy settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticProxyConf {
    pub active: bool,
    /// Scheme to `host:port`; the `""` key applies to schemes not listed
    pub protocols: HashMap<String, String>,
    /// Comma-separated bypass list
    pub no_proxy: String,
}

impl StaticProxyConf {
    /// Build an active static configuration from raw proxy and bypass strings
    pub fn from_raw(proxy: &str, bypass: &str) -> Self {
        Self {
            active: true,
            protocols: parse_protocols(proxy),
            no_proxy: normalize_bypass(bypass),
        }
    }

    /// Proxy endpoint for `scheme`, falling back to the default entry
    pub fn proxy_for_scheme(&self, scheme: &str) -> Option<&str> {
        if !self.active {
            return None;
        }
        self.protocols
            .get(scheme)
            .or_else(|| self.protocols.get(""))
            .map(String::as_str)
    }

    /// Check whether `host` matches an entry of the bypass list
    pub fn is_bypassed(&self, host: &str) -> bool {
        if !self.active || self.no_proxy.is_empty() {
            return false;
        }
        let host = host.trim().to_lowercase();
        self.no_proxy
            .split(',')
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .any(|pattern| bypass_matches(&pattern, &host))
    }
}

fn bypass_matches(pattern: &str, host: &str) -> bool {
    if pattern == "<local>" {
        return !host.contains('.');
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return host == suffix || host.ends_with(&format!(".{}", suffix));
    }
    if let Some(suffix) = pattern.strip_prefix('.') {
        return host.ends_with(&format!(".{}", suffix));
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return host.ends_with(suffix);
    }
    pattern == host
}

/// Automatic (PAC / auto-detect) proxy settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyScriptConf {
    pub active: bool,
    /// PAC script URL; empty means pure auto-detect
    pub pre_configured_url: String,
}

impl ProxyScriptConf {
    pub fn new(active: bool, url: &str) -> Self {
        Self {
            active,
            pre_configured_url: if active { url.to_string() } else { String::new() },
        }
    }
}

/// Parse a `scheme=host:port;...` list into a scheme map
///
/// A segment without `=` is stored under the empty key.
pub fn parse_protocols(proxy: &str) -> HashMap<String, String> {
    let mut protocols = HashMap::new();
    for segment in proxy.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        match segment.split_once('=') {
            Some((scheme, endpoint)) => {
                protocols.insert(scheme.to_string(), endpoint.to_string());
            }
            None => {
                protocols.insert(String::new(), segment.to_string());
            }
        }
    }
    protocols
}

/// Rewrite a `;`-separated bypass list into the comma-separated form
pub fn normalize_bypass(bypass: &str) -> String {
    bypass.replace(';', ",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_protocols_per_scheme() {
        let protocols = parse_protocols("http=1.2.3.4:80;https=1.2.3.4:443");
        assert_eq!(protocols.len(), 2);
        assert_eq!(protocols["http"], "1.2.3.4:80");
        assert_eq!(protocols["https"], "1.2.3.4:443");
    }

    #[test]
    fn test_parse_protocols_bare_value() {
        let protocols = parse_protocols("1.2.3.4:80");
        assert_eq!(protocols.len(), 1);
        assert_eq!(protocols[""], "1.2.3.4:80");
    }

    #[test]
    fn test_parse_protocols_skips_blank_segments() {
        let protocols = parse_protocols(" http=a:1 ;; ftp=b:2=3;");
        assert_eq!(protocols["http"], "a:1");
        // only the first '=' splits
        assert_eq!(protocols["ftp"], "b:2=3");
        assert!(!protocols.contains_key(""));
    }

    #[test]
    fn test_normalize_bypass() {
        assert_eq!(normalize_bypass("*.local;10.0.0.0/8"), "*.local,10.0.0.0/8");
        assert_eq!(normalize_bypass(""), "");
    }

    #[test]
    fn test_proxy_for_scheme_fallback() {
        let conf = StaticProxyConf::from_raw("https=secure:443;plain:3128", "");
        assert_eq!(conf.proxy_for_scheme("https"), Some("secure:443"));
        assert_eq!(conf.proxy_for_scheme("http"), Some("plain:3128"));

        let only_http = StaticProxyConf::from_raw("http=web:80", "");
        assert_eq!(only_http.proxy_for_scheme("https"), None);

        assert_eq!(StaticProxyConf::default().proxy_for_scheme("http"), None);
    }

    #[test]
    fn test_is_bypassed() {
        let conf = StaticProxyConf::from_raw("proxy:80", "*.corp.example;.internal;<local>;10.1.2.3");
        assert!(conf.is_bypassed("build.corp.example"));
        assert!(conf.is_bypassed("corp.example"));
        assert!(conf.is_bypassed("db.internal"));
        assert!(conf.is_bypassed("intranet"));
        assert!(conf.is_bypassed("10.1.2.3"));
        assert!(!conf.is_bypassed("example.com"));
        assert!(!StaticProxyConf::default().is_bypassed("intranet"));
    }

    #[test]
    fn test_script_conf_inactive_drops_url() {
        let conf = ProxyScriptConf::new(false, "http://wpad/wpad.dat");
        assert!(conf.pre_configured_url.is_empty());
        let conf = ProxyScriptConf::new(true, "");
        assert!(conf.active);
        assert!(conf.pre_configured_url.is_empty());
    }

    #[test]
    fn test_proxy_conf_serializes_static_key() {
        let conf = ProxyConf {
            static_conf: StaticProxyConf::from_raw("1.2.3.4:80", ""),
            automatic: ProxyScriptConf::default(),
        };
        let json = serde_json::to_value(&conf).unwrap();
        assert_eq!(json["static"]["active"], true);
        assert_eq!(json["static"]["protocols"][""], "1.2.3.4:80");
        assert_eq!(json["automatic"]["active"], false);
        assert!(!conf.is_direct());
        assert!(ProxyConf::default().is_direct());
    }
}
