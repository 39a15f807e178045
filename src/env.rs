//! Publish the static proxy configuration as `*_proxy` environment variables

use tracing::debug;

use crate::models::ProxyConf;

const PROXY_SCHEMES: [&str; 2] = ["http", "https"];

/// Write `http_proxy`, `https_proxy` and `no_proxy` through `setter`
///
/// Nothing is written unless the static configuration is active. Schemes
/// without an entry (and no default entry) are skipped.
pub fn override_env_with_static_proxy(conf: &ProxyConf, mut setter: impl FnMut(&str, &str)) {
    let static_conf = &conf.static_conf;
    if !static_conf.active {
        return;
    }

    for scheme in PROXY_SCHEMES {
        if let Some(proxy) = static_conf.proxy_for_scheme(scheme) {
            let key = format!("{scheme}_proxy");
            debug!("Setting {} from static proxy configuration", key);
            setter(&key, proxy);
        }
    }

    if !static_conf.no_proxy.is_empty() {
        setter("no_proxy", &static_conf.no_proxy);
    }
}

/// Setter writing to the current process environment
pub fn process_env_setter(key: &str, value: &str) {
    std::env::set_var(key, value);
}
