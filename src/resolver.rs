//! Cached proxy configuration
//!
//! The snapshot is computed lazily on first use and replaced wholesale on reload.
//! All recomputation goes through one mutex so probe calls from overlapping
//! reloads never interleave.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::models::{ProbeSource, ProxyConf, ProxyScriptConf, RawProbeResult, StaticProxyConf};
use crate::probe::RawSourceProbe;

/// Values adopted from the first tier that yields something usable
#[derive(Debug, Clone, PartialEq, Eq)]
struct WorkingValues {
    source: ProbeSource,
    proxy: String,
    bypass: String,
    auto_config_url: String,
    auto_detect: bool,
}

impl WorkingValues {
    fn into_proxy_conf(self) -> ProxyConf {
        let static_conf = if self.proxy.is_empty() {
            StaticProxyConf::default()
        } else {
            StaticProxyConf::from_raw(&self.proxy, &self.bypass)
        };
        let automatic_active = !self.auto_config_url.is_empty() || self.auto_detect;

        ProxyConf {
            static_conf,
            automatic: ProxyScriptConf::new(automatic_active, &self.auto_config_url),
        }
    }
}

/// Owns the cached `ProxyConf` snapshot and the logic to recompute it
pub struct ConfigResolver {
    probe: Arc<dyn RawSourceProbe>,
    snapshot: ArcSwapOption<ProxyConf>,
    reload_lock: Mutex<()>,
    reloads: AtomicU64,
}

impl ConfigResolver {
    pub fn new(probe: Arc<dyn RawSourceProbe>) -> Self {
        Self {
            probe,
            snapshot: ArcSwapOption::empty(),
            reload_lock: Mutex::new(()),
            reloads: AtomicU64::new(0),
        }
    }

    /// Current snapshot, computed on first use
    pub fn get_config(&self) -> Arc<ProxyConf> {
        if let Some(conf) = self.snapshot.load_full() {
            return conf;
        }

        let _guard = self.reload_lock.lock();
        // Another caller may have finished the first computation while we waited.
        if let Some(conf) = self.snapshot.load_full() {
            return conf;
        }
        self.recompute_locked()
    }

    /// Force recomputation; the new snapshot is published before returning
    pub fn reload_config(&self) -> Arc<ProxyConf> {
        let _guard = self.reload_lock.lock();
        self.recompute_locked()
    }

    /// Number of completed recomputations
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    #[instrument(skip(self))]
    fn recompute_locked(&self) -> Arc<ProxyConf> {
        let conf = Arc::new(self.compute());
        self.snapshot.store(Some(Arc::clone(&conf)));
        self.reloads.fetch_add(1, Ordering::Relaxed);

        info!(
            static_active = conf.static_conf.active,
            automatic_active = conf.automatic.active,
            "Proxy configuration snapshot replaced"
        );
        conf
    }

    fn compute(&self) -> ProxyConf {
        let user = self.probe_source(ProbeSource::CurrentUser, || self.probe.current_user());
        let user_auto_config_url = user
            .as_ref()
            .map(|r| r.auto_config_url_str().to_string())
            .unwrap_or_default();

        let working = user
            .and_then(Self::from_current_user)
            .or_else(|| {
                self.probe_source(ProbeSource::SystemDefault, || self.probe.system_default())
                    .and_then(|record| Self::from_system_default(record, &user_auto_config_url))
            });

        match working {
            Some(values) => {
                debug!(source = %values.source, "Using proxy settings from probe source");
                values.into_proxy_conf()
            }
            None => self.from_registry(),
        }
    }

    fn probe_source<F>(&self, source: ProbeSource, query: F) -> Option<RawProbeResult>
    where
        F: FnOnce() -> crate::error::Result<RawProbeResult>,
    {
        match query() {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(source = %source, "Proxy source unavailable: {}", e);
                None
            }
        }
    }

    fn from_current_user(record: RawProbeResult) -> Option<WorkingValues> {
        if record.proxy_str().is_empty() && !record.auto_detect {
            return None;
        }
        Some(WorkingValues {
            source: record.source,
            proxy: record.proxy_str().to_string(),
            bypass: record.bypass_str().to_string(),
            auto_config_url: record.auto_config_url_str().to_string(),
            auto_detect: record.auto_detect,
        })
    }

    /// Proxy and bypass always come from the same record; only the
    /// user's auto-config URL carries over.
    fn from_system_default(record: RawProbeResult, user_auto_config_url: &str) -> Option<WorkingValues> {
        if record.proxy_str().is_empty() {
            return None;
        }
        Some(WorkingValues {
            source: record.source,
            proxy: record.proxy_str().to_string(),
            bypass: record.bypass_str().to_string(),
            auto_config_url: user_auto_config_url.to_string(),
            auto_detect: false,
        })
    }

    fn from_registry(&self) -> ProxyConf {
        match self.probe.registry() {
            Ok(values) => {
                debug!(source = %ProbeSource::Registry, "Using proxy settings from registry");
                values.to_proxy_conf()
            }
            Err(e) => {
                warn!("No proxy source available, using direct connection: {}", e);
                ProxyConf::default()
            }
        }
    }
}
