//! Client-facing entry point tying the resolver, PAC resolution and the watcher together

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ProxyConfError, Result};
use crate::models::ProxyConf;
use crate::pac::{default_engine, PacResolver, ResolutionEngine};
use crate::probe::{default_probe, RawSourceProbe};
use crate::resolver::ConfigResolver;
use crate::services::{default_notifier, ChangeWatcher, StoreNotifier, WatchHandle, WatcherStatus};

const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns one configuration cache and everything that reads or refreshes it
///
/// Share across threads with `Arc<ProxyContext>`.
pub struct ProxyContext {
    resolver: Arc<ConfigResolver>,
    pac: PacResolver,
    watcher: ChangeWatcher,
    resolve_timeout: Duration,
}

impl ProxyContext {
    /// Context backed by the current platform's sources
    pub fn new() -> Self {
        Self::with_parts(default_probe(), default_engine(), default_notifier())
    }

    pub fn with_parts(
        probe: Arc<dyn RawSourceProbe>,
        engine: Arc<dyn ResolutionEngine>,
        notifier: Arc<dyn StoreNotifier>,
    ) -> Self {
        let resolver = Arc::new(ConfigResolver::new(probe));
        Self {
            watcher: ChangeWatcher::new(resolver.clone(), notifier),
            pac: PacResolver::new(engine),
            resolver,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    /// Platform context configured from `config`; starts watching when enabled
    ///
    /// A watcher that fails to start is logged and leaves the context usable.
    pub fn from_config(config: &Config) -> Self {
        let context = Self::new().with_resolve_timeout(config.resolve_timeout());
        if config.watch_changes {
            if let Err(e) = context.start_watching() {
                warn!("Proxy settings will not be refreshed automatically: {}", e);
            }
        }
        context
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Current snapshot, computed on first use
    pub fn get_config(&self) -> Arc<ProxyConf> {
        self.resolver.get_config()
    }

    pub fn reload_config(&self) -> Arc<ProxyConf> {
        self.resolver.reload_config()
    }

    /// Proxy URL for `target_url` from the current automatic configuration, or `""`
    pub fn resolve(&self, target_url: &str) -> Result<String> {
        let conf = self.get_config();
        self.pac.resolve(&conf.automatic, target_url)
    }

    /// [`ProxyContext::resolve`] bounded by the configured timeout
    pub async fn resolve_with_timeout(&self, target_url: &str) -> Result<String> {
        let conf = self.get_config();
        self.pac
            .resolve_with_timeout(&conf.automatic, target_url, self.resolve_timeout)
            .await
    }

    pub fn start_watching(&self) -> Result<WatchHandle> {
        let handle = self.watcher.start()?;
        info!("Watching proxy settings for changes");
        Ok(handle)
    }

    pub fn stop_watching(&self) -> Result<()> {
        self.watcher.stop()
    }

    pub fn watcher_error(&self) -> Option<ProxyConfError> {
        self.watcher.error()
    }

    pub fn watcher_status(&self) -> WatcherStatus {
        self.watcher.status()
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }
}

impl Default for ProxyContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AutoProxyOptions, ProbeSource, ProxyResultEntry, RawProbeResult, SCHEME_HTTP};
    use crate::pac::{CompletionLatch, RawHandle, UnsupportedEngine};
    use crate::probe::StaticProbe;
    use crate::services::ManualNotifier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    /// Engine that completes every request immediately with one HTTP proxy
    #[derive(Default)]
    struct ImmediateEngine {
        requests: AtomicUsize,
    }

    impl ResolutionEngine for ImmediateEngine {
        fn open_session(&self) -> Result<RawHandle> {
            Ok(RawHandle(1))
        }

        fn set_status_callback(&self, _session: RawHandle) -> Result<()> {
            Ok(())
        }

        fn create_resolver(&self, _session: RawHandle) -> Result<RawHandle> {
            Ok(RawHandle(2))
        }

        fn get_proxy_for_url(
            &self,
            _resolver: RawHandle,
            _url: &str,
            _options: &AutoProxyOptions,
            latch: &Arc<CompletionLatch>,
        ) -> Result<()> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            latch.signal();
            Ok(())
        }

        fn get_proxy_result(&self, _resolver: RawHandle) -> Result<Vec<ProxyResultEntry>> {
            Ok(vec![ProxyResultEntry {
                is_proxy: true,
                is_bypass: false,
                scheme: SCHEME_HTTP,
                proxy: "pac.corp".to_string(),
                port: 8080,
            }])
        }

        fn close_handle(&self, _handle: RawHandle) {}
    }

    fn auto_detect_probe() -> StaticProbe {
        let mut user = RawProbeResult::empty(ProbeSource::CurrentUser);
        user.auto_detect = true;
        StaticProbe::new().with_current_user(user)
    }

    #[test]
    fn test_resolve_uses_current_automatic_config() {
        let engine = Arc::new(ImmediateEngine::default());
        let context = ProxyContext::with_parts(
            Arc::new(auto_detect_probe()),
            engine.clone(),
            Arc::new(ManualNotifier::new()),
        );

        assert!(context.get_config().automatic.active);
        assert_eq!(
            context.resolve("http://example.com/").unwrap(),
            "http://pac.corp:8080"
        );
        assert_eq!(engine.requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_direct_skips_engine() {
        let engine = Arc::new(ImmediateEngine::default());
        let context = ProxyContext::with_parts(
            Arc::new(StaticProbe::new()),
            engine.clone(),
            Arc::new(ManualNotifier::new()),
        );

        assert!(context.get_config().is_direct());
        assert_eq!(context.resolve("http://example.com/").unwrap(), "");
        assert_eq!(engine.requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resolve_unsupported_engine() {
        let context = ProxyContext::with_parts(
            Arc::new(auto_detect_probe()),
            Arc::new(UnsupportedEngine),
            Arc::new(ManualNotifier::new()),
        );

        assert!(matches!(
            context.resolve("http://example.com/"),
            Err(ProxyConfError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_with_timeout() {
        let context = ProxyContext::with_parts(
            Arc::new(auto_detect_probe()),
            Arc::new(ImmediateEngine::default()),
            Arc::new(ManualNotifier::new()),
        )
        .with_resolve_timeout(Duration::from_secs(5));

        let proxy = context
            .resolve_with_timeout("https://example.com/")
            .await
            .unwrap();
        assert_eq!(proxy, "http://pac.corp:8080");
    }

    #[test]
    fn test_watching_lifecycle() {
        let notifier = Arc::new(ManualNotifier::new());
        let context = Arc::new(ProxyContext::with_parts(
            Arc::new(StaticProbe::new()),
            Arc::new(ImmediateEngine::default()),
            notifier.clone(),
        ));
        assert_eq!(context.watcher_status(), WatcherStatus::Idle);

        let handle = context.start_watching().unwrap();
        assert_eq!(context.watcher_status(), WatcherStatus::Watching);

        let before = context.resolver().reload_count();
        notifier.trigger();
        let deadline = Instant::now() + Duration::from_secs(5);
        while context.resolver().reload_count() == before && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(context.resolver().reload_count() > before);

        let (tx, rx) = mpsc::channel();
        let stopping = context.clone();
        thread::spawn(move || {
            let _ = tx.send(stopping.stop_watching());
        });
        rx.recv_timeout(Duration::from_secs(5))
            .expect("stop_watching did not return in time")
            .unwrap();
        assert!(handle.is_cancelled());
        assert_eq!(context.watcher_status(), WatcherStatus::Stopped);
        assert!(context.watcher_error().is_none());
    }
}
