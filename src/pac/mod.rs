//! PAC / auto-detect proxy resolution
//!
//! The OS engine resolves asynchronously and reports completion through a
//! callback on a thread it owns. `PacResolver` drives one request to completion
//! and blocks the caller on a per-call [`CompletionLatch`] until the callback fires.

mod latch;
#[cfg(windows)]
mod windows;

pub use latch::CompletionLatch;
#[cfg(windows)]
pub use self::windows::WinHttpEngine;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};
use url::Url;

use crate::error::{ProxyConfError, Result};
use crate::models::{AutoProxyMode, AutoProxyOptions, PacResult, ProxyResultEntry, ProxyScriptConf};

/// Opaque OS handle value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub usize);

/// The OS asynchronous proxy resolution engine, one step per method
pub trait ResolutionEngine: Send + Sync {
    /// Open a session configured for asynchronous operation
    fn open_session(&self) -> Result<RawHandle>;

    /// Register the completion callback on the session
    fn set_status_callback(&self, session: RawHandle) -> Result<()>;

    /// Create a resolver object bound to the session
    fn create_resolver(&self, session: RawHandle) -> Result<RawHandle>;

    /// Issue the request; `Ok` means it is pending and `latch` will be signalled
    /// from the callback once the result is ready
    fn get_proxy_for_url(
        &self,
        resolver: RawHandle,
        url: &str,
        options: &AutoProxyOptions,
        latch: &Arc<CompletionLatch>,
    ) -> Result<()>;

    /// Copy out the result entries and release the result record
    fn get_proxy_result(&self, resolver: RawHandle) -> Result<Vec<ProxyResultEntry>>;

    fn close_handle(&self, handle: RawHandle);
}

/// Closes an engine handle when dropped
struct HandleGuard<'a> {
    engine: &'a dyn ResolutionEngine,
    handle: RawHandle,
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        self.engine.close_handle(self.handle);
    }
}

/// Engine for platforms without an OS resolver
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedEngine;

impl ResolutionEngine for UnsupportedEngine {
    fn open_session(&self) -> Result<RawHandle> {
        Err(ProxyConfError::Unsupported(format!(
            "proxy auto-configuration is not available on {}",
            std::env::consts::OS
        )))
    }

    fn set_status_callback(&self, _session: RawHandle) -> Result<()> {
        Ok(())
    }

    fn create_resolver(&self, _session: RawHandle) -> Result<RawHandle> {
        self.open_session()
    }

    fn get_proxy_for_url(
        &self,
        _resolver: RawHandle,
        _url: &str,
        _options: &AutoProxyOptions,
        _latch: &Arc<CompletionLatch>,
    ) -> Result<()> {
        self.open_session().map(|_| ())
    }

    fn get_proxy_result(&self, _resolver: RawHandle) -> Result<Vec<ProxyResultEntry>> {
        Ok(Vec::new())
    }

    fn close_handle(&self, _handle: RawHandle) {}
}

/// Engine for the current platform
pub fn default_engine() -> Arc<dyn ResolutionEngine> {
    #[cfg(windows)]
    {
        Arc::new(WinHttpEngine::new())
    }
    #[cfg(not(windows))]
    {
        Arc::new(UnsupportedEngine)
    }
}

/// Resolves the proxy for a target URL from the automatic configuration
#[derive(Clone)]
pub struct PacResolver {
    engine: Arc<dyn ResolutionEngine>,
}

impl PacResolver {
    pub fn new(engine: Arc<dyn ResolutionEngine>) -> Self {
        Self { engine }
    }

    /// Proxy URL for `target_url`, or `""` when no proxy applies
    pub fn resolve(&self, automatic: &ProxyScriptConf, target_url: &str) -> Result<String> {
        self.resolve_entry(automatic, target_url)
            .map(|result| result.to_proxy_url())
    }

    /// Structured form of [`PacResolver::resolve`]
    #[instrument(skip(self, automatic), fields(pac_url = %automatic.pre_configured_url))]
    pub fn resolve_entry(&self, automatic: &ProxyScriptConf, target_url: &str) -> Result<PacResult> {
        if !automatic.active {
            return Ok(PacResult::no_proxy());
        }
        Url::parse(target_url)?;

        let mode = AutoProxyMode::from_url(&automatic.pre_configured_url);
        let entries = self.run_request(&mode, target_url)?;
        let result = PacResult::from_entries(&entries);

        debug!(
            entries = entries.len(),
            scheme = %result.scheme,
            "PAC resolution complete"
        );
        Ok(result)
    }

    /// Run [`PacResolver::resolve`] on a blocking thread, bounded by `timeout`
    ///
    /// On timeout the OS request keeps running in the background and still
    /// releases its handles when it completes.
    pub async fn resolve_with_timeout(
        &self,
        automatic: &ProxyScriptConf,
        target_url: &str,
        timeout: Duration,
    ) -> Result<String> {
        if !automatic.active {
            return Ok(String::new());
        }

        let resolver = self.clone();
        let automatic = automatic.clone();
        let target_url = target_url.to_string();
        let task = tokio::task::spawn_blocking(move || resolver.resolve(&automatic, &target_url));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ProxyConfError::ResolutionFailure(format!(
                "resolution task failed: {}",
                e
            ))),
            Err(_) => Err(ProxyConfError::ResolveTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn run_request(&self, mode: &AutoProxyMode, target_url: &str) -> Result<Vec<ProxyResultEntry>> {
        let engine = self.engine.as_ref();

        let session = HandleGuard {
            engine,
            handle: engine.open_session()?,
        };
        engine.set_status_callback(session.handle)?;

        let resolver = HandleGuard {
            engine,
            handle: engine.create_resolver(session.handle)?,
        };

        let latch = Arc::new(CompletionLatch::new());
        let options = AutoProxyOptions::from(mode);
        engine.get_proxy_for_url(resolver.handle, target_url, &options, &latch)?;

        latch.wait();

        // guards drop resolver first, then session
        engine.get_proxy_result(resolver.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SCHEME_HTTP, SCHEME_SOCKS};
    use parking_lot::Mutex;
    use std::thread;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Open,
        Callback,
        Create,
        Get(AutoProxyOptions),
        Result,
        Close(RawHandle),
    }

    /// Scripted engine that completes requests from a separate thread
    #[derive(Default)]
    struct ScriptedEngine {
        calls: Mutex<Vec<Call>>,
        entries: Vec<ProxyResultEntry>,
        fail_create: bool,
    }

    impl ScriptedEngine {
        fn with_entries(entries: Vec<ProxyResultEntry>) -> Self {
            Self {
                entries,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    impl ResolutionEngine for ScriptedEngine {
        fn open_session(&self) -> Result<RawHandle> {
            self.calls.lock().push(Call::Open);
            Ok(RawHandle(1))
        }

        fn set_status_callback(&self, _session: RawHandle) -> Result<()> {
            self.calls.lock().push(Call::Callback);
            Ok(())
        }

        fn create_resolver(&self, _session: RawHandle) -> Result<RawHandle> {
            self.calls.lock().push(Call::Create);
            if self.fail_create {
                return Err(ProxyConfError::OsCall {
                    call: "WinHttpCreateProxyResolver",
                    code: 12004,
                });
            }
            Ok(RawHandle(2))
        }

        fn get_proxy_for_url(
            &self,
            _resolver: RawHandle,
            _url: &str,
            options: &AutoProxyOptions,
            latch: &Arc<CompletionLatch>,
        ) -> Result<()> {
            self.calls.lock().push(Call::Get(options.clone()));
            let latch = latch.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                latch.signal();
            });
            Ok(())
        }

        fn get_proxy_result(&self, _resolver: RawHandle) -> Result<Vec<ProxyResultEntry>> {
            self.calls.lock().push(Call::Result);
            Ok(self.entries.clone())
        }

        fn close_handle(&self, handle: RawHandle) {
            self.calls.lock().push(Call::Close(handle));
        }
    }

    fn entry(scheme: u32, proxy: &str, port: u16) -> ProxyResultEntry {
        ProxyResultEntry {
            is_proxy: true,
            is_bypass: false,
            scheme,
            proxy: proxy.to_string(),
            port,
        }
    }

    fn active(url: &str) -> ProxyScriptConf {
        ProxyScriptConf::new(true, url)
    }

    #[test]
    fn test_inactive_short_circuits() {
        let engine = Arc::new(ScriptedEngine::default());
        let resolver = PacResolver::new(engine.clone());

        let proxy = resolver
            .resolve(&ProxyScriptConf::default(), "http://example.com")
            .unwrap();
        assert_eq!(proxy, "");
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_resolve_http_entry() {
        let engine = Arc::new(ScriptedEngine::with_entries(vec![entry(SCHEME_HTTP, "proxy.co", 8080)]));
        let resolver = PacResolver::new(engine.clone());

        let proxy = resolver
            .resolve(&active("http://wpad/proxy.pac"), "http://example.com/")
            .unwrap();
        assert_eq!(proxy, "http://proxy.co:8080");
    }

    #[test]
    fn test_resolve_socks_entries() {
        let socks5 = Arc::new(ScriptedEngine::with_entries(vec![entry(SCHEME_SOCKS, "5 proxy.co", 8080)]));
        assert_eq!(
            PacResolver::new(socks5)
                .resolve(&active(""), "https://example.com")
                .unwrap(),
            "socks5://proxy.co:8080"
        );

        let socks4 = Arc::new(ScriptedEngine::with_entries(vec![entry(SCHEME_SOCKS, "4 proxy.co", 8080)]));
        assert_eq!(
            PacResolver::new(socks4)
                .resolve(&active(""), "https://example.com")
                .unwrap(),
            ""
        );
    }

    #[test]
    fn test_no_entries_is_not_an_error() {
        let engine = Arc::new(ScriptedEngine::default());
        let result = PacResolver::new(engine)
            .resolve_entry(&active(""), "https://example.com")
            .unwrap();
        assert!(!result.is_proxy());
    }

    #[test]
    fn test_call_order_and_release() {
        let engine = Arc::new(ScriptedEngine::with_entries(vec![entry(SCHEME_HTTP, "p", 80)]));
        PacResolver::new(engine.clone())
            .resolve(&active("http://wpad/proxy.pac"), "http://example.com")
            .unwrap();

        let calls = engine.calls();
        assert_eq!(calls[0], Call::Open);
        assert_eq!(calls[1], Call::Callback);
        assert_eq!(calls[2], Call::Create);
        assert!(matches!(&calls[3], Call::Get(opts) if opts.auto_config_url.as_deref() == Some("http://wpad/proxy.pac")));
        assert_eq!(calls[4], Call::Result);
        assert_eq!(calls[5], Call::Close(RawHandle(2)));
        assert_eq!(calls[6], Call::Close(RawHandle(1)));
        assert_eq!(calls.len(), 7);
    }

    #[test]
    fn test_auto_detect_mode_without_url() {
        let engine = Arc::new(ScriptedEngine::default());
        PacResolver::new(engine.clone())
            .resolve(&active(""), "http://example.com")
            .unwrap();

        let get = engine
            .calls()
            .into_iter()
            .find_map(|c| match c {
                Call::Get(opts) => Some(opts),
                _ => None,
            })
            .unwrap();
        assert_eq!(get, AutoProxyOptions::from(&AutoProxyMode::AutoDetect));
    }

    #[test]
    fn test_os_failure_releases_session() {
        let engine = Arc::new(ScriptedEngine {
            fail_create: true,
            ..Default::default()
        });
        let err = PacResolver::new(engine.clone())
            .resolve(&active(""), "http://example.com")
            .unwrap_err();
        assert!(err.is_os_failure());

        let calls = engine.calls();
        assert_eq!(calls.last(), Some(&Call::Close(RawHandle(1))));
        assert!(!calls.contains(&Call::Result));
    }

    #[test]
    fn test_invalid_target_url() {
        let engine = Arc::new(ScriptedEngine::default());
        let err = PacResolver::new(engine.clone())
            .resolve(&active(""), "not a url")
            .unwrap_err();
        assert!(matches!(err, ProxyConfError::InvalidUrl(_)));
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_unsupported_engine_errors() {
        let err = PacResolver::new(Arc::new(UnsupportedEngine))
            .resolve(&active(""), "http://example.com")
            .unwrap_err();
        assert!(matches!(err, ProxyConfError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_resolve_with_timeout() {
        let engine = Arc::new(ScriptedEngine::with_entries(vec![entry(SCHEME_HTTP, "proxy.co", 3128)]));
        let resolver = PacResolver::new(engine);

        let proxy = resolver
            .resolve_with_timeout(&active(""), "http://example.com", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(proxy, "http://proxy.co:3128");
    }

    /// Engine whose callback never fires
    struct StalledEngine;

    impl ResolutionEngine for StalledEngine {
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
            let latch = latch.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(300));
                latch.signal();
            });
            Ok(())
        }
        fn get_proxy_result(&self, _resolver: RawHandle) -> Result<Vec<ProxyResultEntry>> {
            Ok(Vec::new())
        }
        fn close_handle(&self, _handle: RawHandle) {}
    }

    #[tokio::test]
    async fn test_resolve_with_timeout_elapses() {
        let resolver = PacResolver::new(Arc::new(StalledEngine));
        let err = resolver
            .resolve_with_timeout(&active(""), "http://example.com", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, ProxyConfError::ResolveTimeout { timeout_ms: 20 });
    }

    #[test]
    fn test_resolve_with_timeout_inactive_blocking_runtime() {
        let resolver = PacResolver::new(Arc::new(ScriptedEngine::default()));
        let proxy = tokio_test::block_on(resolver.resolve_with_timeout(
            &ProxyScriptConf::default(),
            "http://example.com",
            Duration::from_millis(1),
        ))
        .unwrap();
        assert_eq!(proxy, "");
    }
}
