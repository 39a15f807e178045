//! Change watcher service
//!
//! Reloads the resolver's snapshot whenever the settings store reports a change.
//! The wait is a blocking OS call, so the loop runs on a dedicated thread rather
//! than a tokio task. Cancellation goes through the notifier's [`CancelSignal`];
//! the lifetime of each watch session is published as a watch-channel token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::notifier::{CancelSignal, ChangeSource, StoreNotifier, WaitOutcome};
use crate::error::{ProxyConfError, Result};
use crate::resolver::ConfigResolver;

/// Watcher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStatus {
    Idle,
    Watching,
    Stopped,
}

impl WatcherStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatcherStatus::Idle => "idle",
            WatcherStatus::Watching => "watching",
            WatcherStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WatcherStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifetime token of one watch session; cancelled when the loop exits or on stop
#[derive(Debug, Clone)]
pub struct WatchHandle {
    rx: watch::Receiver<bool>,
}

impl WatchHandle {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the session has ended
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // A dropped sender also means the session is over.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

struct WatcherShared {
    running: AtomicBool,
    started: AtomicBool,
    last_error: Mutex<Option<ProxyConfError>>,
}

#[derive(Default)]
struct Session {
    cancel: Option<Arc<dyn CancelSignal>>,
    token: Option<Arc<watch::Sender<bool>>>,
    thread: Option<JoinHandle<()>>,
}

/// Background service that keeps a [`ConfigResolver`] in sync with the store
pub struct ChangeWatcher {
    resolver: Arc<ConfigResolver>,
    notifier: Arc<dyn StoreNotifier>,
    shared: Arc<WatcherShared>,
    session: Mutex<Session>,
}

impl ChangeWatcher {
    pub fn new(resolver: Arc<ConfigResolver>, notifier: Arc<dyn StoreNotifier>) -> Self {
        Self {
            resolver,
            notifier,
            shared: Arc::new(WatcherShared {
                running: AtomicBool::new(false),
                started: AtomicBool::new(false),
                last_error: Mutex::new(None),
            }),
            session: Mutex::new(Session::default()),
        }
    }

    /// Open the notifier and spawn the watch loop
    ///
    /// Setup failures are returned here and leave the watcher not watching.
    pub fn start(&self) -> Result<WatchHandle> {
        let mut session = self.session.lock();
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(ProxyConfError::AlreadyWatching);
        }

        // A previous loop that exited on its own is reaped here.
        let previous = std::mem::take(&mut *session);
        if let Some(thread) = previous.thread {
            if thread.join().is_err() {
                warn!("Previous watcher thread panicked");
            }
        }

        *self.shared.last_error.lock() = None;

        let (source, cancel) = self.notifier.open().inspect_err(|e| {
            warn!("Failed to start change watcher: {}", e);
        })?;

        let (tx, rx) = watch::channel(false);
        let token = Arc::new(tx);

        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.started.store(true, Ordering::SeqCst);

        let resolver = self.resolver.clone();
        let shared = self.shared.clone();
        let loop_token = token.clone();
        let spawned = thread::Builder::new()
            .name("proxyconf-watcher".to_string())
            .spawn(move || run_loop(source, resolver, shared, loop_token));

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                token.send_replace(true);
                return Err(ProxyConfError::WatcherSetup(format!(
                    "failed to spawn watcher thread: {e}"
                )));
            }
        };

        *session = Session {
            cancel: Some(cancel),
            token: Some(token),
            thread: Some(thread),
        };
        info!("Change watcher started");

        Ok(WatchHandle { rx })
    }

    /// Cancel the loop and wait for it to exit. Safe to call repeatedly.
    ///
    /// If the cancel signal cannot be delivered the lifetime token is still
    /// cancelled, the loop is not joined, and the error is returned. The session
    /// is kept so a later call can retry.
    pub fn stop(&self) -> Result<()> {
        let mut session = self.session.lock();

        if let Some(token) = session.token.take() {
            token.send_replace(true);
        }

        // A loop that already exited has nothing left to wake.
        let running = self.shared.running.load(Ordering::SeqCst);
        if let Some(cancel) = session.cancel.as_ref().filter(|_| running) {
            if let Err(e) = cancel.signal() {
                warn!("Failed to cancel change watcher: {}", e);
                return Err(e);
            }
        }

        session.cancel = None;
        let thread = session.thread.take();
        drop(session);

        if let Some(thread) = thread {
            if thread.thread().id() != thread::current().id() {
                thread.join().map_err(|_| {
                    ProxyConfError::WatcherRuntime("watcher thread panicked".to_string())
                })?;
            }
            info!("Change watcher stopped");
        }

        Ok(())
    }

    /// Last runtime failure of the loop, cleared on start
    pub fn error(&self) -> Option<ProxyConfError> {
        self.shared.last_error.lock().clone()
    }

    pub fn status(&self) -> WatcherStatus {
        if self.shared.running.load(Ordering::SeqCst) {
            WatcherStatus::Watching
        } else if self.shared.started.load(Ordering::SeqCst) {
            WatcherStatus::Stopped
        } else {
            WatcherStatus::Idle
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Change watcher did not stop cleanly: {}", e);
        }
    }
}

fn run_loop(
    mut source: Box<dyn ChangeSource>,
    resolver: Arc<ConfigResolver>,
    shared: Arc<WatcherShared>,
    token: Arc<watch::Sender<bool>>,
) {
    let outcome = loop {
        if let Err(e) = source.arm() {
            break Err(ProxyConfError::WatcherRuntime(format!(
                "failed to arm change notification: {e}"
            )));
        }

        match source.wait() {
            WaitOutcome::Changed => {
                debug!("Proxy settings changed, reloading");
                resolver.reload_config();
            }
            WaitOutcome::Cancelled => break Ok(()),
            WaitOutcome::Abandoned => {
                break Err(ProxyConfError::WatcherRuntime("wait abandoned".to_string()))
            }
            WaitOutcome::Unexpected(code) => {
                break Err(ProxyConfError::WatcherRuntime(format!(
                    "unexpected wait result {code}"
                )))
            }
            WaitOutcome::Failed(reason) => break Err(ProxyConfError::WatcherRuntime(reason)),
        }
    };

    drop(source);

    if let Err(e) = outcome {
        error!("Change watcher exited: {}", e);
        *shared.last_error.lock() = Some(e);
    } else {
        debug!("Change watcher loop cancelled");
    }

    shared.running.store(false, Ordering::SeqCst);
    token.send_replace(true);
}
