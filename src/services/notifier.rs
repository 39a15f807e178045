//! Change notification sources for the settings store
//!
//! A [`StoreNotifier`] opens one watch session per watcher start. The session is
//! split in two: the [`ChangeSource`] moves onto the loop thread, the
//! [`CancelSignal`] stays with whoever needs to interrupt the wait.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{ProxyConfError, Result};

/// Result of one blocking wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The store changed since the last arm
    Changed,
    /// The cancel signal fired
    Cancelled,
    /// A waited-on object was abandoned
    Abandoned,
    /// The wait returned a code outside the expected set
    Unexpected(u32),
    /// The wait call itself failed
    Failed(String),
}

/// Receives change notifications; owned by the loop thread
pub trait ChangeSource: Send {
    /// Re-arm the one-shot change notification
    fn arm(&mut self) -> Result<()>;

    /// Block until a change, the cancel signal, or an error
    fn wait(&mut self) -> WaitOutcome;
}

/// Wakes a blocked [`ChangeSource::wait`] with [`WaitOutcome::Cancelled`]
pub trait CancelSignal: Send + Sync {
    fn signal(&self) -> Result<()>;
}

/// Opens watch sessions on a settings store
pub trait StoreNotifier: Send + Sync {
    fn open(&self) -> Result<(Box<dyn ChangeSource>, Arc<dyn CancelSignal>)>;
}

#[derive(Debug, Default)]
struct SessionState {
    pending: usize,
    cancelled: bool,
    fail_wait: Option<String>,
}

#[derive(Debug, Default)]
struct Session {
    state: Mutex<SessionState>,
    cond: Condvar,
}

impl Session {
    fn notify(&self, update: impl FnOnce(&mut SessionState)) {
        let mut state = self.state.lock();
        update(&mut state);
        self.cond.notify_all();
    }
}

struct ManualSource {
    session: Arc<Session>,
    arms: Arc<AtomicUsize>,
}

impl ChangeSource for ManualSource {
    fn arm(&mut self) -> Result<()> {
        self.arms.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn wait(&mut self) -> WaitOutcome {
        let mut state = self.session.state.lock();
        loop {
            // Cancellation wins over queued changes, like a leveled event.
            if state.cancelled {
                return WaitOutcome::Cancelled;
            }
            if let Some(reason) = state.fail_wait.take() {
                return WaitOutcome::Failed(reason);
            }
            if state.pending > 0 {
                state.pending -= 1;
                return WaitOutcome::Changed;
            }
            self.session.cond.wait(&mut state);
        }
    }
}

struct ManualCancel {
    session: Arc<Session>,
}

impl CancelSignal for ManualCancel {
    fn signal(&self) -> Result<()> {
        self.session.notify(|state| state.cancelled = true);
        Ok(())
    }
}

/// In-process notifier driven by [`ManualNotifier::trigger`]
///
/// Every trigger produces exactly one `Changed` wake. Used on platforms without
/// a native settings store and in tests.
#[derive(Default)]
pub struct ManualNotifier {
    current: Mutex<Option<Arc<Session>>>,
    arms: Arc<AtomicUsize>,
    opens: AtomicUsize,
    fail_open: Mutex<Option<String>>,
}

impl ManualNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `open` fail with `reason`
    pub fn fail_open(&self, reason: impl Into<String>) {
        *self.fail_open.lock() = Some(reason.into());
    }

    /// Simulate a store change for the current session; ignored when none is open
    pub fn trigger(&self) {
        if let Some(session) = self.current.lock().as_ref() {
            session.notify(|state| state.pending += 1);
        }
    }

    /// Make the next wait of the current session fail
    pub fn fail_next_wait(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if let Some(session) = self.current.lock().as_ref() {
            session.notify(|state| state.fail_wait = Some(reason));
        }
    }

    pub fn arm_count(&self) -> usize {
        self.arms.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl StoreNotifier for ManualNotifier {
    fn open(&self) -> Result<(Box<dyn ChangeSource>, Arc<dyn CancelSignal>)> {
        if let Some(reason) = self.fail_open.lock().clone() {
            return Err(ProxyConfError::WatcherSetup(reason));
        }

        let session = Arc::new(Session::default());
        *self.current.lock() = Some(session.clone());
        self.opens.fetch_add(1, Ordering::SeqCst);

        let source = ManualSource {
            session: session.clone(),
            arms: self.arms.clone(),
        };
        Ok((Box::new(source), Arc::new(ManualCancel { session })))
    }
}
