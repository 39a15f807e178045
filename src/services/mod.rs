//! Background services

pub mod change_watcher;
pub mod notifier;
#[cfg(windows)]
mod registry;

pub use change_watcher::{ChangeWatcher, WatchHandle, WatcherStatus};
pub use notifier::{CancelSignal, ChangeSource, ManualNotifier, StoreNotifier, WaitOutcome};
#[cfg(windows)]
pub use registry::RegistryNotifier;

use std::sync::Arc;

/// Notifier for the current platform's settings store
///
/// Platforms without one get a [`ManualNotifier`] that never fires on its own.
pub fn default_notifier() -> Arc<dyn StoreNotifier> {
    #[cfg(windows)]
    {
        Arc::new(RegistryNotifier::new())
    }
    #[cfg(not(windows))]
    {
        Arc::new(ManualNotifier::new())
    }
}
