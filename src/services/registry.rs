//! Registry change notifications for the `Internet Settings` key

use std::sync::Arc;

use tracing::debug;
use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE};
use windows_sys::Win32::System::Registry::{
    RegCloseKey, RegNotifyChangeKeyValue, RegOpenKeyExW, HKEY, HKEY_CURRENT_USER, KEY_NOTIFY,
    REG_NOTIFY_CHANGE_LAST_SET,
};
use windows_sys::Win32::System::Threading::{CreateEventW, SetEvent, WaitForMultipleObjects};

use super::notifier::{CancelSignal, ChangeSource, StoreNotifier, WaitOutcome};
use crate::error::{ProxyConfError, Result};
use crate::probe::to_wide;

const INTERNET_SETTINGS_KEY: &str = r"SOFTWARE\Microsoft\Windows\CurrentVersion\Internet Settings";

const INFINITE: u32 = u32::MAX;
const WAIT_OBJECT_0: u32 = 0;
const WAIT_ABANDONED_0: u32 = 0x80;
const WAIT_FAILED: u32 = u32::MAX;

/// Owned event handle
struct Event(HANDLE);

// SAFETY: event handles are process-wide and usable from any thread.
unsafe impl Send for Event {}
unsafe impl Sync for Event {}

impl Event {
    fn create(manual_reset: bool) -> Result<Self> {
        // SAFETY: default security, unnamed event.
        let handle = unsafe { CreateEventW(std::ptr::null(), i32::from(manual_reset), 0, std::ptr::null()) };
        if handle.is_null() {
            let code = unsafe { GetLastError() };
            return Err(ProxyConfError::WatcherSetup(format!("CreateEventW failed with code {code}")));
        }
        Ok(Self(handle))
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        // SAFETY: the handle is owned and closed once.
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// Owned registry key handle
struct Key(HKEY);

// SAFETY: registry handles may be used from any thread.
unsafe impl Send for Key {}

impl Drop for Key {
    fn drop(&mut self) {
        // SAFETY: the key is owned and closed once.
        unsafe {
            RegCloseKey(self.0);
        }
    }
}

struct RegistryCancel {
    event: Event,
}

impl CancelSignal for RegistryCancel {
    fn signal(&self) -> Result<()> {
        // SAFETY: the event stays open while any clone of this Arc lives.
        if unsafe { SetEvent(self.event.0) } == 0 {
            return Err(ProxyConfError::OsCall {
                call: "SetEvent",
                code: unsafe { GetLastError() },
            });
        }
        Ok(())
    }
}

struct RegistrySource {
    key: Key,
    change: Event,
    cancel: Arc<RegistryCancel>,
}

impl ChangeSource for RegistrySource {
    fn arm(&mut self) -> Result<()> {
        // SAFETY: key and event are open for the lifetime of `self`.
        let code = unsafe { RegNotifyChangeKeyValue(self.key.0, 1, REG_NOTIFY_CHANGE_LAST_SET, self.change.0, 1) };
        if code != 0 {
            return Err(ProxyConfError::OsCall {
                call: "RegNotifyChangeKeyValue",
                code,
            });
        }
        Ok(())
    }

    fn wait(&mut self) -> WaitOutcome {
        let handles: [HANDLE; 2] = [self.change.0, self.cancel.event.0];
        // SAFETY: both handles are open for the duration of the wait.
        let status = unsafe { WaitForMultipleObjects(2, handles.as_ptr(), 0, INFINITE) };
        match status {
            s if s == WAIT_OBJECT_0 => WaitOutcome::Changed,
            s if s == WAIT_OBJECT_0 + 1 => WaitOutcome::Cancelled,
            s if s == WAIT_ABANDONED_0 || s == WAIT_ABANDONED_0 + 1 => WaitOutcome::Abandoned,
            WAIT_FAILED => {
                let code = unsafe { GetLastError() };
                WaitOutcome::Failed(format!("WaitForMultipleObjects failed with code {code}"))
            }
            other => WaitOutcome::Unexpected(other),
        }
    }
}

/// Watches `HKCU\...\Internet Settings` and its subkeys for value changes
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryNotifier;

impl RegistryNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl StoreNotifier for RegistryNotifier {
    fn open(&self) -> Result<(Box<dyn ChangeSource>, Arc<dyn CancelSignal>)> {
        let path = to_wide(INTERNET_SETTINGS_KEY);
        let mut key: HKEY = std::ptr::null_mut();
        // SAFETY: `path` is NUL-terminated and `key` is a valid out-pointer.
        let code = unsafe { RegOpenKeyExW(HKEY_CURRENT_USER, path.as_ptr(), 0, KEY_NOTIFY, &mut key) };
        if code != 0 {
            return Err(ProxyConfError::WatcherSetup(format!("RegOpenKeyExW failed with code {code}")));
        }
        let key = Key(key);

        let change = Event::create(false)?;
        let cancel = Arc::new(RegistryCancel {
            event: Event::create(true)?,
        });
        debug!("Opened registry notifier on {}", INTERNET_SETTINGS_KEY);

        let source = RegistrySource {
            key,
            change,
            cancel: cancel.clone(),
        };
        Ok((Box::new(source), cancel))
    }
}
