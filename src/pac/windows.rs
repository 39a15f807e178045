//! WinHTTP resolution engine

use std::ffi::c_void;
use std::sync::Arc;

use tracing::trace;
use windows_sys::Win32::Foundation::{GetLastError, ERROR_IO_PENDING};
use windows_sys::Win32::Networking::WinHttp::{
    WinHttpCloseHandle, WinHttpCreateProxyResolver, WinHttpFreeProxyResult, WinHttpGetProxyForUrlEx,
    WinHttpGetProxyResult, WinHttpOpen, WinHttpSetStatusCallback, WINHTTP_AUTOPROXY_OPTIONS,
    WINHTTP_PROXY_RESULT,
};

use super::{CompletionLatch, RawHandle, ResolutionEngine};
use crate::error::{ProxyConfError, Result};
use crate::models::{AutoProxyOptions, ProxyResultEntry};
use crate::probe::{to_wide, wide_to_string};

const WINHTTP_FLAG_ASYNC: u32 = 0x1000_0000;
const WINHTTP_CALLBACK_FLAG_REQUEST_ERROR: u32 = 0x0020_0000;
const WINHTTP_CALLBACK_FLAG_GETPROXYFORURL_COMPLETE: u32 = 0x0100_0000;
const WINHTTP_ACCESS_TYPE_DEFAULT_PROXY: u32 = 0;

fn last_error(call: &'static str) -> ProxyConfError {
    ProxyConfError::OsCall {
        call,
        code: unsafe { GetLastError() },
    }
}

/// Completion callback; runs on a WinHTTP worker thread and only signals the latch.
///
/// `context` carries one strong reference created in `get_proxy_for_url`.
unsafe extern "system" fn status_callback(
    _handle: *mut c_void,
    context: usize,
    _status: u32,
    _info: *mut c_void,
    _info_len: u32,
) {
    if context == 0 {
        return;
    }
    let latch = Arc::from_raw(context as *const CompletionLatch);
    latch.signal();
}

/// Resolution engine backed by `winhttp.dll`
#[derive(Debug, Default, Clone, Copy)]
pub struct WinHttpEngine;

impl WinHttpEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ResolutionEngine for WinHttpEngine {
    fn open_session(&self) -> Result<RawHandle> {
        // SAFETY: null agent/proxy strings are permitted.
        let session = unsafe {
            WinHttpOpen(
                std::ptr::null(),
                WINHTTP_ACCESS_TYPE_DEFAULT_PROXY,
                std::ptr::null(),
                std::ptr::null(),
                WINHTTP_FLAG_ASYNC,
            )
        };
        if session.is_null() {
            return Err(last_error("WinHttpOpen"));
        }
        Ok(RawHandle(session as usize))
    }

    fn set_status_callback(&self, session: RawHandle) -> Result<()> {
        // SAFETY: `session` is a live WinHTTP session handle.
        let previous = unsafe {
            WinHttpSetStatusCallback(
                session.0 as *mut c_void,
                Some(status_callback),
                WINHTTP_CALLBACK_FLAG_REQUEST_ERROR | WINHTTP_CALLBACK_FLAG_GETPROXYFORURL_COMPLETE,
                0,
            )
        };
        // WINHTTP_INVALID_STATUS_CALLBACK is all bits set
        if previous.map(|f| f as usize) == Some(usize::MAX) {
            return Err(last_error("WinHttpSetStatusCallback"));
        }
        Ok(())
    }

    fn create_resolver(&self, session: RawHandle) -> Result<RawHandle> {
        let mut resolver: *mut c_void = std::ptr::null_mut();
        // SAFETY: `resolver` is a valid out-pointer.
        let code = unsafe { WinHttpCreateProxyResolver(session.0 as *mut c_void, &mut resolver) };
        if code != 0 {
            return Err(ProxyConfError::OsCall {
                call: "WinHttpCreateProxyResolver",
                code,
            });
        }
        Ok(RawHandle(resolver as usize))
    }

    fn get_proxy_for_url(
        &self,
        resolver: RawHandle,
        url: &str,
        options: &AutoProxyOptions,
        latch: &Arc<CompletionLatch>,
    ) -> Result<()> {
        let url_wide = to_wide(url);
        let pac_wide = options.auto_config_url.as_deref().map(to_wide);

        let mut raw_options: WINHTTP_AUTOPROXY_OPTIONS = unsafe { std::mem::zeroed() };
        raw_options.dwFlags = options.flags;
        raw_options.dwAutoDetectFlags = options.auto_detect_flags;
        raw_options.lpszAutoConfigUrl = pac_wide.as_ref().map_or(std::ptr::null(), |w| w.as_ptr());
        raw_options.fAutoLogonIfChallenged = i32::from(options.auto_logon_if_challenged);

        // Ownership of this reference moves to the callback once the call is pending.
        let context = Arc::into_raw(Arc::clone(latch)) as usize;

        // SAFETY: the wide buffers outlive the call; WinHTTP copies what it keeps.
        let code = unsafe {
            WinHttpGetProxyForUrlEx(resolver.0 as *mut c_void, url_wide.as_ptr(), &raw_options, context)
        };
        if code != ERROR_IO_PENDING {
            // No callback will run; take the reference back.
            drop(unsafe { Arc::from_raw(context as *const CompletionLatch) });
            return Err(ProxyConfError::OsCall {
                call: "WinHttpGetProxyForUrlEx",
                code,
            });
        }
        trace!("WinHttpGetProxyForUrlEx pending");
        Ok(())
    }

    fn get_proxy_result(&self, resolver: RawHandle) -> Result<Vec<ProxyResultEntry>> {
        let mut result: WINHTTP_PROXY_RESULT = unsafe { std::mem::zeroed() };
        // SAFETY: `result` is a valid out-pointer.
        let code = unsafe { WinHttpGetProxyResult(resolver.0 as *mut c_void, &mut result) };
        if code != 0 {
            return Err(ProxyConfError::OsCall {
                call: "WinHttpGetProxyResult",
                code,
            });
        }

        let entries = if result.pEntries.is_null() {
            Vec::new()
        } else {
            // SAFETY: WinHTTP reports `cEntries` contiguous entries.
            let raw = unsafe { std::slice::from_raw_parts(result.pEntries, result.cEntries as usize) };
            raw.iter()
                .map(|entry| ProxyResultEntry {
                    is_proxy: entry.fProxy != 0,
                    is_bypass: entry.fBypass != 0,
                    scheme: entry.ProxyScheme as u32,
                    proxy: if entry.pwszProxy.is_null() {
                        String::new()
                    } else {
                        unsafe { wide_to_string(entry.pwszProxy) }
                    },
                    port: entry.ProxyPort,
                })
                .collect()
        };

        // SAFETY: `result` was filled by WinHttpGetProxyResult and is freed once.
        unsafe { WinHttpFreeProxyResult(&mut result) };
        Ok(entries)
    }

    fn close_handle(&self, handle: RawHandle) {
        if handle.0 != 0 {
            // SAFETY: each handle is closed exactly once by its guard.
            unsafe {
                WinHttpCloseHandle(handle.0 as *mut c_void);
            }
        }
    }
}
