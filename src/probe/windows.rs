//! WinHTTP and registry backed probe

use std::io;

use tracing::debug;
use windows_sys::Win32::Foundation::{GetLastError, GlobalFree};
use windows_sys::Win32::Networking::WinHttp::{
    WinHttpGetDefaultProxyConfiguration, WinHttpGetIEProxyConfigForCurrentUser,
    WINHTTP_CURRENT_USER_IE_PROXY_CONFIG, WINHTTP_PROXY_INFO,
};
use winreg::enums::{RegType, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_QUERY_VALUE};
use winreg::RegKey;

use super::RawSourceProbe;
use crate::error::{ProxyConfError, Result};
use crate::models::{ProbeSource, RawProbeResult, RegistryValues};

const POLICY_KEY: &str = r"Software\Policies\Microsoft\Windows\CurrentVersion\Internet Settings";
const SETTINGS_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Internet Settings";

/// Wide string allocated by WinHTTP, released with `GlobalFree` on drop
struct GlobalWide(*mut u16);

impl GlobalWide {
    fn to_option(&self) -> Option<String> {
        if self.0.is_null() {
            return None;
        }
        // SAFETY: WinHTTP hands out NUL-terminated UTF-16 buffers.
        let value = unsafe { wide_to_string(self.0) };
        Some(value)
    }
}

impl Drop for GlobalWide {
    fn drop(&mut self) {
        if !self.0.is_null() {
            // SAFETY: the pointer was allocated by WinHTTP with GlobalAlloc and is freed once.
            unsafe {
                GlobalFree(self.0.cast());
            }
        }
    }
}

/// Read a NUL-terminated UTF-16 string
///
/// # Safety
/// `ptr` must be non-null and point to a NUL-terminated buffer.
pub(crate) unsafe fn wide_to_string(ptr: *const u16) -> String {
    let mut len = 0usize;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len))
}

/// Encode `value` as a NUL-terminated UTF-16 buffer
pub(crate) fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Probe backed by WinHTTP and the `Internet Settings` registry key
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsProbe;

impl WindowsProbe {
    pub fn new() -> Self {
        Self
    }
}

impl RawSourceProbe for WindowsProbe {
    fn current_user(&self) -> Result<RawProbeResult> {
        let mut config: WINHTTP_CURRENT_USER_IE_PROXY_CONFIG = unsafe { std::mem::zeroed() };
        // SAFETY: `config` is a valid out-pointer for the duration of the call.
        let ok = unsafe { WinHttpGetIEProxyConfigForCurrentUser(&mut config) };
        if ok == 0 {
            let code = unsafe { GetLastError() };
            return Err(ProxyConfError::source_unavailable(
                ProbeSource::CurrentUser,
                format!("WinHttpGetIEProxyConfigForCurrentUser failed with code {}", code),
            ));
        }

        let proxy = GlobalWide(config.lpszProxy);
        let bypass = GlobalWide(config.lpszProxyBypass);
        let auto_config_url = GlobalWide(config.lpszAutoConfigUrl);

        Ok(RawProbeResult {
            source: ProbeSource::CurrentUser,
            proxy: proxy.to_option(),
            bypass: bypass.to_option(),
            auto_config_url: auto_config_url.to_option(),
            auto_detect: config.fAutoDetect != 0,
        })
    }

    fn system_default(&self) -> Result<RawProbeResult> {
        let mut info: WINHTTP_PROXY_INFO = unsafe { std::mem::zeroed() };
        // SAFETY: `info` is a valid out-pointer for the duration of the call.
        let ok = unsafe { WinHttpGetDefaultProxyConfiguration(&mut info) };
        if ok == 0 {
            let code = unsafe { GetLastError() };
            return Err(ProxyConfError::source_unavailable(
                ProbeSource::SystemDefault,
                format!("WinHttpGetDefaultProxyConfiguration failed with code {}", code),
            ));
        }

        let proxy = GlobalWide(info.lpszProxy);
        let bypass = GlobalWide(info.lpszProxyBypass);

        Ok(RawProbeResult {
            proxy: proxy.to_option(),
            bypass: bypass.to_option(),
            ..RawProbeResult::empty(ProbeSource::SystemDefault)
        })
    }

    fn registry(&self) -> Result<RegistryValues> {
        read_registry().map_err(|e| ProxyConfError::source_unavailable(ProbeSource::Registry, e.to_string()))
    }
}

fn read_registry() -> io::Result<RegistryValues> {
    // Per-user settings unless policy says otherwise
    let per_user = RegKey::predef(HKEY_LOCAL_MACHINE)
        .open_subkey_with_flags(POLICY_KEY, KEY_QUERY_VALUE)
        .and_then(|key| key.get_value::<u32, _>("ProxySettingsPerUser"))
        .unwrap_or(1);

    let root = if per_user == 0 {
        debug!("Reading machine-wide proxy settings (ProxySettingsPerUser=0)");
        RegKey::predef(HKEY_LOCAL_MACHINE)
    } else {
        RegKey::predef(HKEY_CURRENT_USER)
    };

    let key = root.open_subkey_with_flags(SETTINGS_KEY, KEY_QUERY_VALUE)?;

    Ok(RegistryValues {
        proxy_server: optional(key.get_value::<String, _>("ProxyServer"))?.unwrap_or_default(),
        proxy_override: optional(key.get_value::<String, _>("ProxyOverride"))?.unwrap_or_default(),
        proxy_enable: optional(read_integer(&key, "ProxyEnable"))?.unwrap_or(0),
        auto_config_url: optional(key.get_value::<String, _>("AutoConfigURL"))?.unwrap_or_default(),
    })
}

/// Read a value stored as either `REG_DWORD` or `REG_QWORD`
fn read_integer(key: &RegKey, name: &str) -> io::Result<u64> {
    let raw = key.get_raw_value(name)?;
    decode_integer(&raw.vtype, &raw.bytes)
}

fn decode_integer(vtype: &RegType, bytes: &[u8]) -> io::Result<u64> {
    match vtype {
        RegType::REG_DWORD => bytes
            .try_into()
            .map(|b: [u8; 4]| u64::from(u32::from_le_bytes(b)))
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed REG_DWORD")),
        RegType::REG_QWORD => bytes
            .try_into()
            .map(u64::from_le_bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed REG_QWORD")),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected an integer value, found {other:?}"),
        )),
    }
}

/// Treat a missing value as absent rather than as a failure
fn optional<T>(value: io::Result<T>) -> io::Result<Option<T>> {
    match value {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
