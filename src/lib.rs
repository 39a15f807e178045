//! Proxyconf - System Proxy Configuration Discovery
//!
//! Reads the operating system's proxy settings and keeps them current.
//!
//! ## Features
//!
//! - Cached configuration snapshot built from a fallback chain of OS sources
//! - PAC script and auto-detect (WPAD) resolution for individual URLs
//! - Background watcher that reloads the snapshot when settings change
//! - Optional publication of static settings as `http_proxy`/`https_proxy`/`no_proxy`
//!
//! Native sources are only available on Windows; elsewhere the configuration
//! resolves to a direct connection and PAC resolution reports `Unsupported`.

pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod logging;
pub mod models;
pub mod pac;
pub mod probe;
pub mod resolver;
pub mod services;

pub use config::Config;
pub use context::ProxyContext;
pub use error::{ProxyConfError, Result};
pub use models::{PacResult, ProxyConf, ProxyScriptConf, StaticProxyConf};
pub use pac::PacResolver;
pub use resolver::ConfigResolver;
pub use services::{ChangeWatcher, WatchHandle, WatcherStatus};
