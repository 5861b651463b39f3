//! Environment-driven configuration.
//!
//! Values are read once at startup through a [`Settings`] lookup so tests
//! can inject them without touching the process environment.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tracing::debug;

pub const ENV_APP_PORT: &str = "DAPR_APP_PORT";
pub const ENV_SIDECAR_HTTP_PORT: &str = "DAPR_HTTP_PORT";
pub const ENV_SIDECAR_HTTP_HOST: &str = "DAPR_HTTP_HOST";
pub const ENV_DISABLE_METADATA_CHECK: &str = "DAPR_DISABLE_SIDECAR_METADATA_CHECK";

pub const DEFAULT_APP_PORT: u16 = 3001;
pub const DEFAULT_SIDECAR_HTTP_PORT: u16 = 3500;
pub const DEFAULT_SIDECAR_HOST: &str = "localhost";

/// Named setting lookup (environment variables, or a fixed map in tests).
#[derive(Clone)]
pub struct Settings {
    lookup: Arc<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl Settings {
    /// Settings backed by the process environment.
    pub fn from_env() -> Self {
        Self {
            lookup: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Settings backed by a fixed map.
    pub fn from_map(map: HashMap<String, String>) -> Self {
        Self {
            lookup: Arc::new(move |name| map.get(name).cloned()),
        }
    }

    /// Look up a setting; empty values count as unset.
    pub fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    /// Resolve a whole-string `%NAME%` reference.
    ///
    /// Returns the setting's value when `value` is exactly `%NAME%` and the
    /// setting exists; otherwise returns `value` unchanged.
    pub fn resolve(&self, value: &str) -> String {
        value
            .strip_prefix('%')
            .and_then(|rest| rest.strip_suffix('%'))
            .filter(|name| !name.is_empty() && !name.contains('%'))
            .and_then(|name| self.get(name))
            .unwrap_or_else(|| value.to_string())
    }

    fn port(&self, name: &str, default: u16) -> u16 {
        match self.get(name) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                debug!(setting = name, value = %raw, default, "invalid port setting, using default");
                default
            }),
            None => {
                debug!(setting = name, default, "setting not found, using default");
                default
            }
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings").finish_non_exhaustive()
    }
}

/// Listener and sidecar addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaprConfig {
    /// Host the callback listener binds.
    pub app_host: IpAddr,
    /// Port the callback listener binds. Zero asks the OS for a free port.
    pub app_port: u16,
    /// Host of the sidecar's HTTP API.
    pub sidecar_host: String,
    /// Port of the sidecar's HTTP API.
    pub sidecar_http_port: u16,
    /// Query the sidecar's metadata API after start and warn on mismatches.
    pub sidecar_metadata_check: bool,
}

impl Default for DaprConfig {
    fn default() -> Self {
        Self {
            app_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            app_port: DEFAULT_APP_PORT,
            sidecar_host: DEFAULT_SIDECAR_HOST.to_string(),
            sidecar_http_port: DEFAULT_SIDECAR_HTTP_PORT,
            sidecar_metadata_check: true,
        }
    }
}

impl DaprConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_settings(&Settings::from_env())
    }

    /// Read the configuration from arbitrary settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let disable_check = settings
            .get(ENV_DISABLE_METADATA_CHECK)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            app_port: settings.port(ENV_APP_PORT, DEFAULT_APP_PORT),
            sidecar_host: settings
                .get(ENV_SIDECAR_HTTP_HOST)
                .unwrap_or_else(|| DEFAULT_SIDECAR_HOST.to_string()),
            sidecar_http_port: settings.port(ENV_SIDECAR_HTTP_PORT, DEFAULT_SIDECAR_HTTP_PORT),
            sidecar_metadata_check: !disable_check,
            ..Self::default()
        }
    }

    /// Builder method: set the listen port.
    pub fn with_app_port(self, app_port: u16) -> Self {
        Self { app_port, ..self }
    }

    /// Builder method: point the client at a different sidecar.
    pub fn with_sidecar(self, host: impl Into<String>, port: u16) -> Self {
        Self {
            sidecar_host: host.into(),
            sidecar_http_port: port,
            ..self
        }
    }

    /// Address the callback listener binds.
    pub fn app_addr(&self) -> SocketAddr {
        SocketAddr::new(self.app_host, self.app_port)
    }

    /// Base URL of the sidecar's HTTP API, without a trailing slash.
    pub fn sidecar_http_address(&self) -> String {
        format!("http://{}:{}", self.sidecar_host, self.sidecar_http_port)
    }
}
