//! Configuration schema definitions.
//!
//! This module defines the structure of the sandbox-portal configuration
//! files. Unset values fall back to built-in defaults through the accessor
//! methods, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use super::error::ConfigError;
use crate::expose::{PortRange, RegistrySettings, UrlBuilder};
use crate::expose::{DEFAULT_RANGE_END, DEFAULT_RANGE_START};
use crate::session::SessionRecord;

/// Default address of the API and path-based proxy listener.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

/// Default public base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Default grace period for dedicated listeners, in seconds.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Default sandbox dial timeout, in seconds.
pub const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 60;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// API listener and URL settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Dedicated-port pool settings.
    #[serde(default)]
    pub ports: PortsConfig,

    /// Reverse tunnel settings.
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Static session to sandbox bindings.
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Scalars are overridden when set, maps are merged (later keys win) and
    /// lists are appended.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.server.merge(other.server);
        self.ports.merge(other.ports);
        self.tunnel.merge(other.tunnel);
        self.sessions.extend(other.sessions);
    }

    /// Check every value that has to parse or satisfy a constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.listen_addr()?;
        self.ports.range()?;
        self.ports.bind_host()?;
        self.tunnel.dial_timeout()?;
        self.tunnel.devices()?;

        for entry in &self.sessions {
            if entry.id.is_empty() {
                return Err(ConfigError::invalid("sessions.id", "must not be empty"));
            }
        }
        Ok(())
    }

    /// Exposure registry settings.
    pub fn registry_settings(&self) -> Result<RegistrySettings, ConfigError> {
        Ok(RegistrySettings {
            urls: UrlBuilder::new(
                self.server.base_url(),
                self.server.dev_subdomain().map(str::to_string),
            ),
            dedicated_ports: self.ports.enabled(),
            port_range: self.ports.range()?,
            bind_host: self.ports.bind_host()?,
            shutdown_grace: self.ports.shutdown_grace(),
        })
    }

    /// Session records to seed the session store with.
    pub fn session_records(&self) -> Vec<SessionRecord> {
        self.sessions
            .iter()
            .map(|entry| SessionRecord {
                id: entry.id.clone(),
                sandbox_id: entry.sandbox_id.clone(),
                owner: entry.owner.clone(),
            })
            .collect()
    }
}

/// General application settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GeneralConfig {
    /// Log level used when neither `-v` nor `RUST_LOG` is given.
    #[serde(default)]
    pub log_level: String,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if !other.log_level.is_empty() {
            self.log_level = other.log_level;
        }
    }
}

/// API listener and URL settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ServerConfig {
    /// Listen address for the API and the path-based proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    /// Public base URL, e.g. `https://portal.example.com`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Dev subdomain label. Enables subdomain URLs when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_subdomain: Option<String>,
}

impl ServerConfig {
    fn merge(&mut self, other: ServerConfig) {
        if other.listen.is_some() {
            self.listen = other.listen;
        }
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.dev_subdomain.is_some() {
            self.dev_subdomain = other.dev_subdomain;
        }
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = self.listen.as_deref().unwrap_or(DEFAULT_LISTEN);
        raw.parse()
            .map_err(|e| ConfigError::invalid("server.listen", format!("{}: {}", raw, e)))
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn dev_subdomain(&self) -> Option<&str> {
        self.dev_subdomain.as_deref().filter(|s| !s.is_empty())
    }
}

/// Dedicated-port pool settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PortsConfig {
    /// Whether dedicated-port URLs are offered at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// First port of the pool (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start: Option<u16>,

    /// End of the pool (exclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end: Option<u16>,

    /// Address dedicated listeners bind to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_host: Option<String>,

    /// Grace period for in-flight connections when a listener stops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_grace_secs: Option<u64>,
}

impl PortsConfig {
    fn merge(&mut self, other: PortsConfig) {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        if other.range_start.is_some() {
            self.range_start = other.range_start;
        }
        if other.range_end.is_some() {
            self.range_end = other.range_end;
        }
        if other.bind_host.is_some() {
            self.bind_host = other.bind_host;
        }
        if other.shutdown_grace_secs.is_some() {
            self.shutdown_grace_secs = other.shutdown_grace_secs;
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// The pool as a validated range.
    pub fn range(&self) -> Result<PortRange, ConfigError> {
        let start = self.range_start.unwrap_or(DEFAULT_RANGE_START);
        let end = self.range_end.unwrap_or(DEFAULT_RANGE_END);
        PortRange::new(start, end).map_err(|_| {
            ConfigError::invalid(
                "ports.range_start",
                format!("range_start ({}) must be below range_end ({})", start, end),
            )
        })
    }

    /// Parsed bind host.
    pub fn bind_host(&self) -> Result<IpAddr, ConfigError> {
        match self.bind_host.as_deref() {
            None => Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            Some(raw) => raw
                .parse()
                .map_err(|e| ConfigError::invalid("ports.bind_host", format!("{}: {}", raw, e))),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs.unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS))
    }
}

/// Reverse tunnel settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TunnelConfig {
    /// Bound on a single sandbox dial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dial_timeout_secs: Option<u64>,

    /// Relay endpoints by device ID (`hydra-{sandbox}` -> `host:port`).
    #[serde(default)]
    pub devices: HashMap<String, String>,
}

impl TunnelConfig {
    fn merge(&mut self, other: TunnelConfig) {
        if other.dial_timeout_secs.is_some() {
            self.dial_timeout_secs = other.dial_timeout_secs;
        }
        self.devices.extend(other.devices);
    }

    /// Dial timeout. Zero is rejected.
    pub fn dial_timeout(&self) -> Result<Duration, ConfigError> {
        match self.dial_timeout_secs.unwrap_or(DEFAULT_DIAL_TIMEOUT_SECS) {
            0 => Err(ConfigError::invalid(
                "tunnel.dial_timeout_secs",
                "must be greater than zero",
            )),
            secs => Ok(Duration::from_secs(secs)),
        }
    }

    /// Parsed device relay endpoints, sorted by device ID.
    pub fn devices(&self) -> Result<Vec<(String, SocketAddr)>, ConfigError> {
        let mut devices = self
            .devices
            .iter()
            .map(|(id, raw)| {
                raw.parse::<SocketAddr>()
                    .map(|addr| (id.clone(), addr))
                    .map_err(|e| {
                        ConfigError::invalid(
                            &format!("tunnel.devices.{}", id),
                            format!("{}: {}", raw, e),
                        )
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        devices.sort();
        Ok(devices)
    }
}

/// One `[[sessions]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SessionEntry {
    /// Session ID.
    pub id: String,

    /// Bound sandbox, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,

    /// Owning user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}
