//! Exposure records and request/response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{ExposeError, ExposeResult};

/// Application protocol spoken on an exposed port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// HTTP, including WebSocket upgrades.
    #[default]
    Http,
    /// Raw TCP. Recorded for callers; forwarding is HTTP-based either way.
    Tcp,
}

impl Protocol {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ExposeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "http" => Ok(Protocol::Http),
            "tcp" => Ok(Protocol::Tcp),
            _ => Err(ExposeError::InvalidProtocol(s.to_string())),
        }
    }
}

/// Exposure status.
///
/// Records are removed outright on unexpose, so a stored record is always
/// `Active`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureStatus {
    #[default]
    Active,
    Inactive,
}

/// One user-visible exposure, unique per (session, port).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposedPort {
    /// Port inside the sandbox.
    pub port: u16,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Primary URL: the first URL form that could be built.
    #[serde(rename = "url")]
    pub primary_url: String,
    /// Every URL built for this exposure, primary first.
    pub urls: Vec<String>,
    /// Dedicated listening port, if one was allocated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_port: Option<u16>,
    pub status: ExposureStatus,
    pub created_at: DateTime<Utc>,
}

/// Body of an expose request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExposeRequest {
    /// Requested port. Kept wide so out-of-range values are reported, not
    /// rejected by the decoder.
    pub port: i64,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ExposeRequest {
    /// Validated port number.
    pub fn port(&self) -> ExposeResult<u16> {
        validate_port(self.port)
    }

    /// Requested protocol, `http` when omitted or empty.
    pub fn protocol(&self) -> ExposeResult<Protocol> {
        match self.protocol.as_deref() {
            Some(p) => p.parse(),
            None => Ok(Protocol::Http),
        }
    }

    /// Label, with an empty string treated as absent.
    pub fn name(&self) -> Option<String> {
        self.name.clone().filter(|n| !n.is_empty())
    }
}

/// Result of an expose call, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExposeOutcome {
    pub session_id: String,
    pub port: u16,
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocated_port: Option<u16>,
    pub status: ExposureStatus,
}

impl ExposeOutcome {
    /// Outcome describing an existing record.
    pub fn from_record(session_id: &str, record: &ExposedPort) -> Self {
        Self {
            session_id: session_id.to_string(),
            port: record.port,
            protocol: record.protocol,
            name: record.name.clone(),
            urls: record.urls.clone(),
            allocated_port: record.allocated_port,
            status: record.status,
        }
    }

    /// Primary URL (first of `urls`).
    pub fn primary_url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }
}

/// Check that a port number lies in 1-65535.
pub fn validate_port(port: i64) -> ExposeResult<u16> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(ExposeError::InvalidPort(port)),
    }
}
