//! Device directory: a [`ReverseDialer`] backed by relay endpoints.
//!
//! Each registered device maps to the local address where its reverse tunnel
//! terminates. Dialing a device opens a fresh TCP connection to that relay,
//! which splices it onto the agent's outbound connection. Devices come and go
//! at runtime as agents connect and disconnect.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::bridge::{ReverseDialer, TunnelStream};
use super::error::{TunnelError, TunnelResult};

/// Registry of reachable devices.
#[derive(Default)]
pub struct DeviceDirectory {
    devices: RwLock<HashMap<String, SocketAddr>>,
}

impl DeviceDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory from `(device_id, relay_addr)` pairs.
    pub fn with_devices(devices: impl IntoIterator<Item = (String, SocketAddr)>) -> Self {
        Self {
            devices: RwLock::new(devices.into_iter().collect()),
        }
    }

    /// Register (or replace) the relay endpoint for a device.
    pub fn register(&self, device_id: impl Into<String>, relay: SocketAddr) {
        let device_id = device_id.into();
        info!("Registered device {} at {}", device_id, relay);
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id, relay);
    }

    /// Remove a device. Returns its last relay endpoint.
    pub fn unregister(&self, device_id: &str) -> Option<SocketAddr> {
        let removed = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device_id);
        if removed.is_some() {
            info!("Unregistered device {}", device_id);
        }
        removed
    }

    /// Relay endpoint for a device, if connected.
    pub fn lookup(&self, device_id: &str) -> Option<SocketAddr> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .copied()
    }

    /// Number of registered devices.
    pub fn device_count(&self) -> usize {
        self.devices.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl ReverseDialer for DeviceDirectory {
    async fn dial(&self, device_id: &str) -> TunnelResult<TunnelStream> {
        let relay = self
            .lookup(device_id)
            .ok_or_else(|| TunnelError::DeviceNotConnected(device_id.to_string()))?;

        let stream = TcpStream::connect(relay)
            .await
            .map_err(|e| TunnelError::Connect {
                device_id: device_id.to_string(),
                source: e,
            })?;
        stream.set_nodelay(true).map_err(|e| TunnelError::Connect {
            device_id: device_id.to_string(),
            source: e,
        })?;

        debug!("Dialed {} via {}", device_id, relay);
        Ok(Box::new(stream))
    }
}
