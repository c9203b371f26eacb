//! Dial bridge: on-demand logical connections into a sandbox.
//!
//! A sandbox has no reachable inbound address. Its agent keeps an outbound
//! connection registered with a reverse-connection registry under a device
//! ID, and the control plane "dials" that device to get a fresh byte stream
//! that terminates at the agent.
//!
//! Every stream returned here is single-use: one request, one connection,
//! closed when dropped.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::error::{TunnelError, TunnelResult};

/// Prefix the sandbox-side agent registers its device under.
pub const DEVICE_ID_PREFIX: &str = "hydra-";

/// Default bound on a single dial.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Byte stream carried over a reverse tunnel.
pub trait TunnelIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> TunnelIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Owned, type-erased tunnel stream.
pub type TunnelStream = Box<dyn TunnelIo>;

/// The reverse-connection registry.
///
/// Implementations do their own internal synchronization.
#[async_trait]
pub trait ReverseDialer: Send + Sync {
    /// Open a new logical connection to a registered device.
    ///
    /// Must fail with [`TunnelError::DeviceNotConnected`] when nothing is
    /// registered for `device_id`.
    async fn dial(&self, device_id: &str) -> TunnelResult<TunnelStream>;
}

/// Device ID for a sandbox.
pub fn device_id(sandbox_id: &str) -> String {
    format!("{}{}", DEVICE_ID_PREFIX, sandbox_id)
}

/// Bounded dialing of sandboxes by sandbox ID.
#[derive(Clone)]
pub struct DialBridge {
    dialer: Arc<dyn ReverseDialer>,
    timeout: Duration,
}

impl DialBridge {
    /// Create a bridge over a reverse dialer.
    pub fn new(dialer: Arc<dyn ReverseDialer>, timeout: Duration) -> Self {
        Self { dialer, timeout }
    }

    /// The per-dial timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a connection to the agent inside `sandbox_id`.
    pub async fn dial(&self, sandbox_id: &str) -> TunnelResult<TunnelStream> {
        let device_id = device_id(sandbox_id);
        debug!("Dialing {} (timeout {:?})", device_id, self.timeout);

        match tokio::time::timeout(self.timeout, self.dialer.dial(&device_id)).await {
            Ok(result) => result,
            Err(_) => Err(TunnelError::Timeout {
                device_id,
                after: self.timeout,
            }),
        }
    }
}
