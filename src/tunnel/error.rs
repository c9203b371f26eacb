//! Error types for reverse tunnel dialing.

use std::time::Duration;
use thiserror::Error;

/// Errors from opening a logical connection to a sandbox.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// No reverse connection is registered for the device.
    #[error("Device {0} is not connected")]
    DeviceNotConnected(String),

    /// The dial did not complete within the configured timeout.
    #[error("Dial to device {device_id} timed out after {after:?}")]
    Timeout {
        /// Device that was dialed.
        device_id: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The device is registered but the connection could not be opened.
    #[error("Failed to connect to device {device_id}: {source}")]
    Connect {
        /// Device that was dialed.
        device_id: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;
