//! Error types for port exposure.

use thiserror::Error;

/// Errors from the port allocator.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Every port in the range is reserved or held by another process.
    #[error("No available ports in range {start}-{end}")]
    Exhausted {
        /// First port of the range (inclusive).
        start: u16,
        /// End of the range (exclusive).
        end: u16,
    },

    /// The configured range is empty.
    #[error("Invalid port range {start}-{end}")]
    InvalidRange {
        /// First port of the range (inclusive).
        start: u16,
        /// End of the range (exclusive).
        end: u16,
    },
}

/// Errors from exposure registry operations.
#[derive(Debug, Error)]
pub enum ExposeError {
    /// No exposure exists for this session and port.
    #[error("Port {port} is not exposed for session {session_id}")]
    NotExposed {
        /// Session the lookup was for.
        session_id: String,
        /// Port inside the sandbox.
        port: u16,
    },

    /// Port number outside 1-65535.
    #[error("Invalid port {0}: must be between 1 and 65535")]
    InvalidPort(i64),

    /// Protocol other than `http` or `tcp`.
    #[error("Unsupported protocol: {0}")]
    InvalidProtocol(String),

    /// A dedicated-port listener could not bind.
    #[error("Failed to listen on port {port}: {source}")]
    ListenFailed {
        /// The allocated port.
        port: u16,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Port allocation failed.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// Result type for exposure operations.
pub type ExposeResult<T> = Result<T, ExposeError>;
