//! Error types for request forwarding.
//!
//! Each variant maps to exactly one HTTP status so handlers never need to
//! inspect error strings.

use hyper::StatusCode;
use thiserror::Error;

use crate::tunnel::TunnelError;

/// Errors from forwarding a request into a sandbox.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The session does not exist.
    #[error("Session {0} not found")]
    SessionNotFound(String),

    /// The session exists but is not bound to a running sandbox.
    #[error("Session {0} has no sandbox")]
    NoSandbox(String),

    /// Dialing the sandbox failed.
    #[error("Failed to connect to sandbox: {0}")]
    Dial(#[from] TunnelError),

    /// Writing the request onto the tunnel failed.
    #[error("Failed to send request to sandbox: {0}")]
    UpstreamWrite(#[source] hyper::Error),

    /// The sandbox answered with something that is not a valid HTTP response.
    #[error("Malformed response from sandbox: {0}")]
    MalformedResponse(#[source] hyper::Error),

    /// The upstream request could not be constructed.
    #[error("Failed to build upstream request: {0}")]
    BuildRequest(#[from] hyper::http::Error),
}

/// Result type for forwarding operations.
pub type ForwardResult<T> = Result<T, ForwardError>;

impl ForwardError {
    /// Classify a failure of the request/response exchange on the tunnel.
    pub(crate) fn from_exchange(err: hyper::Error) -> Self {
        if err.is_parse() || err.is_parse_status() || err.is_incomplete_message() {
            ForwardError::MalformedResponse(err)
        } else {
            ForwardError::UpstreamWrite(err)
        }
    }

    /// HTTP status returned to the original caller.
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ForwardError::NoSandbox(_) => StatusCode::SERVICE_UNAVAILABLE,
            ForwardError::Dial(TunnelError::DeviceNotConnected(_))
            | ForwardError::Dial(TunnelError::Timeout { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ForwardError::Dial(TunnelError::Connect { .. }) => StatusCode::BAD_GATEWAY,
            ForwardError::UpstreamWrite(_) | ForwardError::MalformedResponse(_) => {
                StatusCode::BAD_GATEWAY
            }
            ForwardError::BuildRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure lies with the sandbox side rather than the caller.
    pub fn is_upstream(&self) -> bool {
        !matches!(self, ForwardError::SessionNotFound(_))
    }
}
