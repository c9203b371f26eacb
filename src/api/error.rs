//! Error types for the HTTP API.

use hyper::StatusCode;
use std::net::SocketAddr;
use thiserror::Error;

use crate::expose::ExposeError;

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request: bad JSON, oversized body, non-numeric port.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Unknown session or route.
    #[error("{0}")]
    NotFound(String),

    /// The route exists but not for this method.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Failure from the exposure registry.
    #[error(transparent)]
    Expose(#[from] ExposeError),

    /// The API listener could not bind.
    #[error("Failed to bind API listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Expose(ExposeError::NotExposed { .. }) => StatusCode::NOT_FOUND,
            ApiError::Expose(ExposeError::InvalidPort(_))
            | ApiError::Expose(ExposeError::InvalidProtocol(_)) => StatusCode::BAD_REQUEST,
            ApiError::Expose(_) | ApiError::Bind { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Session lookup miss.
    pub(crate) fn session_not_found(session_id: &str) -> Self {
        ApiError::NotFound(format!("Session {} not found", session_id))
    }
}
