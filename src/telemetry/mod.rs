//! Audit logging for sandbox-portal.
//!
//! Two separate concerns live side by side:
//!
//! - **Audit logging** (syslog): exposure changes are written as one JSON
//!   object per line with the `SANDBOX_PORTAL` tag
//! - **Diagnostic logging** (tracing): request-level detail goes to stderr
//!
//! # Event Format
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"port_expose","session_id":"sess-1","port":8080,"protocol":"http","allocated_port":30000,"url":"http://localhost:30000"}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, TimestampedEvent};
pub use syslog::{AuditLogger, SYSLOG_TAG};
