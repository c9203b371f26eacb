//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `SANDBOX_PORTAL` tag so that
//! every change to what is reachable from outside a sandbox leaves a trail.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::expose::Protocol;

/// Audit events for exposure bookkeeping.
///
/// Only control-plane mutations are audited. Forwarded traffic is not.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Service started accepting requests.
    ServiceStart {
        /// Address of the API / path-based proxy listener.
        listen: String,
        /// Process ID of the service.
        pid: u32,
    },

    /// Service stopped.
    ServiceStop {
        /// Number of sessions whose exposures were torn down on the way out.
        sessions_cleaned: usize,
    },

    /// A sandbox port was exposed.
    PortExpose {
        /// Owning session.
        session_id: String,
        /// Port inside the sandbox.
        port: u16,
        /// Declared protocol.
        protocol: Protocol,
        /// Dedicated listener port, when one was allocated.
        allocated_port: Option<u16>,
        /// Primary externally reachable URL.
        url: String,
    },

    /// A sandbox port exposure was removed.
    PortUnexpose {
        /// Owning session.
        session_id: String,
        /// Port inside the sandbox.
        port: u16,
    },

    /// All exposures of a session were torn down.
    SessionCleanup {
        /// The session being cleaned up.
        session_id: String,
        /// Number of exposure records removed.
        exposures: usize,
        /// Dedicated ports returned to the pool.
        released_ports: Vec<u16>,
    },

    /// A dedicated-port listener failed to bind.
    ListenerFailed {
        /// Owning session.
        session_id: String,
        /// The allocated port that could not be bound.
        allocated_port: u16,
        /// Bind error.
        reason: String,
    },
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_start_serialization() {
        let event = AuditEvent::ServiceStart {
            listen: "0.0.0.0:8080".to_string(),
            pid: 4242,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"service_start\""));
        assert!(json.contains("\"listen\":\"0.0.0.0:8080\""));
        assert!(json.contains("\"pid\":4242"));
        assert!(json.contains("\"ts\""));
    }

    #[test]
    fn test_port_expose_serialization() {
        let event = AuditEvent::PortExpose {
            session_id: "sess-1".to_string(),
            port: 8080,
            protocol: Protocol::Http,
            allocated_port: Some(30000),
            url: "http://localhost:30000".to_string(),
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"port_expose\""));
        assert!(json.contains("\"session_id\":\"sess-1\""));
        assert!(json.contains("\"protocol\":\"http\""));
        assert!(json.contains("\"allocated_port\":30000"));
    }

    #[test]
    fn test_session_cleanup_serialization() {
        let event = AuditEvent::SessionCleanup {
            session_id: "sess-9".to_string(),
            exposures: 2,
            released_ports: vec![30000, 30001],
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"session_cleanup\""));
        assert!(json.contains("\"released_ports\":[30000,30001]"));
    }

    #[test]
    fn test_listener_failed_serialization() {
        let event = AuditEvent::ListenerFailed {
            session_id: "sess-2".to_string(),
            allocated_port: 30004,
            reason: "address in use".to_string(),
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"listener_failed\""));
        assert!(json.contains("\"allocated_port\":30004"));
    }
}
