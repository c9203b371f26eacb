//! Syslog integration for audit logging.

use std::sync::{Mutex, PoisonError};

use syslog::{Facility, Formatter3164};
use tracing::{debug, error};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "SANDBOX_PORTAL";

type SyslogWriter = syslog::Logger<syslog::LoggerBackend, Formatter3164>;

/// Audit logger that writes structured JSON events to syslog.
///
/// Shared as `Arc<AuditLogger>` between the registry and the API server.
pub struct AuditLogger {
    /// `None` indicates a null logger.
    writer: Option<Mutex<SyslogWriter>>,
}

impl AuditLogger {
    /// Create a new audit logger connected to the local syslog daemon.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter)
            .map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            writer: Some(Mutex::new(writer)),
        })
    }

    /// Create a null audit logger that discards all events.
    pub fn new_null() -> Self {
        Self { writer: None }
    }

    /// Log an audit event.
    ///
    /// Serialization or transport failures are reported through `tracing`
    /// and never propagate to the caller.
    pub fn log(&self, event: AuditEvent) {
        let Some(ref writer) = self.writer else {
            return;
        };

        match serde_json::to_string(&event.with_timestamp()) {
            Ok(json) => {
                let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = writer.info(&json) {
                    error!("Failed to write to syslog: {}", e);
                }
                debug!("Logged audit event: {}", json);
            }
            Err(e) => {
                error!("Failed to serialize audit event: {}", TelemetryError::from(e));
            }
        }
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        self.writer.is_none()
    }
}
