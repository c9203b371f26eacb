//! Port allocation bookkeeping.
//!
//! The allocator only records which session owns which port. It lives inside
//! the registry's lock; the OS-level bind probe ([`probe`]) runs outside it.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use tokio::net::TcpListener;
use tracing::trace;

use super::error::AllocationError;

/// Default first port of the dedicated-port pool.
pub const DEFAULT_RANGE_START: u16 = 30000;
/// Default end (exclusive) of the dedicated-port pool.
pub const DEFAULT_RANGE_END: u16 = 40000;

/// Half-open port range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    /// Create a range. Fails if it is empty.
    pub fn new(start: u16, end: u16) -> Result<Self, AllocationError> {
        if start >= end {
            return Err(AllocationError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    /// Number of ports in the range.
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..self.end).contains(&port)
    }

    fn iter(&self) -> std::ops::Range<u16> {
        self.start..self.end
    }

    pub(crate) fn exhausted(&self) -> AllocationError {
        AllocationError::Exhausted {
            start: self.start,
            end: self.end,
        }
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: DEFAULT_RANGE_START,
            end: DEFAULT_RANGE_END,
        }
    }
}

/// Port reservations: each port maps to at most one session.
#[derive(Debug)]
pub struct PortAllocator {
    range: PortRange,
    reserved: HashMap<u16, String>,
}

impl PortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            reserved: HashMap::new(),
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Reserve the lowest free port not in `rejected` for `session_id`.
    ///
    /// The reservation is provisional until the caller's bind probe succeeds.
    pub fn reserve_candidate(&mut self, session_id: &str, rejected: &HashSet<u16>) -> Option<u16> {
        let port = self
            .range
            .iter()
            .find(|p| !self.reserved.contains_key(p) && !rejected.contains(p))?;
        self.reserved.insert(port, session_id.to_string());
        trace!("Reserved candidate port {} for session {}", port, session_id);
        Some(port)
    }

    /// Reserve a specific port for `session_id` if it is in range and free.
    pub fn reserve(&mut self, port: u16, session_id: &str) -> bool {
        if !self.range.contains(port) || self.reserved.contains_key(&port) {
            return false;
        }
        self.reserved.insert(port, session_id.to_string());
        true
    }

    /// Release one port. Returns its former owner.
    pub fn release(&mut self, port: u16) -> Option<String> {
        self.reserved.remove(&port)
    }

    /// Release every port held by a session. Returns them in ascending order.
    pub fn release_session(&mut self, session_id: &str) -> Vec<u16> {
        let ports = self.ports_for(session_id);
        for port in &ports {
            self.reserved.remove(port);
        }
        ports
    }

    /// Session owning a port.
    pub fn owner(&self, port: u16) -> Option<&str> {
        self.reserved.get(&port).map(String::as_str)
    }

    /// Ports held by a session, ascending.
    pub fn ports_for(&self, session_id: &str) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .reserved
            .iter()
            .filter(|(_, owner)| owner.as_str() == session_id)
            .map(|(port, _)| *port)
            .collect();
        ports.sort_unstable();
        ports
    }

    /// Number of reserved ports.
    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }
}

/// Check that the OS will let us bind `host:port` right now.
///
/// The probe socket is closed before returning, so another process can still
/// grab the port before the listener binds it.
pub async fn probe(host: IpAddr, port: u16) -> bool {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) => {
            trace!("Probe of {}:{} failed: {}", host, port, e);
            false
        }
    }
}
