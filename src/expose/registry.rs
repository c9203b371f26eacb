//! The exposure registry.
//!
//! Single owner of all exposure state: per-session exposure records, port
//! reservations and running dedicated-port listeners. Everything sits behind
//! one lock. Critical sections never span I/O; bind probes and listener
//! startup happen outside it.
//!
//! Listeners and port reservations belong to the session. `unexpose` only
//! removes the record; `cleanup` stops the session's listeners and returns
//! its ports to the pool.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::allocator::{PortAllocator, PortRange, probe};
use super::error::{AllocationError, ExposeError, ExposeResult};
use super::listener::{DEFAULT_SHUTDOWN_GRACE, PortListener, PortListenerHandle};
use super::types::{ExposeOutcome, ExposedPort, ExposureStatus, Protocol};
use super::urls::UrlBuilder;
use crate::forward::Forwarder;
use crate::telemetry::{AuditEvent, AuditLogger};

/// Registry settings, derived from `[server]` and `[ports]`.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Builds the URLs handed back to callers.
    pub urls: UrlBuilder,
    /// Whether to allocate dedicated ports at all.
    pub dedicated_ports: bool,
    /// Dedicated-port pool.
    pub port_range: PortRange,
    /// Address dedicated listeners (and bind probes) use.
    pub bind_host: IpAddr,
    /// Grace period for in-flight connections when a listener stops.
    pub shutdown_grace: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            urls: UrlBuilder::new("http://localhost:8080", None),
            dedicated_ports: true,
            port_range: PortRange::default(),
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// What a session cleanup tore down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Exposure records removed.
    pub exposures: usize,
    /// Dedicated ports returned to the pool, ascending.
    pub released_ports: Vec<u16>,
    /// Listeners stopped.
    pub listeners_stopped: usize,
}

#[derive(Default)]
struct RegistryState {
    /// session -> exposures, in creation order.
    exposed: HashMap<String, Vec<ExposedPort>>,
    /// Allocated port -> running listener.
    listeners: HashMap<u16, PortListenerHandle>,
    next_listener_id: u64,
}

struct Locked {
    state: RegistryState,
    allocator: PortAllocator,
}

/// Per-session table of exposed ports.
pub struct ExposureRegistry {
    inner: RwLock<Locked>,
    settings: RegistrySettings,
    forwarder: Arc<Forwarder>,
    audit: Arc<AuditLogger>,
}

impl ExposureRegistry {
    /// Create an empty registry.
    pub fn new(
        settings: RegistrySettings,
        forwarder: Arc<Forwarder>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let allocator = PortAllocator::new(settings.port_range);
        Self {
            inner: RwLock::new(Locked {
                state: RegistryState::default(),
                allocator,
            }),
            settings,
            forwarder,
            audit,
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// The forwarder listeners hand requests to.
    pub fn forwarder(&self) -> &Arc<Forwarder> {
        &self.forwarder
    }

    fn read(&self) -> RwLockReadGuard<'_, Locked> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Locked> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Expose `port` of a session's sandbox.
    ///
    /// Re-exposing an existing (session, port) returns the existing record
    /// and starts nothing new. Running out of dedicated ports is not an
    /// error; the dedicated URL is left out.
    pub async fn expose(
        self: &Arc<Self>,
        session_id: &str,
        port: u16,
        protocol: Protocol,
        name: Option<String>,
    ) -> ExposeResult<ExposeOutcome> {
        if let Some(existing) = self.find(session_id, port) {
            debug!("Port {} already exposed for session {}", port, session_id);
            return Ok(ExposeOutcome::from_record(session_id, &existing));
        }

        let reserved = if self.settings.dedicated_ports {
            match self.allocate_port(session_id).await {
                Ok(allocated) => Some(allocated),
                Err(e) => {
                    warn!(
                        "No dedicated port for session {} port {}: {}",
                        session_id, port, e
                    );
                    None
                }
            }
        } else {
            None
        };

        let record = {
            let mut guard = self.write();
            let Locked { state, allocator } = &mut *guard;

            let raced = state
                .exposed
                .get(session_id)
                .and_then(|records| records.iter().find(|r| r.port == port))
                .cloned();
            if let Some(existing) = raced {
                if let Some(allocated) = reserved {
                    if allocator.owner(allocated) == Some(session_id) {
                        allocator.release(allocated);
                    }
                }
                debug!("Port {} exposed concurrently for session {}", port, session_id);
                return Ok(ExposeOutcome::from_record(session_id, &existing));
            }

            // A cleanup between the probe and here drops the reservation.
            let allocated_port = reserved.filter(|allocated| {
                match allocator.owner(*allocated) {
                    Some(owner) => owner == session_id,
                    None => allocator.reserve(*allocated, session_id),
                }
            });
            if let (Some(allocated), None) = (reserved, allocated_port) {
                warn!(
                    "Port {} was taken from session {} during allocation",
                    allocated, session_id
                );
            }

            let record = self.build_record(session_id, port, protocol, name, allocated_port);
            state
                .exposed
                .entry(session_id.to_string())
                .or_default()
                .push(record.clone());

            if let Some(allocated) = allocated_port {
                state.next_listener_id += 1;
                let handle =
                    self.spawn_listener(state.next_listener_id, session_id, port, allocated);
                state.listeners.insert(allocated, handle);
            }
            record
        };

        self.audit.log(AuditEvent::PortExpose {
            session_id: session_id.to_string(),
            port,
            protocol,
            allocated_port: record.allocated_port,
            url: record.primary_url.clone(),
        });
        info!(
            "Exposed port {} for session {} at {}",
            port, session_id, record.primary_url
        );

        Ok(ExposeOutcome::from_record(session_id, &record))
    }

    /// Remove the exposure record for `(session_id, port)`.
    ///
    /// The session's listeners keep running until [`cleanup`](Self::cleanup).
    pub fn unexpose(&self, session_id: &str, port: u16) -> ExposeResult<()> {
        {
            let mut guard = self.write();
            let exposed = &mut guard.state.exposed;

            let records = exposed
                .get_mut(session_id)
                .ok_or_else(|| not_exposed(session_id, port))?;
            let index = records
                .iter()
                .position(|r| r.port == port)
                .ok_or_else(|| not_exposed(session_id, port))?;
            records.remove(index);
            if records.is_empty() {
                exposed.remove(session_id);
            }
        }

        self.audit.log(AuditEvent::PortUnexpose {
            session_id: session_id.to_string(),
            port,
        });
        info!("Unexposed port {} for session {}", port, session_id);
        Ok(())
    }

    /// Snapshot of a session's exposures, in creation order.
    pub fn list(&self, session_id: &str) -> Vec<ExposedPort> {
        self.read()
            .state
            .exposed
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Tear down everything a session owns.
    ///
    /// Listener sockets are unbound by the time this returns. Safe to call
    /// for a session with nothing exposed.
    pub async fn cleanup(&self, session_id: &str) -> CleanupReport {
        let (exposures, released_ports, handles) = {
            let mut guard = self.write();
            let Locked { state, allocator } = &mut *guard;

            let exposures = state.exposed.remove(session_id).map_or(0, |r| r.len());
            let released_ports = allocator.release_session(session_id);

            let owned: Vec<u16> = state
                .listeners
                .iter()
                .filter(|(_, handle)| handle.session_id() == session_id)
                .map(|(port, _)| *port)
                .collect();
            let handles: Vec<PortListenerHandle> = owned
                .iter()
                .filter_map(|port| state.listeners.remove(port))
                .collect();

            (exposures, released_ports, handles)
        };

        let listeners_stopped = handles.len();
        let mut stopping = JoinSet::new();
        for handle in handles {
            stopping.spawn(handle.stop());
        }
        while stopping.join_next().await.is_some() {}

        if exposures > 0 || !released_ports.is_empty() || listeners_stopped > 0 {
            self.audit.log(AuditEvent::SessionCleanup {
                session_id: session_id.to_string(),
                exposures,
                released_ports: released_ports.clone(),
            });
            info!(
                "Cleaned up session {}: {} exposures, {} listeners, ports {:?}",
                session_id, exposures, listeners_stopped, released_ports
            );
        } else {
            debug!("Nothing to clean up for session {}", session_id);
        }

        CleanupReport {
            exposures,
            released_ports,
            listeners_stopped,
        }
    }

    /// Clean up every session with exposures or listeners.
    ///
    /// Returns the number of sessions cleaned.
    pub async fn cleanup_all(&self) -> usize {
        let sessions: HashSet<String> = {
            let guard = self.read();
            guard
                .state
                .exposed
                .keys()
                .cloned()
                .chain(
                    guard
                        .state
                        .listeners
                        .values()
                        .map(|h| h.session_id().to_string()),
                )
                .collect()
        };

        for session_id in &sessions {
            self.cleanup(session_id).await;
        }
        sessions.len()
    }

    /// Reserve a dedicated port for a session.
    ///
    /// Candidates are reserved under the lock, then probed outside it. A port
    /// that fails the probe is skipped for the rest of this call. The probe
    /// socket is closed before the listener binds, so another process can
    /// still take the port in between.
    pub async fn allocate_port(&self, session_id: &str) -> Result<u16, AllocationError> {
        let mut rejected = HashSet::new();
        loop {
            let candidate = self.write().allocator.reserve_candidate(session_id, &rejected);
            let Some(port) = candidate else {
                return Err(self.settings.port_range.exhausted());
            };

            if probe(self.settings.bind_host, port).await {
                debug!("Allocated port {} to session {}", port, session_id);
                return Ok(port);
            }

            debug!("Port {} is held by another process", port);
            self.write().allocator.release(port);
            rejected.insert(port);
        }
    }

    /// Dedicated ports currently reserved by a session.
    pub fn allocated_ports(&self, session_id: &str) -> Vec<u16> {
        self.read().allocator.ports_for(session_id)
    }

    /// Session owning a dedicated port.
    pub fn port_owner(&self, port: u16) -> Option<String> {
        self.read().allocator.owner(port).map(str::to_string)
    }

    /// Number of running listeners.
    pub fn listener_count(&self) -> usize {
        self.read().state.listeners.len()
    }

    /// Whether a listener is registered on `allocated_port`.
    pub fn has_listener(&self, allocated_port: u16) -> bool {
        self.read().state.listeners.contains_key(&allocated_port)
    }

    fn build_record(
        &self,
        session_id: &str,
        port: u16,
        protocol: Protocol,
        name: Option<String>,
        allocated_port: Option<u16>,
    ) -> ExposedPort {
        let urls = &self.settings.urls;
        let mut built = Vec::with_capacity(3);
        if let Some(url) = urls.subdomain_url(session_id, port) {
            built.push(url);
        }
        if let Some(allocated) = allocated_port {
            built.push(urls.dedicated_url(allocated));
        }
        let path_url = urls.path_url(session_id, port);
        let primary_url = built.first().cloned().unwrap_or_else(|| path_url.clone());
        built.push(path_url);

        ExposedPort {
            port,
            protocol,
            name,
            primary_url,
            urls: built,
            allocated_port,
            status: ExposureStatus::Active,
            created_at: Utc::now(),
        }
    }

    fn find(&self, session_id: &str, port: u16) -> Option<ExposedPort> {
        self.read()
            .state
            .exposed
            .get(session_id)
            .and_then(|records| records.iter().find(|r| r.port == port))
            .cloned()
    }

    fn spawn_listener(
        self: &Arc<Self>,
        id: u64,
        session_id: &str,
        target_port: u16,
        allocated_port: u16,
    ) -> PortListenerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = PortListener::new(
            session_id,
            target_port,
            SocketAddr::new(self.settings.bind_host, allocated_port),
            self.forwarder.clone(),
            self.settings.shutdown_grace,
            shutdown_rx,
        );

        let registry = Arc::downgrade(self);
        let session = session_id.to_string();
        let task = tokio::spawn(async move {
            if let Err(e) = listener.run().await {
                error!(
                    "Port listener {} for session {} failed: {}",
                    allocated_port, session, e
                );
                if let Some(registry) = registry.upgrade() {
                    registry.listener_failed(id, &session, allocated_port, &e);
                }
            }
        });

        PortListenerHandle::new(id, session_id, target_port, allocated_port, shutdown_tx, task)
    }

    /// Forget a listener that could not start and free its port.
    ///
    /// The exposure record stays; its path-based URL still works.
    fn listener_failed(&self, id: u64, session_id: &str, allocated_port: u16, err: &ExposeError) {
        let removed = {
            let mut guard = self.write();
            let Locked { state, allocator } = &mut *guard;
            let current = state
                .listeners
                .get(&allocated_port)
                .is_some_and(|handle| handle.id() == id);
            if current {
                state.listeners.remove(&allocated_port);
                allocator.release(allocated_port);
            }
            current
        };

        if removed {
            self.audit.log(AuditEvent::ListenerFailed {
                session_id: session_id.to_string(),
                allocated_port,
                reason: err.to_string(),
            });
        }
    }
}

fn not_exposed(session_id: &str, port: u16) -> ExposeError {
    ExposeError::NotExposed {
        session_id: session_id.to_string(),
        port,
    }
}
