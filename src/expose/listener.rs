//! Dedicated-port listeners.
//!
//! A [`PortListener`] owns one listening socket on an allocated port and
//! serves HTTP on it. Every request is forwarded to a fixed
//! `(session, target_port)` pair, with no path prefix.
//!
//! Shutdown is bounded: the socket is closed first, in-flight connections
//! get a grace period to finish, and whatever is left is aborted.

use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::error::{ExposeError, ExposeResult};
use crate::forward::{ClientInfo, ForwardTarget, Forwarder};

/// Default grace period for in-flight connections on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Listener forwarding one allocated port to one sandbox port.
pub struct PortListener {
    session_id: String,
    target_port: u16,
    bind_addr: SocketAddr,
    forwarder: Arc<Forwarder>,
    grace: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl PortListener {
    /// Create a listener. Nothing is bound until [`run`](Self::run).
    pub fn new(
        session_id: impl Into<String>,
        target_port: u16,
        bind_addr: SocketAddr,
        forwarder: Arc<Forwarder>,
        grace: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            target_port,
            bind_addr,
            forwarder,
            grace,
            shutdown_rx,
        }
    }

    /// Bind and serve until shutdown is signalled.
    ///
    /// The socket is unbound by the time this returns.
    pub async fn run(self) -> ExposeResult<()> {
        let listener =
            TcpListener::bind(self.bind_addr)
                .await
                .map_err(|e| ExposeError::ListenFailed {
                    port: self.bind_addr.port(),
                    source: e,
                })?;

        info!(
            "Port listener {} -> session {} port {}",
            self.bind_addr, self.session_id, self.target_port
        );

        let mut connections = JoinSet::new();
        let mut shutdown_rx = self.shutdown_rx.clone();

        if !*shutdown_rx.borrow() {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, peer_addr)) => {
                                debug!(
                                    "Port {} connection from {}",
                                    self.bind_addr.port(),
                                    peer_addr
                                );
                                connections.spawn(serve_connection(
                                    stream,
                                    peer_addr,
                                    self.session_id.clone(),
                                    self.target_port,
                                    self.forwarder.clone(),
                                    self.shutdown_rx.clone(),
                                ));
                            }
                            Err(e) => {
                                warn!("Accept error on port {}: {}", self.bind_addr.port(), e);
                            }
                        }
                    }
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }

        drop(listener);
        info!(
            "Port listener {} shutting down ({} connections in flight)",
            self.bind_addr,
            connections.len()
        );

        let drained = tokio::time::timeout(self.grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            debug!(
                "Aborting {} connections on port {} after grace period",
                connections.len(),
                self.bind_addr.port()
            );
            connections.shutdown().await;
        }

        Ok(())
    }
}

/// Serve HTTP on one accepted connection.
async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    session_id: String,
    target_port: u16,
    forwarder: Arc<Forwarder>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let client = ClientInfo::plain(peer_addr);
    let relay_shutdown = shutdown_rx.clone();

    let service = service_fn(move |req: Request<Incoming>| {
        let forwarder = forwarder.clone();
        let target = ForwardTarget::from_uri(session_id.clone(), target_port, req.uri());
        let relay_shutdown = relay_shutdown.clone();

        async move {
            Ok::<_, Infallible>(
                forwarder
                    .forward(req, target, client, Some(relay_shutdown))
                    .await,
            )
        }
    });

    let conn = http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!("Connection from {} ended: {}", peer_addr, e);
            }
        }
        _ = shutdown_rx.changed() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!("Connection from {} ended during shutdown: {}", peer_addr, e);
            }
        }
    }
}

/// Owner's handle on a running [`PortListener`].
pub struct PortListenerHandle {
    id: u64,
    session_id: String,
    target_port: u16,
    allocated_port: u16,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PortListenerHandle {
    pub fn new(
        id: u64,
        session_id: impl Into<String>,
        target_port: u16,
        allocated_port: u16,
        shutdown_tx: watch::Sender<bool>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            session_id: session_id.into(),
            target_port,
            allocated_port,
            shutdown_tx,
            task,
        }
    }

    /// Registry-assigned listener ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn target_port(&self) -> u16 {
        self.target_port
    }

    pub fn allocated_port(&self) -> u16 {
        self.allocated_port
    }

    /// Whether the listener task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for the listener to release its socket.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!("Port listener {} panicked: {}", self.allocated_port, e);
            }
        }
        debug!(
            "Stopped port listener {} for session {}",
            self.allocated_port, self.session_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;
    use crate::tunnel::{DEFAULT_DIAL_TIMEOUT, DeviceDirectory, DialBridge};
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn forwarder() -> Arc<Forwarder> {
        Arc::new(Forwarder::new(
            Arc::new(InMemorySessionStore::new()),
            DialBridge::new(Arc::new(DeviceDirectory::new()), DEFAULT_DIAL_TIMEOUT),
        ))
    }

    async fn free_port() -> u16 {
        let l = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        l.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let held = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = held.local_addr().unwrap();
        let (_tx, rx) = watch::channel(false);

        let listener = PortListener::new("sess-1", 8080, addr, forwarder(), DEFAULT_SHUTDOWN_GRACE, rx);
        let result = listener.run().await;

        assert!(matches!(
            result,
            Err(ExposeError::ListenFailed { port, .. }) if port == addr.port()
        ));
    }

    #[tokio::test]
    async fn test_serves_and_unbinds_on_stop() {
        let port = free_port().await;
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let (tx, rx) = watch::channel(false);

        let listener = PortListener::new("ghost", 8080, addr, forwarder(), Duration::from_millis(200), rx);
        let task = tokio::spawn(async move { listener.run().await.unwrap() });
        let handle = PortListenerHandle::new(1, "ghost", 8080, port, tx, task);

        // Wait for the bind.
        let mut stream = loop {
            match TcpStream::connect(addr).await {
                Ok(s) => break s,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };

        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 404"), "got: {}", response);

        handle.stop().await;
        assert!(TcpListener::bind(addr).await.is_ok());
    }
}
