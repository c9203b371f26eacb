//! The API server.
//!
//! Listens on TCP and serves the exposure API plus the path-based proxy
//! route. Each connection runs in its own task. HTTP/1.1 upgrades are
//! enabled so WebSocket requests on the proxy route can be relayed.
//!
//! # Example
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = ApiServer::bind(addr, state, shutdown_rx).await?;
//! let task = tokio::spawn(server.run());
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! task.await??;
//! ```

use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::{ApiError, ApiResult};
use super::handlers::{ApiState, handle};
use crate::forward::ClientInfo;

/// HTTP server for the public API.
pub struct ApiServer {
    listener: TcpListener,
    state: Arc<ApiState>,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl ApiServer {
    /// Bind the listening socket.
    pub async fn bind(
        addr: SocketAddr,
        state: Arc<ApiState>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> ApiResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::Bind { addr, source: e })?;

        Ok(Self {
            listener,
            state,
            shutdown_rx,
        })
    }

    /// The bound address. Differs from the requested one for port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the shutdown signal is received.
    pub async fn run(self) -> ApiResult<()> {
        match self.listener.local_addr() {
            Ok(addr) => info!("API listening on {}", addr),
            Err(e) => warn!("API listening on unknown address: {}", e),
        }

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            debug!("Accepted API connection from {}", peer_addr);
                            self.spawn_connection_handler(stream, peer_addr);
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("API server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Spawn a task to handle a single connection.
    fn spawn_connection_handler(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let state = self.state.clone();
        let shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state, shutdown_rx).await {
                // Resets are routine when clients go away mid-request
                if e.is_incomplete_message() || e.is_canceled() {
                    debug!("Connection from {} ended: {}", peer_addr, e);
                } else {
                    warn!("Connection error from {}: {}", peer_addr, e);
                }
            }
        });
    }
}

/// Serve HTTP on one accepted connection.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ApiState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), hyper::Error> {
    let client = ClientInfo::plain(peer_addr);
    let relay_shutdown = shutdown_rx.clone();

    let service = service_fn(move |req: Request<Incoming>| {
        let state = state.clone();
        let relay_shutdown = relay_shutdown.clone();

        async move { Ok::<_, Infallible>(handle(req, state, client, relay_shutdown).await) }
    });

    let conn = http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown_rx.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    }
}
