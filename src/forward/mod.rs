//! HTTP and WebSocket forwarding into sandboxes.
//!
//! Every inbound request, whether it arrived on a dedicated-port listener or
//! on the path-based proxy route, ends up in [`Forwarder::forward`]:
//!
//! 1. Resolve the session to its bound sandbox
//! 2. Dial the sandbox agent over the reverse tunnel
//! 3. Write the request directly onto the tunnel stream
//! 4. Stream the response back (or relay raw bytes after a WebSocket upgrade)
//!
//! Tunnel streams are never pooled. Each exchange dials its own stream, and
//! the stream is closed when the exchange ends on any path.

pub mod body;
pub mod error;
pub mod headers;
mod http;
mod websocket;

pub use body::{ProxyBody, empty_body, full_body, json_response, text_response};
pub use error::{ForwardError, ForwardResult};

use bytes::Bytes;
use hyper::body::Body;
use hyper::{Request, Response, Uri};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::session::SessionStore;
use crate::tunnel::DialBridge;

/// Namespace of the agent's proxy endpoint inside the sandbox.
pub const SANDBOX_PROXY_PREFIX: &str = "/api/v1/dev-containers";

/// Where a request is headed inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    /// Session whose sandbox receives the request.
    pub session_id: String,
    /// Port of the target process inside the sandbox.
    pub target_port: u16,
    /// Request path as seen by the target process.
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
}

impl ForwardTarget {
    /// Target for a request whose whole URI is forwarded unchanged.
    pub fn from_uri(session_id: impl Into<String>, target_port: u16, uri: &Uri) -> Self {
        Self::new(session_id, target_port, uri.path(), uri.query())
    }

    /// Target with an explicit path and query.
    ///
    /// An empty path becomes `/`.
    pub fn new(
        session_id: impl Into<String>,
        target_port: u16,
        path: &str,
        query: Option<&str>,
    ) -> Self {
        let path = if path.is_empty() {
            "/".to_string()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        Self {
            session_id: session_id.into(),
            target_port,
            path,
            query: query.filter(|q| !q.is_empty()).map(str::to_string),
        }
    }

    /// Request target on the sandbox agent.
    pub fn sandbox_path(&self) -> String {
        let mut out = format!(
            "{}/{}/proxy/{}{}",
            SANDBOX_PROXY_PREFIX, self.session_id, self.target_port, self.path
        );
        if let Some(ref query) = self.query {
            out.push('?');
            out.push_str(query);
        }
        out
    }
}

/// What the forwarder knows about the original caller.
#[derive(Debug, Clone, Copy)]
pub struct ClientInfo {
    /// Peer address of the inbound connection.
    pub remote_addr: SocketAddr,
    /// Whether the inbound connection was TLS-terminated.
    pub secure: bool,
}

impl ClientInfo {
    /// Client on a plain-text connection.
    pub fn plain(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            secure: false,
        }
    }
}

/// Forwards requests to the agent inside a session's sandbox.
pub struct Forwarder {
    sessions: Arc<dyn SessionStore>,
    bridge: DialBridge,
}

impl Forwarder {
    /// Create a forwarder.
    pub fn new(sessions: Arc<dyn SessionStore>, bridge: DialBridge) -> Self {
        Self { sessions, bridge }
    }

    /// The dial bridge used for every exchange.
    pub fn bridge(&self) -> &DialBridge {
        &self.bridge
    }

    /// Forward one request and produce the response for the caller.
    ///
    /// Failures become error responses here; they never escape the request.
    /// `shutdown` ends long-lived WebSocket relays when the owning listener
    /// is torn down.
    pub async fn forward<B>(
        &self,
        req: Request<B>,
        target: ForwardTarget,
        client: ClientInfo,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match self.try_forward(req, &target, &client, shutdown).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_upstream() {
                    warn!(
                        "Forward to session {} port {} failed: {}",
                        target.session_id, target.target_port, e
                    );
                } else {
                    debug!("Rejected forward for session {}: {}", target.session_id, e);
                }
                text_response(e.status(), e.to_string())
            }
        }
    }

    async fn try_forward<B>(
        &self,
        req: Request<B>,
        target: &ForwardTarget,
        client: &ClientInfo,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> ForwardResult<Response<ProxyBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let sandbox_id = self.resolve_sandbox(&target.session_id).await?;

        debug!(
            "Forwarding {} {} for session {} via sandbox {}",
            req.method(),
            target.sandbox_path(),
            target.session_id,
            sandbox_id
        );

        let stream = self.bridge.dial(&sandbox_id).await.inspect_err(|e| {
            warn!(
                "Failed to dial sandbox {} for session {}: {}",
                sandbox_id, target.session_id, e
            );
        })?;

        if headers::is_websocket_upgrade(req.headers()) {
            websocket::relay_upgrade(req, stream, target, shutdown).await
        } else {
            http::exchange(req, stream, target, client).await
        }
    }

    async fn resolve_sandbox(&self, session_id: &str) -> ForwardResult<String> {
        let session = self
            .sessions
            .get_session(session_id)
            .await
            .ok_or_else(|| ForwardError::SessionNotFound(session_id.to_string()))?;

        session
            .bound_sandbox()
            .map(str::to_string)
            .ok_or_else(|| ForwardError::NoSandbox(session_id.to_string()))
    }
}

/// Connection builder for the single exchange on a tunnel stream.
fn tunnel_client() -> hyper::client::conn::http1::Builder {
    let mut builder = hyper::client::conn::http1::Builder::new();
    builder.title_case_headers(true);
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{InMemorySessionStore, SessionRecord};
    use crate::tunnel::{DeviceDirectory, DEFAULT_DIAL_TIMEOUT};
    use http_body_util::{BodyExt, Empty};
    use hyper::StatusCode;

    fn forwarder(sessions: Vec<SessionRecord>) -> Forwarder {
        let bridge = DialBridge::new(Arc::new(DeviceDirectory::new()), DEFAULT_DIAL_TIMEOUT);
        Forwarder::new(
            Arc::new(InMemorySessionStore::with_sessions(sessions)),
            bridge,
        )
    }

    fn client() -> ClientInfo {
        ClientInfo::plain("127.0.0.1:40000".parse().unwrap())
    }

    #[test]
    fn test_sandbox_path() {
        let target = ForwardTarget::new("sess-1", 8080, "/app/index.html", Some("a=1&b=2"));
        assert_eq!(
            target.sandbox_path(),
            "/api/v1/dev-containers/sess-1/proxy/8080/app/index.html?a=1&b=2"
        );
    }

    #[test]
    fn test_sandbox_path_defaults_to_root() {
        let target = ForwardTarget::new("sess-1", 3000, "", None);
        assert_eq!(target.sandbox_path(), "/api/v1/dev-containers/sess-1/proxy/3000/");

        let target = ForwardTarget::new("sess-1", 3000, "health", Some(""));
        assert_eq!(target.sandbox_path(), "/api/v1/dev-containers/sess-1/proxy/3000/health");
    }

    #[test]
    fn test_target_from_uri() {
        let uri: Uri = "/ws?token=abc".parse().unwrap();
        let target = ForwardTarget::from_uri("sess-2", 5173, &uri);
        assert_eq!(target.path, "/ws");
        assert_eq!(target.query.as_deref(), Some("token=abc"));
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let forwarder = forwarder(vec![]);
        let req = Request::get("/").body(Empty::<Bytes>::new()).unwrap();

        let response = forwarder
            .forward(req, ForwardTarget::new("ghost", 80, "/", None), client(), None)
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unbound_session_is_503() {
        let forwarder = forwarder(vec![SessionRecord::new("sess-1", None)]);
        let req = Request::get("/").body(Empty::<Bytes>::new()).unwrap();

        let response = forwarder
            .forward(req, ForwardTarget::new("sess-1", 80, "/", None), client(), None)
            .await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).contains("no sandbox"));
    }

    #[tokio::test]
    async fn test_unregistered_device_is_503() {
        let forwarder = forwarder(vec![SessionRecord::new(
            "sess-1",
            Some("sbx-offline".to_string()),
        )]);
        let req = Request::get("/").body(Empty::<Bytes>::new()).unwrap();

        let response = forwarder
            .forward(req, ForwardTarget::new("sess-1", 80, "/", None), client(), None)
            .await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
