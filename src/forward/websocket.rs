//! WebSocket upgrade replay and raw byte relay.
//!
//! The caller's upgrade request is replayed to the sandbox with its headers
//! intact. If the sandbox agrees (101), both sides are hijacked and bytes are
//! copied in both directions until either side closes. Any other status is
//! handed back to the caller with `Connection: close`, ending the caller's
//! connection once the response is written.

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::body::Body;
use hyper::header::{CONNECTION, HOST, HeaderValue};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::body::{ProxyBody, empty_body};
use super::error::{ForwardError, ForwardResult};
use super::headers::{SANDBOX_HOST, replay_headers};
use super::{ForwardTarget, tunnel_client};
use crate::tunnel::TunnelStream;

/// Replay a WebSocket upgrade on `stream`.
pub(super) async fn relay_upgrade<B>(
    mut req: Request<B>,
    stream: TunnelStream,
    target: &ForwardTarget,
    shutdown: Option<watch::Receiver<bool>>,
) -> ForwardResult<Response<ProxyBody>>
where
    B: Body<Data = Bytes> + Send + 'static,
{
    let client_upgrade = hyper::upgrade::on(&mut req);

    let mut headers = replay_headers(req.headers());
    headers.insert(HOST, HeaderValue::from_static(SANDBOX_HOST));

    let mut upstream_req = Request::builder()
        .method(req.method().clone())
        .uri(target.sandbox_path())
        .body(Empty::<Bytes>::new())?;
    *upstream_req.headers_mut() = headers;

    let (mut sender, conn) = tunnel_client()
        .handshake(TokioIo::new(stream))
        .await
        .map_err(ForwardError::UpstreamWrite)?;

    let session_id = target.session_id.clone();
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            debug!("Upgrade connection for session {} ended: {}", session_id, e);
        }
    });

    let mut upstream_resp = sender
        .send_request(upstream_req)
        .await
        .map_err(ForwardError::from_exchange)?;

    if upstream_resp.status() != StatusCode::SWITCHING_PROTOCOLS {
        debug!(
            "Sandbox refused upgrade for session {} port {}: {}",
            target.session_id,
            target.target_port,
            upstream_resp.status()
        );
        let mut refused = upstream_resp.map(|b| b.boxed());
        refused
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
        return Ok(refused);
    }

    let upstream_upgrade = hyper::upgrade::on(&mut upstream_resp);
    let (parts, _) = upstream_resp.into_parts();

    let session_id = target.session_id.clone();
    let target_port = target.target_port;
    tokio::spawn(async move {
        let _sender = sender;
        match tokio::try_join!(client_upgrade, upstream_upgrade) {
            Ok((client, upstream)) => {
                debug!("WebSocket open for session {} port {}", session_id, target_port);
                relay(TokioIo::new(client), TokioIo::new(upstream), shutdown).await;
                debug!("WebSocket closed for session {} port {}", session_id, target_port);
            }
            Err(e) => {
                warn!(
                    "WebSocket upgrade failed for session {} port {}: {}",
                    session_id, target_port, e
                );
            }
        }
    });

    Ok(Response::from_parts(parts, empty_body()))
}

/// Copy bytes both ways until either side closes or `shutdown` fires.
///
/// Both streams are dropped on return.
pub(crate) async fn relay<C, U>(client: C, upstream: U, shutdown: Option<watch::Receiver<bool>>)
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let client_to_upstream = tokio::io::copy(&mut client_read, &mut upstream_write);
    let upstream_to_client = tokio::io::copy(&mut upstream_read, &mut client_write);

    let stopped = async move {
        match shutdown {
            Some(mut rx) => {
                let _ = rx.wait_for(|stop| *stop).await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = client_to_upstream => {
            if let Err(e) = result {
                debug!("Client->sandbox copy ended: {}", e);
            }
        }
        result = upstream_to_client => {
            if let Err(e) = result {
                debug!("Sandbox->client copy ended: {}", e);
            }
        }
        _ = stopped => {
            debug!("Relay stopped by shutdown");
        }
    }
}
