//! Plain HTTP exchange over a tunnel stream.

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::header::{HOST, HeaderValue};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tracing::debug;

use super::body::ProxyBody;
use super::error::{ForwardError, ForwardResult};
use super::headers::{forwardable_headers, set_proxy_headers};
use super::{ClientInfo, ForwardTarget, tunnel_client};
use crate::tunnel::TunnelStream;

/// Send one request on `stream` and return the sandbox's response.
///
/// The response status, headers and body are passed through unchanged. The
/// tunnel stream closes once the response body has been fully read or
/// dropped.
pub(super) async fn exchange<B>(
    req: Request<B>,
    stream: TunnelStream,
    target: &ForwardTarget,
    client: &ClientInfo,
) -> ForwardResult<Response<ProxyBody>>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();

    let original_host = parts.headers.get(HOST).cloned().or_else(|| {
        parts
            .uri
            .authority()
            .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
    });

    let mut headers = forwardable_headers(&parts.headers);
    set_proxy_headers(&mut headers, client, original_host.as_ref());

    let mut upstream_req = Request::builder()
        .method(parts.method)
        .uri(target.sandbox_path())
        .body(body)?;
    *upstream_req.headers_mut() = headers;

    let (mut sender, conn) = tunnel_client()
        .handshake(TokioIo::new(stream))
        .await
        .map_err(ForwardError::UpstreamWrite)?;

    let session_id = target.session_id.clone();
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Tunnel connection for session {} ended: {}", session_id, e);
        }
    });

    let response = sender
        .send_request(upstream_req)
        .await
        .map_err(ForwardError::from_exchange)?;

    // One request per tunnel stream.
    drop(sender);

    debug!(
        "Sandbox answered {} for session {} port {}",
        response.status(),
        target.session_id,
        target.target_port
    );

    Ok(response.map(|b| b.boxed()))
}
