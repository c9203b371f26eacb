//! Header rules for crossing the proxy boundary.

use hyper::HeaderMap;
use hyper::header::{HOST, HeaderName, HeaderValue, UPGRADE};

use super::ClientInfo;

/// Headers that only have meaning for a single transport hop.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Host header value for requests addressed to the sandbox agent.
pub const SANDBOX_HOST: &str = "hydra";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Whether a header must not be forwarded.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Whether the request asks to switch to the WebSocket protocol.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"))
}

/// Copy of `headers` without hop-by-hop headers and without `Host`.
///
/// Multi-valued headers keep every value, in order.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || name == HOST {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Copy of `headers` with only `Host` removed, for verbatim upgrade replay.
pub fn replay_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    out.remove(HOST);
    out
}

/// Set `Host` and the `X-Forwarded-*` headers on an upstream request.
pub fn set_proxy_headers(
    headers: &mut HeaderMap,
    client: &ClientInfo,
    original_host: Option<&HeaderValue>,
) {
    headers.insert(HOST, HeaderValue::from_static(SANDBOX_HOST));

    if let Ok(value) = HeaderValue::from_str(&client.remote_addr.ip().to_string()) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Some(host) = original_host {
        headers.insert(X_FORWARDED_HOST, host.clone());
    }
    let proto = if client.secure { "https" } else { "http" };
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));
}
