//! Handlers behind each API route.

use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};

use super::error::{ApiError, ApiResult};
use super::routes::{Route, match_route};
use crate::expose::{ExposeRequest, ExposedPort, ExposureRegistry, validate_port};
use crate::forward::{ClientInfo, ForwardTarget, ProxyBody, json_response, text_response};
use crate::session::SessionStore;

/// Largest accepted JSON request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Everything the handlers need, shared across connections.
pub struct ApiState {
    pub sessions: Arc<dyn SessionStore>,
    pub registry: Arc<ExposureRegistry>,
}

#[derive(Debug, Serialize)]
struct ListExposedResponse {
    session_id: String,
    exposed_ports: Vec<ExposedPort>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
}

/// Route and handle one API request.
///
/// Proxy routes are handed to the forwarder, which produces its own error
/// responses. Every other failure becomes a plain-text error response.
pub async fn handle<B>(
    req: Request<B>,
    state: Arc<ApiState>,
    client: ClientInfo,
    shutdown: watch::Receiver<bool>,
) -> Response<ProxyBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let result = match match_route(&method, &path) {
        Route::Proxy {
            session_id,
            port,
            path: rest,
        } => match parse_port(port) {
            Ok(port) => {
                let target = ForwardTarget::new(session_id, port, rest, req.uri().query());
                return state
                    .registry
                    .forwarder()
                    .forward(req, target, client, Some(shutdown))
                    .await;
            }
            Err(e) => Err(e),
        },
        Route::Expose { session_id } => expose(req, &state, session_id).await,
        Route::ListExposed { session_id } => list(&state, session_id).await,
        Route::Unexpose { session_id, port } => unexpose(&state, session_id, port).await,
        Route::Cleanup { session_id } => cleanup(&state, session_id).await,
        Route::MethodNotAllowed => Err(ApiError::MethodNotAllowed),
        Route::NotFound => Err(ApiError::NotFound(format!("No route for {}", path))),
    };

    result.unwrap_or_else(|e| {
        let status = e.status();
        if status.is_server_error() {
            error!("{} {} failed: {}", method, path, e);
        } else {
            debug!("{} {} rejected: {}", method, path, e);
        }
        text_response(status, e.to_string())
    })
}

async fn expose<B>(
    req: Request<B>,
    state: &ApiState,
    session_id: &str,
) -> ApiResult<Response<ProxyBody>>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    require_session(state, session_id).await?;

    let body = read_body(req.into_body()).await?;
    let request: ExposeRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let port = request.port()?;
    let protocol = request.protocol()?;
    let outcome = state
        .registry
        .expose(session_id, port, protocol, request.name())
        .await?;

    Ok(json_response(StatusCode::OK, &outcome))
}

async fn list(state: &ApiState, session_id: &str) -> ApiResult<Response<ProxyBody>> {
    require_session(state, session_id).await?;

    Ok(json_response(
        StatusCode::OK,
        &ListExposedResponse {
            session_id: session_id.to_string(),
            exposed_ports: state.registry.list(session_id),
        },
    ))
}

async fn unexpose(
    state: &ApiState,
    session_id: &str,
    port: &str,
) -> ApiResult<Response<ProxyBody>> {
    let port = parse_port(port)?;
    require_session(state, session_id).await?;

    state.registry.unexpose(session_id, port)?;
    Ok(json_response(
        StatusCode::OK,
        &StatusResponse { status: "removed" },
    ))
}

async fn cleanup(state: &ApiState, session_id: &str) -> ApiResult<Response<ProxyBody>> {
    let report = state.registry.cleanup(session_id).await;
    Ok(json_response(StatusCode::OK, &report))
}

async fn require_session(state: &ApiState, session_id: &str) -> ApiResult<()> {
    state
        .sessions
        .get_session(session_id)
        .await
        .map(|_| ())
        .ok_or_else(|| ApiError::session_not_found(session_id))
}

fn parse_port(raw: &str) -> ApiResult<u16> {
    let port = raw
        .parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("invalid port: {}", raw)))?;
    Ok(validate_port(port)?)
}

async fn read_body<B>(body: B) -> ApiResult<Bytes>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {}", e)))
}
