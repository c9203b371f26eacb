//! End-to-end forwarding through the API server and dedicated-port listeners
//! into a fake in-process sandbox agent.
//!
//! The fake agent is a TCP server registered in the device directory. It
//! answers based on the request path:
//!
//! - `.../ws-echo`: 101, then echoes raw bytes
//! - `.../ws-deny`: 403 with an `X-Reason` header
//! - anything else: 200 with the received request head as the body

use sandbox_portal::api::{ApiServer, ApiState};
use sandbox_portal::expose::{ExposureRegistry, PortRange, Protocol, RegistrySettings, UrlBuilder};
use sandbox_portal::forward::Forwarder;
use sandbox_portal::session::{InMemorySessionStore, SessionRecord, SessionStore};
use sandbox_portal::telemetry::AuditLogger;
use sandbox_portal::tunnel::{DeviceDirectory, DialBridge, device_id};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

struct Portal {
    api_addr: SocketAddr,
    registry: Arc<ExposureRegistry>,
    _shutdown: watch::Sender<bool>,
}

/// Start a portal with three sessions:
///
/// - `sess-1` bound to `sbx-1`, whose agent is the fake sandbox
/// - `sess-2` bound to `sbx-offline`, which never registered
/// - `sess-3` with no sandbox
async fn start_portal(pool_start: u16, pool_end: u16) -> Portal {
    let sandbox = spawn_fake_sandbox().await;
    let directory = Arc::new(DeviceDirectory::new());
    directory.register(device_id("sbx-1"), sandbox);

    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::with_sessions(vec![
        SessionRecord::new("sess-1", Some("sbx-1".to_string())),
        SessionRecord::new("sess-2", Some("sbx-offline".to_string())),
        SessionRecord::new("sess-3", None),
    ]));
    let forwarder = Arc::new(Forwarder::new(
        sessions.clone(),
        DialBridge::new(directory, DIAL_TIMEOUT),
    ));
    let registry = Arc::new(ExposureRegistry::new(
        RegistrySettings {
            urls: UrlBuilder::new("http://localhost:8080", None),
            dedicated_ports: true,
            port_range: PortRange::new(pool_start, pool_end).unwrap(),
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            shutdown_grace: Duration::from_millis(200),
        },
        forwarder,
        Arc::new(AuditLogger::new_null()),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(ApiState {
        sessions,
        registry: registry.clone(),
    });
    let server = ApiServer::bind((Ipv4Addr::LOCALHOST, 0).into(), state, shutdown_rx)
        .await
        .unwrap();
    let api_addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    Portal {
        api_addr,
        registry,
        _shutdown: shutdown_tx,
    }
}

async fn spawn_fake_sandbox() -> SocketAddr {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_sandbox_connection(stream));
        }
    });
    addr
}

async fn serve_sandbox_connection(mut stream: TcpStream) {
    let head = read_head(&mut stream).await;
    let request_line = head.lines().next().unwrap_or_default().to_string();

    if request_line.contains("/ws-echo") {
        stream
            .write_all(
                b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
            )
            .await
            .unwrap();
        let (mut reader, mut writer) = stream.split();
        let _ = tokio::io::copy(&mut reader, &mut writer).await;
    } else if request_line.contains("/ws-deny") {
        stream
            .write_all(b"HTTP/1.1 403 Forbidden\r\nX-Reason: nope\r\nContent-Length: 6\r\n\r\ndenied")
            .await
            .unwrap();
    } else {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
            head.len(),
            head
        );
        stream.write_all(response.as_bytes()).await.unwrap();
    }
}

/// Read one HTTP message head, byte by byte so nothing past it is consumed.
async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// Read a response with a `Content-Length` body.
async fn read_response(stream: &mut TcpStream) -> (String, String) {
    let head = read_head(stream).await;
    let length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.unwrap();
    (head, String::from_utf8(body).unwrap())
}

async fn send(addr: SocketAddr, request: &str) -> (String, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    read_response(&mut stream).await
}

async fn connect_when_bound(addr: SocketAddr) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("listener on {} never came up", addr);
}

#[tokio::test]
async fn path_route_strips_hop_by_hop_headers() {
    let portal = start_portal(47200, 47201).await;

    let (head, body) = send(
        portal.api_addr,
        "GET /api/v1/sessions/sess-1/proxy/8080/app/index.html?x=1 HTTP/1.1\r\n\
         Host: portal.example.com\r\n\
         Connection: keep-alive\r\n\
         Keep-Alive: timeout=5\r\n\
         Proxy-Authorization: Basic c2VjcmV0\r\n\
         X-Custom: yes\r\n\r\n",
    )
    .await;

    assert!(head.starts_with("HTTP/1.1 200"), "got: {}", head);
    let forwarded = body.to_ascii_lowercase();
    assert!(
        forwarded.starts_with("get /api/v1/dev-containers/sess-1/proxy/8080/app/index.html?x=1 http/1.1"),
        "got: {}",
        body
    );
    assert!(forwarded.contains("host: hydra\r\n"));
    assert!(forwarded.contains("x-custom: yes\r\n"));
    assert!(forwarded.contains("x-forwarded-for: 127.0.0.1\r\n"));
    assert!(forwarded.contains("x-forwarded-host: portal.example.com\r\n"));
    assert!(forwarded.contains("x-forwarded-proto: http\r\n"));
    assert!(!forwarded.contains("keep-alive"));
    assert!(!forwarded.contains("proxy-authorization"));
}

#[tokio::test]
async fn path_route_without_remainder_targets_root() {
    let portal = start_portal(47202, 47203).await;

    let (head, body) = send(
        portal.api_addr,
        "GET /api/v1/sessions/sess-1/proxy/3000?tab=2 HTTP/1.1\r\nHost: portal\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(head.starts_with("HTTP/1.1 200"), "got: {}", head);
    assert!(
        body.starts_with("GET /api/v1/dev-containers/sess-1/proxy/3000/?tab=2 HTTP/1.1"),
        "got: {}",
        body
    );
}

#[tokio::test]
async fn dedicated_port_forwards_without_prefix() {
    let portal = start_portal(47204, 47206).await;

    let outcome = portal
        .registry
        .expose("sess-1", 8080, Protocol::Http, None)
        .await
        .unwrap();
    let allocated = outcome.allocated_port.unwrap();
    assert_eq!(outcome.primary_url(), Some(format!("http://localhost:{}", allocated).as_str()));

    let mut stream = connect_when_bound((Ipv4Addr::LOCALHOST, allocated).into()).await;
    stream
        .write_all(b"GET /api/data?page=3 HTTP/1.1\r\nHost: localhost\r\nTE: trailers\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = read_response(&mut stream).await;

    assert!(head.starts_with("HTTP/1.1 200"), "got: {}", head);
    let forwarded = body.to_ascii_lowercase();
    assert!(
        forwarded.starts_with("get /api/v1/dev-containers/sess-1/proxy/8080/api/data?page=3 http/1.1"),
        "got: {}",
        body
    );
    assert!(!forwarded.contains("\r\nte:"));

    portal.registry.cleanup("sess-1").await;
    assert!(TcpStream::connect((Ipv4Addr::LOCALHOST, allocated)).await.is_err());
}

#[tokio::test]
async fn refused_websocket_upgrade_returns_upstream_response() {
    let portal = start_portal(47207, 47208).await;

    let mut stream = TcpStream::connect(portal.api_addr).await.unwrap();
    stream
        .write_all(
            b"GET /api/v1/sessions/sess-1/proxy/5173/ws-deny HTTP/1.1\r\n\
              Host: portal\r\n\
              Connection: Upgrade\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Version: 13\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .unwrap();
    let (head, body) = read_response(&mut stream).await;

    assert!(head.starts_with("HTTP/1.1 403"), "got: {}", head);
    let lower = head.to_ascii_lowercase();
    assert!(lower.contains("x-reason: nope"));
    assert!(lower.contains("connection: close"));
    assert_eq!(body, "denied");

    // The exchange is over: a second request on the same socket is not served.
    let _ = stream
        .write_all(b"GET /api/v1/sessions/sess-1/proxy/8080/ HTTP/1.1\r\nHost: portal\r\n\r\n")
        .await;
    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
        .await
        .expect("connection should be closed");
    assert!(read.map_or(true, |n| n == 0), "second request was served");
}

#[tokio::test]
async fn websocket_upgrade_relays_bytes() {
    let portal = start_portal(47209, 47210).await;

    let mut stream = TcpStream::connect(portal.api_addr).await.unwrap();
    stream
        .write_all(
            b"GET /api/v1/sessions/sess-1/proxy/5173/ws-echo HTTP/1.1\r\n\
              Host: portal\r\n\
              Connection: Upgrade\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Version: 13\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .unwrap();

    let head = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 101"), "got: {}", head);

    stream.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut echoed))
        .await
        .expect("echo within timeout")
        .unwrap();
    assert_eq!(&echoed, b"ping");
}

#[tokio::test]
async fn unregistered_device_fails_within_dial_timeout() {
    let portal = start_portal(47211, 47212).await;

    let (head, _) = tokio::time::timeout(
        DIAL_TIMEOUT + Duration::from_secs(1),
        send(
            portal.api_addr,
            "GET /api/v1/sessions/sess-2/proxy/8080/ HTTP/1.1\r\nHost: portal\r\nConnection: close\r\n\r\n",
        ),
    )
    .await
    .expect("response within the dial timeout");

    assert!(head.starts_with("HTTP/1.1 503"), "got: {}", head);
}

#[tokio::test]
async fn session_without_sandbox_is_unavailable() {
    let portal = start_portal(47213, 47214).await;

    let (head, body) = send(
        portal.api_addr,
        "GET /api/v1/sessions/sess-3/proxy/8080/ HTTP/1.1\r\nHost: portal\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(head.starts_with("HTTP/1.1 503"), "got: {}", head);
    assert!(body.contains("no sandbox"));
}

#[tokio::test]
async fn expose_over_http_then_list() {
    let portal = start_portal(47215, 47216).await;

    let payload = r#"{"port": 8080, "protocol": "http", "name": "web"}"#;
    let (head, body) = send(
        portal.api_addr,
        &format!(
            "POST /api/v1/sessions/sess-1/expose HTTP/1.1\r\nHost: portal\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            payload.len(),
            payload
        ),
    )
    .await;
    assert!(head.starts_with("HTTP/1.1 200"), "got: {}", head);
    let outcome: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(outcome["allocated_port"], 47215);
    assert_eq!(outcome["urls"].as_array().unwrap().len(), 2);

    let (head, body) = send(
        portal.api_addr,
        "GET /api/v1/sessions/sess-1/expose HTTP/1.1\r\nHost: portal\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(head.starts_with("HTTP/1.1 200"), "got: {}", head);
    let listed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(listed["exposed_ports"][0]["port"], 8080);
    assert_eq!(listed["exposed_ports"][0]["status"], "active");

    let (head, _) = send(
        portal.api_addr,
        "DELETE /api/v1/sessions/sess-1/expose HTTP/1.1\r\nHost: portal\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(head.starts_with("HTTP/1.1 200"), "got: {}", head);
    assert_eq!(portal.registry.listener_count(), 0);
}
