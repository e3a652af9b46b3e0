//! Proxy server: TCP listener, per-connection threads, routing, and lifecycle.
//!
//! `POST /proxy` (and `POST /`) runs one navigation through the pipeline and
//! answers with the packaged result. Every response closes the connection.

use crate::config::ProxyConfig;
use crate::package::ProxyResponse;
use crate::package::package;
use crate::package::package_failure;
use crate::pipeline::ProxyPipeline;
use ps_core::NavigationFailure;
use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;
use ps_ipc::FINAL_URL_HEADER;
use ps_ipc::PASSTHROUGH_HEADER;
use ps_ipc::ProxyRequest;
use ps_ipc::REWRITE_HEADER;
use ps_net::http::Header;
use ps_net::http::HttpMethod;
use ps_net::http::HttpStatusCode;
use ps_net::http::find_header_end;
use ps_net::http::header_contains;
use ps_net::http::header_value;
use ps_net::http::parse_content_length;
use ps_net::http::parse_header_lines;
use serde_json::json;
use std::io::Read;
use std::io::Write;
use std::net::Shutdown;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);
const RESPONSE_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);
const READ_CHUNK: usize = 8192;

/// Running proxy. Dropping the handle stops the accept loop.
pub struct ProxyHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ProxyHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The actual port the proxy is listening on.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stops accepting connections. In-flight requests finish on their own threads.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        // The accept call blocks; a throwaway connection wakes it up.
        let mut wake_addr = self.local_addr;
        if wake_addr.ip().is_unspecified() {
            wake_addr.set_ip(match wake_addr {
                SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
                SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
            });
        }
        let _ = TcpStream::connect_timeout(&wake_addr, WAKE_TIMEOUT);
    }

    /// Blocks until the accept loop exits.
    pub fn wait(mut self) {
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
    }
}

struct ServerState {
    config: ProxyConfig,
    pipeline: ProxyPipeline,
    active_connections: AtomicUsize,
}

/// Decrements the active connection count when the connection thread ends.
struct ConnectionSlot(Arc<ServerState>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.active_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Validates `config`, builds the pipeline, and starts listening.
pub fn start(config: ProxyConfig) -> PeriscopeResult<ProxyHandle> {
    config.validate()?;
    let pipeline = ProxyPipeline::new(&config)?;
    start_with_pipeline(config, pipeline)
}

pub fn start_with_pipeline(
    config: ProxyConfig,
    pipeline: ProxyPipeline,
) -> PeriscopeResult<ProxyHandle> {
    let bind_addr = config.socket_addr();
    let listener = TcpListener::bind(bind_addr).map_err(|error| {
        PeriscopeError::new(
            "proxy.bind_failed",
            format!("failed to bind {bind_addr}: {error}"),
        )
    })?;
    let local_addr = listener.local_addr().map_err(|error| {
        PeriscopeError::new(
            "proxy.bind_failed",
            format!("failed to read bound address for {bind_addr}: {error}"),
        )
    })?;

    info!(
        addr = %local_addr,
        max_connections = config.max_connections,
        "proxy listening"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let state = Arc::new(ServerState {
        config,
        pipeline,
        active_connections: AtomicUsize::new(0),
    });

    let loop_shutdown = Arc::clone(&shutdown);
    let accept_thread = std::thread::Builder::new()
        .name("periscope-accept".to_owned())
        .spawn(move || accept_loop(listener, state, loop_shutdown))
        .map_err(|error| {
            PeriscopeError::new(
                "proxy.spawn_failed",
                format!("failed to start accept thread: {error}"),
            )
        })?;

    Ok(ProxyHandle {
        local_addr,
        shutdown,
        accept_thread: Some(accept_thread),
    })
}

fn accept_loop(listener: TcpListener, state: Arc<ServerState>, shutdown: Arc<AtomicBool>) {
    for incoming in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let stream = match incoming {
            Ok(stream) => stream,
            Err(error) => {
                warn!(%error, "accept failed");
                continue;
            }
        };

        let max = state.config.max_connections;
        let current = state.active_connections.load(Ordering::SeqCst);
        if current >= max {
            warn!(current, max, "connection limit reached, rejecting");
            drop(stream);
            continue;
        }
        state.active_connections.fetch_add(1, Ordering::SeqCst);

        let slot = ConnectionSlot(Arc::clone(&state));
        let spawned = std::thread::Builder::new()
            .name("periscope-conn".to_owned())
            .spawn(move || {
                let state = Arc::clone(&slot.0);
                if let Err(error) = handle_connection(stream, &state) {
                    debug!(%error, "connection handler error");
                }
                drop(slot);
            });
        if let Err(error) = spawned {
            warn!(%error, "failed to spawn connection thread");
        }
    }

    info!("proxy server shutting down");
}

/// Parsed request head plus whatever body bytes arrived with it.
struct RequestHead {
    method: String,
    path: String,
    headers: Vec<Header>,
    body_prefix: Vec<u8>,
}

fn handle_connection(mut stream: TcpStream, state: &ServerState) -> PeriscopeResult<()> {
    let _ = stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT));
    let _ = stream.set_write_timeout(Some(RESPONSE_WRITE_TIMEOUT));
    let started = Instant::now();

    let head = match read_head(&mut stream, state.config.max_request_bytes) {
        Ok(Some(head)) => head,
        Ok(None) => return Ok(()),
        Err(response) => return finish(&mut stream, state, "-", "-", &response, started),
    };

    let response = route(&mut stream, state, &head);
    finish(&mut stream, state, &head.method, &head.path, &response, started)
}

fn finish(
    stream: &mut TcpStream,
    state: &ServerState,
    method: &str,
    path: &str,
    response: &ProxyResponse,
    started: Instant,
) -> PeriscopeResult<()> {
    let head_only = method == HttpMethod::Head.as_str();
    write_response(stream, response, &state.config.allowed_origin, head_only)?;
    info!(
        method,
        path,
        status = response.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "proxy request"
    );
    close_gracefully(stream);
    Ok(())
}

/// `Ok(None)` when the peer closed before sending anything.
fn read_head(stream: &mut TcpStream, limit: usize) -> Result<Option<RequestHead>, ProxyResponse> {
    let mut buffer = Vec::with_capacity(READ_CHUNK.min(limit));
    let mut chunk = [0_u8; READ_CHUNK];

    let head_end = loop {
        if let Some(end) = find_header_end(&buffer) {
            break end;
        }
        if buffer.len() > limit {
            return Err(ProxyResponse::error(413, "request head is too large"));
        }

        match stream.read(&mut chunk) {
            Ok(0) if buffer.is_empty() => return Ok(None),
            Ok(0) => return Err(ProxyResponse::error(400, "incomplete request head")),
            Ok(read) => buffer.extend_from_slice(&chunk[..read]),
            Err(error) => {
                debug!(%error, "failed to read request head");
                return Ok(None);
            }
        }
    };

    if head_end > limit {
        return Err(ProxyResponse::error(413, "request head is too large"));
    }

    let text = String::from_utf8_lossy(&buffer[..head_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ProxyResponse::error(400, "malformed request line"));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(ProxyResponse::error(400, "unsupported HTTP version"));
    }

    let headers = parse_header_lines(lines)
        .map_err(|error| ProxyResponse::error(400, error.message))?;
    let path = target.split('?').next().unwrap_or(target).to_owned();

    Ok(Some(RequestHead {
        method: method.to_owned(),
        path,
        headers,
        body_prefix: buffer[head_end..].to_vec(),
    }))
}

fn route(stream: &mut TcpStream, state: &ServerState, head: &RequestHead) -> ProxyResponse {
    let method = HttpMethod::parse(&head.method);
    if method == Some(HttpMethod::Options) {
        return ProxyResponse {
            status: 204,
            content_type: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
        };
    }

    match head.path.as_str() {
        "/healthz" => match method {
            Some(HttpMethod::Get | HttpMethod::Head) => {
                ProxyResponse::json(200, &json!({ "status": "ok" }))
            }
            _ => method_not_allowed(),
        },
        "/proxy" | "/" => match method {
            Some(HttpMethod::Post) => match read_body(stream, state, head) {
                Ok(body) => navigate(state, &body),
                Err(response) => response,
            },
            _ => method_not_allowed(),
        },
        _ => ProxyResponse::error(404, format!("no route for `{}`", head.path)),
    }
}

fn method_not_allowed() -> ProxyResponse {
    ProxyResponse::error(405, "method not allowed")
}

fn read_body(
    stream: &mut TcpStream,
    state: &ServerState,
    head: &RequestHead,
) -> Result<Vec<u8>, ProxyResponse> {
    if header_value(&head.headers, "transfer-encoding").is_some() {
        return Err(ProxyResponse::error(
            400,
            "request body must carry a Content-Length",
        ));
    }

    let length = parse_content_length(&head.headers)
        .map_err(|error| ProxyResponse::error(400, error.message))?
        .unwrap_or(0);
    if length > state.config.max_request_bytes {
        return Err(ProxyResponse::error(413, "request body is too large"));
    }

    let mut body = head.body_prefix.clone();
    body.truncate(length);
    if body.len() < length {
        if header_contains(&head.headers, "expect", "100-continue") {
            stream
                .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
                .map_err(|_| ProxyResponse::error(400, "connection closed"))?;
        }

        let mut rest = vec![0_u8; length - body.len()];
        stream
            .read_exact(&mut rest)
            .map_err(|_| ProxyResponse::error(400, "incomplete request body"))?;
        body.extend_from_slice(&rest);
    }

    Ok(body)
}

fn navigate(state: &ServerState, body: &[u8]) -> ProxyResponse {
    let request: ProxyRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(error) => {
            return ProxyResponse::error(
                400,
                format!("request body must be a JSON object with a `url` string: {error}"),
            );
        }
    };

    let input = request.url.clone();
    let intent = match request.into_intent() {
        Ok(intent) => intent,
        Err(error) => {
            return package_failure(&NavigationFailure::InvalidInput {
                input,
                reason: error.message,
            });
        }
    };

    debug!(url = %intent.url, method = ?intent.method, "proxying navigation");
    package(state.pipeline.run(intent.into_fetch_request()))
}

fn write_response(
    stream: &mut TcpStream,
    response: &ProxyResponse,
    allowed_origin: &str,
    head_only: bool,
) -> PeriscopeResult<()> {
    let reason = HttpStatusCode::new(response.status)
        .map(HttpStatusCode::canonical_reason)
        .unwrap_or_default();

    let mut head = format!("HTTP/1.1 {} {reason}\r\n", response.status);
    if response.status != 204 {
        head.push_str(&format!("Content-Type: {}\r\n", response.content_type));
        head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    }
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!("Access-Control-Allow-Origin: {allowed_origin}\r\n"));
    head.push_str("Access-Control-Allow-Methods: POST, GET, OPTIONS\r\n");
    head.push_str("Access-Control-Allow-Headers: Content-Type\r\n");
    head.push_str(&format!(
        "Access-Control-Expose-Headers: {FINAL_URL_HEADER}, {REWRITE_HEADER}, {PASSTHROUGH_HEADER}\r\n"
    ));
    if allowed_origin != "*" {
        head.push_str("Vary: Origin\r\n");
    }
    head.push_str("Connection: close\r\n\r\n");

    let write_error = |error: std::io::Error| {
        PeriscopeError::new(
            "proxy.write_failed",
            format!("failed to write response: {error}"),
        )
    };
    stream.write_all(head.as_bytes()).map_err(write_error)?;
    if !head_only && response.status != 204 {
        stream.write_all(&response.body).map_err(write_error)?;
    }
    stream.flush().map_err(write_error)
}

/// Half-closes and drains briefly so unread request bytes don't reset the
/// connection before the client reads the response.
fn close_gracefully(stream: &mut TcpStream) {
    let _ = stream.shutdown(Shutdown::Write);
    let _ = stream.set_read_timeout(Some(DRAIN_TIMEOUT));
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    let mut sink = [0_u8; READ_CHUNK];
    while Instant::now() < deadline {
        match stream.read(&mut sink) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}
