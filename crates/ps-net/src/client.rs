//! HTTP/1.1 client built on DNS, transport, TLS, and pooling contracts.
//!
//! One client is shared by every navigation worker: `execute` takes `&self`
//! and the pool synchronises internally.

use crate::PreparedRequest;
use crate::dns::DnsResolver;
use crate::dns::GuardedDnsResolver;
use crate::http::Header;
use crate::http::HttpMethod;
use crate::http::HttpRequest;
use crate::http::HttpResponse;
use crate::http::HttpStatusCode;
use crate::http::HttpVersion;
use crate::http::find_header_end;
use crate::http::header_contains;
use crate::http::parse_content_length;
use crate::http::parse_header_lines;
use crate::pool::ConnectionKey;
use crate::pool::ConnectionPool;
use crate::pool::InMemoryConnectionPool;
use crate::pool::PoolStats;
use crate::tls::TlsPolicy;
use crate::tls_backend::RustlsTlsAdapter;
use crate::tls_backend::TlsBackendAdapter;
use crate::transport::BoxedIoStream;
use crate::transport::IoStream;
use crate::transport::TcpTransport;
use crate::transport::Transport;
use brotli::Decompressor;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;
use std::io;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;

const MAX_RESPONSE_HEAD_BYTES: usize = 128 * 1024;
const MAX_CHUNK_LINE_BYTES: usize = 8 * 1024;
const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// HTTP/1.1 client with pluggable resolver/transport/pool/tls backend.
pub struct Http11Client<
    R = GuardedDnsResolver,
    T = TcpTransport,
    P = InMemoryConnectionPool,
    A = RustlsTlsAdapter,
> where
    R: DnsResolver,
    T: Transport,
    P: ConnectionPool,
    A: TlsBackendAdapter,
{
    dns: R,
    transport: T,
    pool: P,
    tls_adapter: A,
    tls_policy: TlsPolicy,
    connect_timeout: Duration,
    max_body_bytes: usize,
}

impl Http11Client {
    /// Client with the system resolver behind the private-target guard.
    pub fn new(tls_policy: TlsPolicy, allow_private_targets: bool) -> PeriscopeResult<Self> {
        let tls_adapter = RustlsTlsAdapter::new(&tls_policy)?;
        Self::with_parts(
            GuardedDnsResolver::system(allow_private_targets),
            TcpTransport,
            InMemoryConnectionPool::default(),
            tls_adapter,
            tls_policy,
        )
    }
}

impl<R, T, P, A> Http11Client<R, T, P, A>
where
    R: DnsResolver,
    T: Transport,
    P: ConnectionPool,
    A: TlsBackendAdapter,
{
    pub fn with_parts(
        dns: R,
        transport: T,
        pool: P,
        tls_adapter: A,
        tls_policy: TlsPolicy,
    ) -> PeriscopeResult<Self> {
        tls_policy.validate()?;
        Ok(Self {
            dns,
            transport,
            pool,
            tls_adapter,
            tls_policy,
            connect_timeout: Duration::from_secs(10),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    pub fn set_max_body_bytes(&mut self, limit: usize) {
        self.max_body_bytes = limit;
    }

    pub fn tls_policy(&self) -> &TlsPolicy {
        &self.tls_policy
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Sends one request and reads one response, failing once `deadline` passes.
    pub fn execute(
        &self,
        prepared: &PreparedRequest,
        deadline: Instant,
    ) -> PeriscopeResult<HttpResponse> {
        validate_prepared_request(prepared)?;

        let key = ConnectionKey::from_url(&prepared.request.url);
        if let Some(pooled) = self.pool.checkout(&key) {
            match self.exchange(pooled, &key, prepared, deadline) {
                Ok(response) => return Ok(response),
                Err(error) if is_stale_connection_error(&error) => {
                    debug!(host = %key.host, code = error.code, "pooled connection went stale; reconnecting");
                }
                Err(error) => return Err(error),
            }
        }

        let stream = self.open_stream(prepared, deadline)?;
        self.exchange(stream, &key, prepared, deadline)
    }

    fn exchange(
        &self,
        mut stream: BoxedIoStream,
        key: &ConnectionKey,
        prepared: &PreparedRequest,
        deadline: Instant,
    ) -> PeriscopeResult<HttpResponse> {
        let outcome = {
            let mut io = DeadlineIo::new(&mut *stream, deadline);
            write_request(&mut io, &prepared.request)?;
            read_response(&mut io, &prepared.request, self.max_body_bytes)?
        };

        if outcome.reusable {
            self.pool.checkin(key.clone(), stream);
        }

        Ok(outcome.response)
    }

    fn open_stream(
        &self,
        prepared: &PreparedRequest,
        deadline: Instant,
    ) -> PeriscopeResult<BoxedIoStream> {
        let remaining = remaining_until(deadline)?;
        let host = prepared.request.url.host();
        let port = prepared.request.url.port();
        let addresses = self.dns.resolve(host, port)?;

        let timeout = self.connect_timeout.min(remaining);
        let stream = connect_first_available(&self.transport, &addresses, timeout)?;
        match &prepared.tls {
            Some(handshake) => self.tls_adapter.connect_tls(stream, handshake),
            None => Ok(Box::new(stream)),
        }
    }
}

fn validate_prepared_request(prepared: &PreparedRequest) -> PeriscopeResult<()> {
    if prepared.request.url.is_secure() && prepared.tls.is_none() {
        return Err(PeriscopeError::new(
            "net.http.tls_missing",
            "HTTPS request is missing TLS handshake configuration",
        ));
    }

    if !prepared.request.url.is_secure() && prepared.tls.is_some() {
        return Err(PeriscopeError::new(
            "net.http.tls_unexpected",
            "non-HTTPS request must not include TLS handshake configuration",
        ));
    }

    Ok(())
}

fn remaining_until(deadline: Instant) -> PeriscopeResult<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(PeriscopeError::new(
            "net.http.deadline_exceeded",
            "request deadline elapsed before the exchange completed",
        ));
    }

    Ok(remaining)
}

// A keep-alive peer may close an idle connection at any time; only failures
// before any response byte arrived are safe to retry.
fn is_stale_connection_error(error: &PeriscopeError) -> bool {
    matches!(
        error.code,
        "net.http.write_failed" | "net.http.flush_failed" | "net.http.unexpected_eof"
    )
}

fn connect_first_available<T: Transport>(
    transport: &T,
    addresses: &[SocketAddr],
    timeout: Duration,
) -> PeriscopeResult<TcpStream> {
    let mut last_error: Option<PeriscopeError> = None;

    for address in addresses {
        match transport.connect(*address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                last_error = Some(error);
            }
        }
    }

    match last_error {
        Some(error) => Err(error),
        None => Err(PeriscopeError::new(
            "net.transport.no_addresses",
            "no addresses available to open a connection",
        )),
    }
}

/// Per-exchange view of a stream that refuses I/O once the deadline passes.
struct DeadlineIo<'a> {
    inner: &'a mut dyn IoStream,
    deadline: Instant,
}

impl<'a> DeadlineIo<'a> {
    fn new(inner: &'a mut dyn IoStream, deadline: Instant) -> Self {
        Self { inner, deadline }
    }

    fn check(&self) -> io::Result<()> {
        if Instant::now() >= self.deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "fetch deadline exceeded",
            ));
        }

        Ok(())
    }
}

impl Read for DeadlineIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.read(buf)
    }
}

impl Write for DeadlineIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        self.inner.flush()
    }
}

fn write_request(stream: &mut dyn Write, request: &HttpRequest) -> PeriscopeResult<()> {
    let mut encoded = Vec::new();
    encoded.extend_from_slice(request.method.as_str().as_bytes());
    encoded.push(b' ');
    encoded.extend_from_slice(request.request_target().as_bytes());
    encoded.push(b' ');
    encoded.extend_from_slice(request.version.as_str().as_bytes());
    encoded.extend_from_slice(b"\r\n");

    for header in &request.headers {
        encoded.extend_from_slice(header.name.as_bytes());
        encoded.extend_from_slice(b": ");
        encoded.extend_from_slice(header.value.as_bytes());
        encoded.extend_from_slice(b"\r\n");
    }
    encoded.extend_from_slice(b"\r\n");
    encoded.extend_from_slice(&request.body);

    stream.write_all(&encoded).map_err(|error| {
        PeriscopeError::new(
            "net.http.write_failed",
            format!("failed to write HTTP request bytes: {error}"),
        )
    })?;
    stream.flush().map_err(|error| {
        PeriscopeError::new(
            "net.http.flush_failed",
            format!("failed to flush HTTP request bytes: {error}"),
        )
    })?;

    Ok(())
}

struct ResponseReadOutcome {
    response: HttpResponse,
    reusable: bool,
}

fn read_response(
    stream: &mut dyn Read,
    request: &HttpRequest,
    max_body_bytes: usize,
) -> PeriscopeResult<ResponseReadOutcome> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let mut header_end: Option<usize> = None;

    while header_end.is_none() {
        let read = stream.read(&mut chunk).map_err(|error| {
            PeriscopeError::new(
                "net.http.read_head_failed",
                format!("failed while reading HTTP response head: {error}"),
            )
        })?;

        if read == 0 {
            return Err(PeriscopeError::new(
                "net.http.unexpected_eof",
                "unexpected EOF before response head completed",
            ));
        }

        buffer.extend_from_slice(&chunk[..read]);
        header_end = find_header_end(&buffer);
        if header_end.is_none() && buffer.len() > MAX_RESPONSE_HEAD_BYTES {
            return Err(PeriscopeError::new(
                "net.http.head_too_large",
                format!("HTTP response head exceeds {MAX_RESPONSE_HEAD_BYTES} bytes"),
            ));
        }
    }

    let header_end = match header_end {
        Some(value) => value,
        None => {
            return Err(PeriscopeError::new(
                "net.http.header_terminator_missing",
                "response head terminator not found",
            ));
        }
    };

    let head_bytes = &buffer[..header_end];
    let mut body_bytes = buffer[header_end..].to_vec();
    let head_text = std::str::from_utf8(head_bytes).map_err(|error| {
        PeriscopeError::new(
            "net.http.head_invalid_utf8",
            format!("HTTP response head is not valid UTF-8 text: {error}"),
        )
    })?;

    let mut lines = head_text.split("\r\n");
    let status_line = lines.next().ok_or_else(|| {
        PeriscopeError::new("net.http.status_line_missing", "missing HTTP status line")
    })?;
    let (version, status, reason) = parse_status_line(status_line)?;
    let headers = parse_header_lines(lines)?;

    let has_transfer_encoding = headers
        .iter()
        .any(|header| header.name.eq_ignore_ascii_case("transfer-encoding"));
    let has_chunked_transfer = header_contains(&headers, "transfer-encoding", "chunked");
    if has_transfer_encoding && !has_chunked_transfer {
        return Err(PeriscopeError::new(
            "net.http.transfer_encoding_unsupported",
            "only chunked transfer encoding is supported",
        ));
    }

    let content_length = if has_chunked_transfer {
        None
    } else {
        parse_content_length(&headers)?
    };
    let has_no_body = request.method == HttpMethod::Head || status_disallows_body(status.as_u16());

    let reusable = if has_no_body {
        true
    } else if has_chunked_transfer {
        body_bytes = read_chunked_body(stream, body_bytes, max_body_bytes)?;
        true
    } else if let Some(len) = content_length {
        ensure_within_limit(len, max_body_bytes)?;
        if body_bytes.len() < len {
            let remaining = len - body_bytes.len();
            let mut rest = vec![0_u8; remaining];
            stream.read_exact(&mut rest).map_err(|error| {
                PeriscopeError::new(
                    "net.http.read_body_failed",
                    format!("failed to read HTTP body bytes: {error}"),
                )
            })?;
            body_bytes.extend_from_slice(&rest);
        } else if body_bytes.len() > len {
            body_bytes.truncate(len);
        }

        true
    } else {
        // No framing: the body runs until the peer closes the connection.
        body_bytes = read_until_close(stream, body_bytes, max_body_bytes)?;
        false
    };

    if !has_no_body {
        body_bytes = decode_content_encoding(&headers, &body_bytes, max_body_bytes)?;
    }

    let response = HttpResponse {
        version,
        status,
        reason,
        headers,
        body: if has_no_body { Vec::new() } else { body_bytes },
    };

    Ok(ResponseReadOutcome {
        reusable: reusable && is_keep_alive(request, &response),
        response,
    })
}

fn ensure_within_limit(len: usize, max_body_bytes: usize) -> PeriscopeResult<()> {
    if len > max_body_bytes {
        return Err(PeriscopeError::new(
            "net.http.body_too_large",
            format!("response body exceeds the {max_body_bytes}-byte limit"),
        ));
    }

    Ok(())
}

fn read_until_close(
    stream: &mut dyn Read,
    mut body: Vec<u8>,
    max_body_bytes: usize,
) -> PeriscopeResult<Vec<u8>> {
    let mut chunk = [0_u8; 8192];
    loop {
        ensure_within_limit(body.len(), max_body_bytes)?;
        match stream.read(&mut chunk) {
            Ok(0) => return Ok(body),
            Ok(read) => body.extend_from_slice(&chunk[..read]),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            // TLS peers frequently close without close_notify once the body is sent.
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return Ok(body),
            Err(error) => {
                return Err(PeriscopeError::new(
                    "net.http.read_body_failed",
                    format!("failed while draining connection-close response body: {error}"),
                ));
            }
        }
    }
}

struct PrefixedStreamReader<'a> {
    prefetched: Vec<u8>,
    offset: usize,
    stream: &'a mut dyn Read,
}

impl<'a> PrefixedStreamReader<'a> {
    fn new(stream: &'a mut dyn Read, prefetched: Vec<u8>) -> Self {
        Self {
            prefetched,
            offset: 0,
            stream,
        }
    }

    fn read_exact_into(
        &mut self,
        out: &mut [u8],
        code: &'static str,
        detail: &str,
    ) -> PeriscopeResult<()> {
        let available = self.prefetched.len().saturating_sub(self.offset);
        let prefix_take = available.min(out.len());

        if prefix_take > 0 {
            out[..prefix_take]
                .copy_from_slice(&self.prefetched[self.offset..self.offset + prefix_take]);
            self.offset += prefix_take;
        }

        if prefix_take < out.len() {
            self.stream
                .read_exact(&mut out[prefix_take..])
                .map_err(|error| PeriscopeError::new(code, format!("{detail}: {error}")))?;
        }

        Ok(())
    }
}

fn read_chunked_body(
    stream: &mut dyn Read,
    prefetched: Vec<u8>,
    max_body_bytes: usize,
) -> PeriscopeResult<Vec<u8>> {
    let mut reader = PrefixedStreamReader::new(stream, prefetched);
    let mut decoded = Vec::new();

    loop {
        let size_line = read_crlf_line(&mut reader)?;
        if size_line.is_empty() {
            continue;
        }

        let size_token = size_line.split(';').next().unwrap_or_default().trim();
        let chunk_size = usize::from_str_radix(size_token, 16).map_err(|error| {
            PeriscopeError::new(
                "net.http.chunk_size_invalid",
                format!("invalid chunk size `{size_token}`: {error}"),
            )
        })?;

        if chunk_size == 0 {
            drain_chunk_trailers(&mut reader)?;
            break;
        }

        let start = decoded.len();
        ensure_within_limit(start.saturating_add(chunk_size), max_body_bytes)?;
        decoded.resize(start + chunk_size, 0);
        reader.read_exact_into(
            &mut decoded[start..],
            "net.http.read_body_failed",
            "failed while reading chunked HTTP body bytes",
        )?;

        let mut terminator = [0_u8; 2];
        reader.read_exact_into(
            &mut terminator,
            "net.http.read_body_failed",
            "failed while reading chunked body terminator",
        )?;
        if terminator != *b"\r\n" {
            return Err(PeriscopeError::new(
                "net.http.chunk_terminator_invalid",
                "chunk data is missing trailing CRLF",
            ));
        }
    }

    Ok(decoded)
}

fn drain_chunk_trailers(reader: &mut PrefixedStreamReader<'_>) -> PeriscopeResult<()> {
    loop {
        let line = read_crlf_line(reader)?;
        if line.is_empty() {
            break;
        }

        if line.split_once(':').is_none() {
            return Err(PeriscopeError::new(
                "net.http.chunk_trailer_invalid",
                format!("invalid chunk trailer line `{line}`"),
            ));
        }
    }

    Ok(())
}

fn read_crlf_line(reader: &mut PrefixedStreamReader<'_>) -> PeriscopeResult<String> {
    let mut line = Vec::new();

    loop {
        let mut byte = [0_u8; 1];
        reader.read_exact_into(
            &mut byte,
            "net.http.read_body_failed",
            "failed while reading chunked transfer line",
        )?;
        line.push(byte[0]);

        if line.len() > MAX_CHUNK_LINE_BYTES {
            return Err(PeriscopeError::new(
                "net.http.chunk_line_too_large",
                format!("chunk metadata line exceeds {MAX_CHUNK_LINE_BYTES} bytes"),
            ));
        }

        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            return String::from_utf8(line).map_err(|error| {
                PeriscopeError::new(
                    "net.http.chunk_line_invalid_utf8",
                    format!("chunk metadata line is not valid UTF-8: {error}"),
                )
            });
        }
    }
}

fn parse_status_line(line: &str) -> PeriscopeResult<(HttpVersion, HttpStatusCode, String)> {
    let mut parts = line.splitn(3, ' ');
    let version_text = parts.next().unwrap_or_default();
    let code_text = parts.next().ok_or_else(|| {
        PeriscopeError::new(
            "net.http.status_line_invalid",
            format!("missing status code in status line `{line}`"),
        )
    })?;
    let reason = parts.next().unwrap_or_default().trim().to_owned();

    let version = HttpVersion::parse(version_text).ok_or_else(|| {
        PeriscopeError::new(
            "net.http.version_unsupported",
            format!("unsupported response version `{version_text}`"),
        )
    })?;

    let code_value = code_text.parse::<u16>().map_err(|error| {
        PeriscopeError::new(
            "net.http.status_line_invalid",
            format!("invalid status code `{code_text}`: {error}"),
        )
    })?;

    let code = HttpStatusCode::new(code_value)?;
    Ok((version, code, reason))
}

fn status_disallows_body(status_code: u16) -> bool {
    (100..200).contains(&status_code) || status_code == 204 || status_code == 304
}

fn is_keep_alive(request: &HttpRequest, response: &HttpResponse) -> bool {
    if request
        .header("Connection")
        .is_some_and(|value| value.eq_ignore_ascii_case("close"))
    {
        return false;
    }

    if header_contains(&response.headers, "connection", "close") {
        return false;
    }

    match response.version {
        HttpVersion::Http10 => header_contains(&response.headers, "connection", "keep-alive"),
        HttpVersion::Http11 => true,
    }
}

fn decode_content_encoding(
    headers: &[Header],
    body: &[u8],
    max_body_bytes: usize,
) -> PeriscopeResult<Vec<u8>> {
    let encodings = content_encodings(headers);
    if encodings.is_empty() {
        return Ok(body.to_vec());
    }

    let mut decoded = body.to_vec();
    for encoding in encodings.iter().rev() {
        decoded = match encoding.as_str() {
            "identity" => decoded,
            "gzip" | "x-gzip" => {
                read_capped(GzDecoder::new(Cursor::new(&decoded)), "gzip", max_body_bytes)?
            }
            "deflate" => decode_deflate(&decoded, max_body_bytes)?,
            "br" => read_capped(
                Decompressor::new(Cursor::new(&decoded), 4096),
                "brotli",
                max_body_bytes,
            )?,
            _ => {
                return Err(PeriscopeError::new(
                    "net.http.content_encoding_unsupported",
                    format!("unsupported content encoding `{encoding}`"),
                ));
            }
        };
    }

    Ok(decoded)
}

fn content_encodings(headers: &[Header]) -> Vec<String> {
    let mut encodings = Vec::new();
    for header in headers {
        if !header.name.eq_ignore_ascii_case("content-encoding") {
            continue;
        }

        for token in header.value.split(',') {
            let value = token.trim().to_ascii_lowercase();
            if !value.is_empty() {
                encodings.push(value);
            }
        }
    }

    encodings
}

/// Decompresses at most `max_body_bytes`; anything larger is rejected.
fn read_capped(decoder: impl Read, label: &str, max_body_bytes: usize) -> PeriscopeResult<Vec<u8>> {
    let limit = u64::try_from(max_body_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let mut decoded = Vec::new();
    decoder
        .take(limit)
        .read_to_end(&mut decoded)
        .map_err(|error| {
            PeriscopeError::new(
                "net.http.decode_failed",
                format!("{label} decode failed: {error}"),
            )
        })?;
    ensure_within_limit(decoded.len(), max_body_bytes)?;
    Ok(decoded)
}

fn decode_deflate(body: &[u8], max_body_bytes: usize) -> PeriscopeResult<Vec<u8>> {
    if let Ok(decoded) = read_capped(ZlibDecoder::new(Cursor::new(body)), "zlib", max_body_bytes) {
        return Ok(decoded);
    }

    read_capped(
        DeflateDecoder::new(Cursor::new(body)),
        "deflate",
        max_body_bytes,
    )
}

#[cfg(test)]
mod tests {
    use super::Http11Client;
    use super::decode_content_encoding;
    use super::parse_status_line;
    use super::read_chunked_body;
    use super::read_response;
    use super::status_disallows_body;
    use crate::PreparedRequest;
    use crate::dns::GuardedDnsResolver;
    use crate::http::Header;
    use crate::http::HttpMethod;
    use crate::http::HttpRequest;
    use crate::pool::InMemoryConnectionPool;
    use crate::tls::TlsPolicy;
    use crate::tls_backend::RustlsTlsAdapter;
    use crate::transport::TcpTransport;
    use crate::url::TargetUrl;
    use brotli::CompressorWriter;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use flate2::write::ZlibEncoder;
    use std::io::Cursor;
    use std::io::Read;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;
    use std::time::Instant;

    const LIMIT: usize = 1024 * 1024;

    fn get_request(input: &str) -> HttpRequest {
        let url = match TargetUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        match HttpRequest::builder(HttpMethod::Get, url).build() {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn header(name: &str, value: &str) -> Header {
        match Header::new(name, value) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn local_client() -> Http11Client {
        let policy = TlsPolicy::default();
        let adapter = match RustlsTlsAdapter::new(&policy) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let client = Http11Client::with_parts(
            GuardedDnsResolver::system(true),
            TcpTransport,
            InMemoryConnectionPool::default(),
            adapter,
            policy,
        );
        match client {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn status_line_parser_keeps_reason_phrase() {
        let parsed = parse_status_line("HTTP/1.1 404 Not Found");
        assert!(parsed.is_ok());
        if let Ok((_, status, reason)) = parsed {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(reason, "Not Found");
        }

        let bare = parse_status_line("HTTP/1.0 200");
        assert!(matches!(bare, Ok((_, _, ref reason)) if reason.is_empty()));
        assert!(parse_status_line("HTTP/2 200 OK").is_err());
    }

    #[test]
    fn detects_bodyless_status_codes() {
        assert!(status_disallows_body(101));
        assert!(status_disallows_body(204));
        assert!(status_disallows_body(304));
        assert!(!status_disallows_body(200));
    }

    #[test]
    fn decodes_chunked_body() {
        let prefetched = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n".to_vec();
        let mut stream = Cursor::new(Vec::<u8>::new());
        let decoded = read_chunked_body(&mut stream, prefetched, LIMIT);
        assert_eq!(decoded, Ok(b"Wikipedia".to_vec()));
    }

    #[test]
    fn chunked_decode_reports_invalid_size() {
        let prefetched = b"Z\r\nx\r\n0\r\n\r\n".to_vec();
        let mut stream = Cursor::new(Vec::<u8>::new());
        let decoded = read_chunked_body(&mut stream, prefetched, LIMIT);
        assert!(decoded.is_err());
        if let Err(error) = decoded {
            assert_eq!(error.code, "net.http.chunk_size_invalid");
        }
    }

    #[test]
    fn chunked_decode_enforces_body_limit() {
        let prefetched = b"10\r\n0123456789abcdef\r\n0\r\n\r\n".to_vec();
        let mut stream = Cursor::new(Vec::<u8>::new());
        let decoded = read_chunked_body(&mut stream, prefetched, 8);
        assert!(matches!(decoded, Err(ref error) if error.code == "net.http.body_too_large"));
    }

    #[test]
    fn read_response_handles_chunked_transfer_encoding() {
        let request = get_request("https://example.com/chunked");
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                    4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let mut stream = Cursor::new(raw.to_vec());
        let outcome = match read_response(&mut stream, &request, LIMIT) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(outcome.response.body, b"Wikipedia");
        assert_eq!(outcome.response.reason, "OK");
        assert!(outcome.reusable);
    }

    #[test]
    fn http10_response_is_not_reused_without_keep_alive() {
        let request = get_request("http://localhost:3000/");
        let raw = b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\n\r\nok";
        let mut stream = Cursor::new(raw.to_vec());
        let outcome = match read_response(&mut stream, &request, LIMIT) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(outcome.response.status.as_u16(), 200);
        assert_eq!(outcome.response.body, b"ok");
        assert!(!outcome.reusable);
    }

    #[test]
    fn unframed_body_reads_until_close() {
        let request = get_request("http://localhost:3000/");
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nuntil the end";
        let mut stream = Cursor::new(raw.to_vec());
        let outcome = match read_response(&mut stream, &request, LIMIT) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(outcome.response.body, b"until the end");
        assert!(!outcome.reusable);
    }

    #[test]
    fn content_length_over_limit_is_rejected() {
        let request = get_request("http://localhost:3000/");
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\n";
        let mut stream = Cursor::new(raw.to_vec());
        let outcome = read_response(&mut stream, &request, 1024);
        assert!(matches!(outcome, Err(ref error) if error.code == "net.http.body_too_large"));
    }

    #[test]
    fn rejects_unsupported_transfer_encoding() {
        let request = get_request("https://example.com/unsupported-te");
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip\r\nConnection: close\r\n\r\nbody";
        let mut stream = Cursor::new(raw.to_vec());
        let outcome = read_response(&mut stream, &request, LIMIT);
        assert!(outcome.is_err());
        if let Err(error) = outcome {
            assert_eq!(error.code, "net.http.transfer_encoding_unsupported");
        }
    }

    #[test]
    fn decodes_gzip_content_encoding() {
        let mut encoded = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut encoded, Compression::default());
            assert!(encoder.write_all(b"hello gzip").is_ok());
            assert!(encoder.finish().is_ok());
        }

        let decoded =
            decode_content_encoding(&[header("Content-Encoding", "gzip")], &encoded, LIMIT);
        assert_eq!(decoded, Ok(b"hello gzip".to_vec()));
    }

    #[test]
    fn decodes_deflate_content_encoding() {
        let mut encoded = Vec::new();
        {
            let mut encoder = ZlibEncoder::new(&mut encoded, Compression::default());
            assert!(encoder.write_all(b"hello deflate").is_ok());
            assert!(encoder.finish().is_ok());
        }

        let decoded =
            decode_content_encoding(&[header("Content-Encoding", "deflate")], &encoded, LIMIT);
        assert_eq!(decoded, Ok(b"hello deflate".to_vec()));
    }

    #[test]
    fn decodes_brotli_content_encoding() {
        let mut encoded = Vec::new();
        {
            let mut writer = CompressorWriter::new(&mut encoded, 4096, 5, 22);
            assert!(writer.write_all(b"hello br").is_ok());
            assert!(writer.flush().is_ok());
        }

        let decoded = decode_content_encoding(&[header("Content-Encoding", "br")], &encoded, LIMIT);
        assert_eq!(decoded, Ok(b"hello br".to_vec()));
    }

    #[test]
    fn decompression_bomb_is_capped() {
        let mut encoded = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut encoded, Compression::best());
            assert!(encoder.write_all(&vec![b'a'; 64 * 1024]).is_ok());
            assert!(encoder.finish().is_ok());
        }

        let decoded =
            decode_content_encoding(&[header("Content-Encoding", "gzip")], &encoded, 1024);
        assert!(matches!(decoded, Err(ref error) if error.code == "net.http.body_too_large"));
    }

    #[test]
    fn executes_against_local_server_and_reuses_connection() {
        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(error) => panic!("{error}"),
        };

        let server = thread::spawn(move || {
            let (mut socket, _) = match listener.accept() {
                Ok(value) => value,
                Err(error) => panic!("{error}"),
            };
            for _ in 0..2 {
                let mut head = Vec::new();
                let mut byte = [0_u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    match socket.read(&mut byte) {
                        Ok(0) | Err(_) => return,
                        Ok(_) => head.push(byte[0]),
                    }
                }
                let wrote = socket.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
                assert!(wrote.is_ok());
            }
        });

        let client = local_client();
        let request = get_request(&format!("http://127.0.0.1:{port}/"));
        let prepared = PreparedRequest { request, tls: None };
        let deadline = Instant::now() + Duration::from_secs(5);

        for _ in 0..2 {
            match client.execute(&prepared, deadline) {
                Ok(response) => assert_eq!(response.body, b"hello"),
                Err(error) => panic!("{error}"),
            }
        }
        assert_eq!(client.pool_stats().idle_connections, 1);
        assert!(server.join().is_ok());
    }

    #[test]
    fn elapsed_deadline_fails_before_connecting() {
        let client = local_client();
        let request = get_request("http://127.0.0.1:9/");
        let prepared = PreparedRequest { request, tls: None };
        let result = client.execute(&prepared, Instant::now());
        assert!(matches!(result, Err(ref error) if error.code == "net.http.deadline_exceeded"));
    }
}
