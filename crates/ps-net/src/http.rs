//! HTTP request/response contracts shared by the client and the proxy server.

use crate::url::TargetUrl;
use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;

/// HTTP methods the proxy sends or accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Options => "OPTIONS",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "GET" => Some(Self::Get),
            "HEAD" => Some(Self::Head),
            "POST" => Some(Self::Post),
            "OPTIONS" => Some(Self::Options),
            _ => None,
        }
    }
}

/// HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "HTTP/1.0" => Some(Self::Http10),
            "HTTP/1.1" => Some(Self::Http11),
            _ => None,
        }
    }
}

/// Single HTTP header with validated wire-safe name/value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: &str, value: &str) -> PeriscopeResult<Self> {
        if !is_valid_header_name(name) {
            return Err(PeriscopeError::new(
                "net.http.header_name_invalid",
                format!("invalid HTTP header name `{name}`"),
            ));
        }

        if value.bytes().any(|byte| matches!(byte, b'\r' | b'\n' | 0)) {
            return Err(PeriscopeError::new(
                "net.http.header_value_invalid",
                format!("invalid characters found in HTTP header `{name}`"),
            ));
        }

        Ok(Self {
            name: name.to_owned(),
            value: value.to_owned(),
        })
    }
}

/// Outgoing HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: TargetUrl,
    pub version: HttpVersion,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn builder(method: HttpMethod, url: TargetUrl) -> HttpRequestBuilder {
        HttpRequestBuilder {
            method,
            url,
            version: HttpVersion::Http11,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn request_target(&self) -> String {
        self.url.path_and_query()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// Builder for `HttpRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestBuilder {
    method: HttpMethod,
    url: TargetUrl,
    version: HttpVersion,
    headers: Vec<Header>,
    body: Vec<u8>,
}

impl HttpRequestBuilder {
    pub fn version(mut self, version: HttpVersion) -> Self {
        self.version = version;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> PeriscopeResult<Self> {
        self.headers.push(Header::new(name, value)?);
        Ok(self)
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn build(mut self) -> PeriscopeResult<HttpRequest> {
        if matches!(self.method, HttpMethod::Get | HttpMethod::Head) && !self.body.is_empty() {
            return Err(PeriscopeError::new(
                "net.http.body_disallowed",
                format!("{} requests must not include a body", self.method.as_str()),
            ));
        }

        ensure_singleton_header(&self.headers, "host")?;
        ensure_singleton_header(&self.headers, "content-length")?;

        if !has_header(&self.headers, "host") {
            let host = self.url.authority();
            self.headers.push(Header::new("Host", &host)?);
        }

        let needs_length = !self.body.is_empty() || self.method == HttpMethod::Post;
        if needs_length && !has_header(&self.headers, "content-length") {
            let len = self.body.len().to_string();
            self.headers.push(Header::new("Content-Length", &len)?);
        }

        Ok(HttpRequest {
            method: self.method,
            url: self.url,
            version: self.version,
            headers: self.headers,
            body: self.body,
        })
    }
}

/// HTTP status code wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HttpStatusCode(u16);

impl HttpStatusCode {
    pub fn new(code: u16) -> PeriscopeResult<Self> {
        if (100..=599).contains(&code) {
            return Ok(Self(code));
        }

        Err(PeriscopeError::new(
            "net.http.status_invalid",
            format!("status code must be 100-599, got `{code}`"),
        ))
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        (200..=299).contains(&self.0)
    }

    pub fn is_redirect(self) -> bool {
        matches!(self.0, 301 | 302 | 303 | 307 | 308)
    }

    /// Standard reason phrase, used when the peer omits one and by the proxy server.
    pub fn canonical_reason(self) -> &'static str {
        match self.0 {
            200 => "OK",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            410 => "Gone",
            413 => "Payload Too Large",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "",
        }
    }
}

/// Incoming HTTP response contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub version: HttpVersion,
    pub status: HttpStatusCode,
    pub reason: String,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// Returns the offset just past the `\r\n\r\n` head terminator.
pub fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

/// Parses `Name: value` lines following a start line.
pub fn parse_header_lines<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> PeriscopeResult<Vec<Header>> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (name, value) = line.split_once(':').ok_or_else(|| {
            PeriscopeError::new(
                "net.http.header_invalid",
                format!("invalid HTTP header line `{line}`"),
            )
        })?;
        headers.push(Header::new(name.trim(), value.trim())?);
    }

    Ok(headers)
}

pub fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}

/// True when a comma-separated header value contains `value` as a token.
pub fn header_contains(headers: &[Header], name: &str, value: &str) -> bool {
    headers.iter().any(|header| {
        header.name.eq_ignore_ascii_case(name)
            && header
                .value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case(value))
    })
}

/// Parses `Content-Length`, rejecting conflicting duplicates.
pub fn parse_content_length(headers: &[Header]) -> PeriscopeResult<Option<usize>> {
    let mut value: Option<usize> = None;
    for header in headers {
        if header.name.eq_ignore_ascii_case("content-length") {
            let parsed = header.value.trim().parse::<usize>().map_err(|error| {
                PeriscopeError::new(
                    "net.http.content_length_invalid",
                    format!("invalid Content-Length `{}`: {error}", header.value),
                )
            })?;

            if let Some(existing) = value {
                if existing != parsed {
                    return Err(PeriscopeError::new(
                        "net.http.content_length_conflict",
                        "conflicting Content-Length headers",
                    ));
                }
            } else {
                value = Some(parsed);
            }
        }
    }

    Ok(value)
}

fn ensure_singleton_header(headers: &[Header], name: &str) -> PeriscopeResult<()> {
    let count = headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case(name))
        .count();

    if count <= 1 {
        return Ok(());
    }

    Err(PeriscopeError::new(
        "net.http.duplicate_header",
        format!("header `{name}` must appear at most once"),
    ))
}

fn has_header(headers: &[Header], name: &str) -> bool {
    headers
        .iter()
        .any(|header| header.name.eq_ignore_ascii_case(name))
}

fn is_valid_header_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    name.bytes().all(is_token_char)
}

fn is_token_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}
