//! Redirect-following document fetcher with a hard deadline.

use crate::client::Http11Client;
use crate::http::HttpMethod;
use crate::http::HttpResponse;
use crate::prepare_navigation_request;
use crate::tls::TlsPolicy;
use crate::tls::TrustStoreMode;
use crate::url::TargetUrl;
use ps_core::NavigationFailure;
use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Knobs for outbound fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub max_body_bytes: usize,
    pub allow_private_targets: bool,
    pub trust_store: TrustStoreMode,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_redirects: 10,
            max_body_bytes: 8 * 1024 * 1024,
            allow_private_targets: false,
            trust_store: TrustStoreMode::WebPkiOnly,
        }
    }
}

/// One top-level navigation to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: TargetUrl,
    pub method: HttpMethod,
    pub form: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: TargetUrl) -> Self {
        Self {
            url,
            method: HttpMethod::Get,
            form: Vec::new(),
        }
    }

    pub fn post(url: TargetUrl, form: Vec<(String, String)>) -> Self {
        Self {
            url,
            method: HttpMethod::Post,
            form,
        }
    }
}

/// 2xx document as received, after content decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub final_url: TargetUrl,
    pub http_status: u16,
    pub status_text: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    UpstreamError,
    NetworkError,
}

/// Outcome of one fetch. Produced once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success(FetchedDocument),
    UpstreamError {
        final_url: TargetUrl,
        http_status: u16,
        status_text: String,
    },
    NetworkError {
        url: TargetUrl,
        error: PeriscopeError,
    },
}

impl FetchResult {
    pub fn status(&self) -> FetchStatus {
        match self {
            Self::Success(_) => FetchStatus::Success,
            Self::UpstreamError { .. } => FetchStatus::UpstreamError,
            Self::NetworkError { .. } => FetchStatus::NetworkError,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Success(document) => Some(document.http_status),
            Self::UpstreamError { http_status, .. } => Some(*http_status),
            Self::NetworkError { .. } => None,
        }
    }

    /// User-facing failure, or `None` on success.
    pub fn failure(&self) -> Option<NavigationFailure> {
        match self {
            Self::Success(_) => None,
            Self::UpstreamError {
                final_url,
                http_status,
                status_text,
            } => Some(NavigationFailure::Upstream {
                target: final_url.host().to_owned(),
                status: *http_status,
                status_text: status_text.clone(),
            }),
            Self::NetworkError { url, error } => Some(NavigationFailure::Network {
                target: url.host().to_owned(),
                detail: describe_network_error(error),
            }),
        }
    }
}

/// Short human explanation for a transport failure.
pub fn describe_network_error(error: &PeriscopeError) -> String {
    let known = match error.code {
        "net.dns.private_target_denied" => Some("the address points into a private network"),
        "net.fetch.redirect_limit" => Some("the site redirected too many times"),
        "net.fetch.deadline_exceeded" | "net.http.deadline_exceeded" => {
            Some("the request timed out")
        }
        "net.http.body_too_large" => Some("the page is too large to display"),
        _ => None,
    };
    if let Some(text) = known {
        return text.to_owned();
    }

    if error.is_in("net.dns") {
        "the host name could not be resolved".to_owned()
    } else if error.is_in("net.tls") {
        "a secure connection could not be established".to_owned()
    } else if error.is_in("net.transport") {
        "the connection was refused or could not be opened".to_owned()
    } else {
        error.message.clone()
    }
}

/// Shared fetcher. One instance (one client, one pool) serves every tab.
pub struct Fetcher {
    client: Http11Client,
    options: FetchOptions,
}

impl Fetcher {
    pub fn new(options: FetchOptions) -> PeriscopeResult<Self> {
        if options.timeout.is_zero() {
            return Err(PeriscopeError::new(
                "net.fetch.timeout_invalid",
                "fetch timeout must be greater than zero",
            ));
        }

        let policy = TlsPolicy::default().with_trust_store_mode(options.trust_store);
        let mut client = Http11Client::new(policy, options.allow_private_targets)?;
        client.set_max_body_bytes(options.max_body_bytes);
        client.set_connect_timeout(options.timeout.min(Duration::from_secs(10)));

        Ok(Self { client, options })
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    pub fn fetch(&self, request: FetchRequest) -> FetchResult {
        let started = Instant::now();
        let deadline = started + self.options.timeout;
        let FetchRequest {
            mut url,
            mut method,
            mut form,
        } = request;
        let mut redirects = 0_usize;

        loop {
            let response = match self.exchange(method, &url, &form, deadline) {
                Ok(response) => response,
                Err(error) => return network_error(url, error, started),
            };

            let status = response.status;
            let location = response
                .header("Location")
                .map(str::trim)
                .filter(|value| status.is_redirect() && !value.is_empty());

            if let Some(location) = location {
                if redirects >= self.options.max_redirects {
                    let error = PeriscopeError::new(
                        "net.fetch.redirect_limit",
                        format!("exceeded {} redirects", self.options.max_redirects),
                    );
                    return network_error(url, error, started);
                }

                let next = match url.join(location) {
                    Ok(next) => next,
                    Err(error) => return network_error(url, error, started),
                };

                if matches!(status.as_u16(), 301..=303) && method == HttpMethod::Post {
                    method = HttpMethod::Get;
                    form.clear();
                }

                debug!(from = %url, to = %next, status = status.as_u16(), "following redirect");
                redirects += 1;
                url = next;
                continue;
            }

            return classify(url, response, started);
        }
    }

    fn exchange(
        &self,
        method: HttpMethod,
        url: &TargetUrl,
        form: &[(String, String)],
        deadline: Instant,
    ) -> PeriscopeResult<HttpResponse> {
        if Instant::now() >= deadline {
            return Err(PeriscopeError::new(
                "net.fetch.deadline_exceeded",
                format!(
                    "no complete response within {} ms",
                    self.options.timeout.as_millis()
                ),
            ));
        }

        let prepared = prepare_navigation_request(method, url, form, self.client.tls_policy())?;
        self.client.execute(&prepared, deadline)
    }
}

fn network_error(url: TargetUrl, error: PeriscopeError, started: Instant) -> FetchResult {
    warn!(
        url = %url,
        code = error.code,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "fetch failed: {}",
        error.message
    );
    FetchResult::NetworkError { url, error }
}

fn classify(final_url: TargetUrl, response: HttpResponse, started: Instant) -> FetchResult {
    let http_status = response.status.as_u16();
    let status_text = if response.reason.is_empty() {
        response.status.canonical_reason().to_owned()
    } else {
        response.reason.clone()
    };

    info!(
        url = %final_url,
        status = http_status,
        bytes = response.body.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "fetch complete"
    );

    if !response.status.is_success() {
        return FetchResult::UpstreamError {
            final_url,
            http_status,
            status_text,
        };
    }

    let content_type = response.header("Content-Type").map(str::to_owned);
    FetchResult::Success(FetchedDocument {
        final_url,
        http_status,
        status_text,
        content_type,
        body: response.body,
    })
}

#[cfg(test)]
mod tests {
    use super::FetchOptions;
    use super::FetchRequest;
    use super::FetchResult;
    use super::FetchStatus;
    use super::Fetcher;
    use crate::url::TargetUrl;
    use ps_core::FailureKind;
    use std::io::Read;
    use std::io::Write;
    use std::net::TcpListener;
    use std::net::TcpStream;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn url(input: &str) -> TargetUrl {
        match TargetUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn local_fetcher(options: FetchOptions) -> Fetcher {
        let options = FetchOptions {
            allow_private_targets: true,
            ..options
        };
        match Fetcher::new(options) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn read_request(socket: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut byte = [0_u8; 1];
        while !raw.ends_with(b"\r\n\r\n") {
            match socket.read(&mut byte) {
                Ok(0) | Err(_) => break,
                Ok(_) => raw.push(byte[0]),
            }
        }

        let head = String::from_utf8_lossy(&raw).into_owned();
        let length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        let mut body = vec![0_u8; length];
        if socket.read_exact(&mut body).is_err() {
            return head;
        }

        format!("{head}{}", String::from_utf8_lossy(&body))
    }

    /// Serves one canned response per connection, reporting each raw request.
    fn stub_server(responses: Vec<String>) -> (u16, mpsc::Receiver<String>) {
        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(error) => panic!("{error}"),
        };
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept() else {
                    return;
                };
                let _ = tx.send(read_request(&mut socket));
                let _ = socket.write_all(response.as_bytes());
            }
        });

        (port, rx)
    }

    fn response(status_line: &str, extra_headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\n{extra_headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[test]
    fn fetches_html_document() {
        let (port, requests) = stub_server(vec![response(
            "200 OK",
            "Content-Type: text/html; charset=utf-8\r\n",
            "<html><title>Hi</title></html>",
        )]);
        let fetcher = local_fetcher(FetchOptions::default());

        let result = fetcher.fetch(FetchRequest::get(url(&format!(
            "http://127.0.0.1:{port}/page"
        ))));
        match result {
            FetchResult::Success(document) => {
                assert_eq!(document.http_status, 200);
                assert_eq!(
                    document.content_type.as_deref(),
                    Some("text/html; charset=utf-8")
                );
                assert_eq!(document.body, b"<html><title>Hi</title></html>");
                assert_eq!(document.final_url.path_and_query(), "/page");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let request = match requests.recv_timeout(Duration::from_secs(5)) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert!(request.starts_with("GET /page HTTP/1.1\r\n"));
        assert!(request.contains("User-Agent: Mozilla/5.0"));
        assert!(request.contains("Sec-Fetch-Mode: navigate"));
    }

    #[test]
    fn not_found_is_upstream_error() {
        let (port, _requests) = stub_server(vec![response("404 Not Found", "", "missing")]);
        let fetcher = local_fetcher(FetchOptions::default());

        let result = fetcher.fetch(FetchRequest::get(url(&format!(
            "http://127.0.0.1:{port}/gone"
        ))));
        assert_eq!(result.status(), FetchStatus::UpstreamError);
        assert_eq!(result.http_status(), Some(404));

        let failure = result.failure();
        assert_eq!(
            failure.as_ref().map(|failure| failure.kind()),
            Some(FailureKind::Upstream)
        );
        assert_eq!(
            failure.map(|failure| failure.to_string()),
            Some("127.0.0.1 responded with HTTP 404 Not Found".to_owned())
        );
    }

    #[test]
    fn empty_success_body_is_still_success() {
        let (port, _requests) = stub_server(vec![response("204 No Content", "", "")]);
        let fetcher = local_fetcher(FetchOptions::default());

        let result = fetcher.fetch(FetchRequest::get(url(&format!("http://127.0.0.1:{port}/"))));
        match result {
            FetchResult::Success(document) => assert!(document.body.is_empty()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn follows_relative_redirects() {
        let (port, requests) = stub_server(vec![
            response("302 Found", "Location: /landing?from=old\r\n", ""),
            response("200 OK", "Content-Type: text/html\r\n", "landed"),
        ]);
        let fetcher = local_fetcher(FetchOptions::default());

        let result = fetcher.fetch(FetchRequest::get(url(&format!(
            "http://127.0.0.1:{port}/old"
        ))));
        match result {
            FetchResult::Success(document) => {
                assert_eq!(document.final_url.path_and_query(), "/landing?from=old");
                assert_eq!(document.body, b"landed");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let second = requests.iter().nth(1).unwrap_or_default();
        assert!(second.starts_with("GET /landing?from=old HTTP/1.1"));
    }

    #[test]
    fn see_other_downgrades_post_to_get() {
        let (port, requests) = stub_server(vec![
            response("303 See Other", "Location: /done\r\n", ""),
            response("200 OK", "Content-Type: text/html\r\n", "ok"),
        ]);
        let fetcher = local_fetcher(FetchOptions::default());
        let form = vec![
            ("name".to_owned(), "Ada Lovelace".to_owned()),
            ("lang".to_owned(), "en".to_owned()),
        ];

        let result = fetcher.fetch(FetchRequest::post(
            url(&format!("http://127.0.0.1:{port}/submit")),
            form,
        ));
        assert_eq!(result.status(), FetchStatus::Success);

        let seen: Vec<String> = requests.iter().take(2).collect();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].starts_with("POST /submit HTTP/1.1"));
        assert!(seen[0].contains("Content-Type: application/x-www-form-urlencoded"));
        assert!(seen[0].ends_with("name=Ada+Lovelace&lang=en"));
        assert!(seen[1].starts_with("GET /done HTTP/1.1"));
    }

    #[test]
    fn redirect_loop_hits_limit() {
        let hop = response("301 Moved Permanently", "Location: /loop\r\n", "");
        let (port, _requests) = stub_server(vec![hop.clone(), hop.clone(), hop]);
        let fetcher = local_fetcher(FetchOptions {
            max_redirects: 2,
            ..FetchOptions::default()
        });

        let result = fetcher.fetch(FetchRequest::get(url(&format!(
            "http://127.0.0.1:{port}/loop"
        ))));
        match result {
            FetchResult::NetworkError { error, .. } => {
                assert_eq!(error.code, "net.fetch.redirect_limit");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn refused_connection_is_network_error() {
        let port = match TcpListener::bind("127.0.0.1:0").and_then(|l| l.local_addr()) {
            Ok(addr) => addr.port(),
            Err(error) => panic!("{error}"),
        };
        let fetcher = local_fetcher(FetchOptions::default());

        let result = fetcher.fetch(FetchRequest::get(url(&format!("http://127.0.0.1:{port}/"))));
        assert_eq!(result.status(), FetchStatus::NetworkError);
        assert_eq!(result.http_status(), None);
        assert_eq!(
            result.failure().map(|failure| failure.kind()),
            Some(FailureKind::Network)
        );
    }

    #[test]
    fn private_targets_are_refused_by_default() {
        let fetcher = match Fetcher::new(FetchOptions::default()) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        let result = fetcher.fetch(FetchRequest::get(url("http://127.0.0.1:9/")));
        match result {
            FetchResult::NetworkError { error, .. } => {
                assert_eq!(error.code, "net.dns.private_target_denied");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn silent_server_hits_deadline() {
        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(error) => panic!("{error}"),
        };
        thread::spawn(move || {
            if let Ok((socket, _)) = listener.accept() {
                thread::sleep(Duration::from_secs(3));
                drop(socket);
            }
        });

        let fetcher = local_fetcher(FetchOptions {
            timeout: Duration::from_millis(300),
            ..FetchOptions::default()
        });
        let started = std::time::Instant::now();
        let result = fetcher.fetch(FetchRequest::get(url(&format!("http://127.0.0.1:{port}/"))));

        assert_eq!(result.status(), FetchStatus::NetworkError);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
