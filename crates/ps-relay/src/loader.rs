//! The seam between the relay and whatever runs the proxy pipeline.

use ps_core::NavigationFailure;
use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;
use ps_ipc::FINAL_URL_HEADER;
use ps_ipc::NavigationIntent;
use ps_ipc::PASSTHROUGH_HEADER;
use ps_ipc::ProxyErrorBody;
use ps_ipc::ProxyRequest;
use ps_ipc::REWRITE_HEADER;
use ps_net::HttpResponse;
use ps_net::PreparedRequest;
use ps_net::client::Http11Client;
use ps_net::fetch::describe_network_error;
use ps_net::http::HttpMethod;
use ps_net::http::HttpRequest;
use ps_net::tls::TlsPolicy;
use ps_net::url::TargetUrl;
use ps_rewrite::extract_title;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;

/// Body of a successfully loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageContent {
    /// Rewritten HTML carrying the interceptor script.
    Html(String),
    Binary {
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPage {
    pub final_url: TargetUrl,
    pub title: Option<String>,
    pub content: PageContent,
    /// References were left unrewritten.
    pub degraded: bool,
}

/// Runs one navigation to completion. Called from relay worker threads.
pub trait PageLoader: Send + Sync {
    fn load(&self, intent: &NavigationIntent) -> Result<LoadedPage, NavigationFailure>;
}

/// Loads pages through a running proxy service over HTTP.
pub struct ServiceLoader {
    endpoint: TargetUrl,
    client: Http11Client,
    tls_policy: TlsPolicy,
    timeout: Duration,
}

impl ServiceLoader {
    /// `endpoint` is the full proxy URL, e.g. `http://127.0.0.1:8787/proxy`.
    ///
    /// `timeout` should exceed the service's own fetch timeout so its
    /// network errors arrive before ours.
    pub fn new(endpoint: TargetUrl, timeout: Duration) -> PeriscopeResult<Self> {
        if timeout.is_zero() {
            return Err(PeriscopeError::new(
                "relay.timeout_invalid",
                "service loader timeout must be greater than zero",
            ));
        }

        let tls_policy = TlsPolicy::default();
        // The service normally runs on loopback.
        let client = Http11Client::new(tls_policy.clone(), true)?;

        Ok(Self {
            endpoint,
            client,
            tls_policy,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &TargetUrl {
        &self.endpoint
    }

    fn prepare(&self, intent: &NavigationIntent) -> PeriscopeResult<PreparedRequest> {
        let body = serde_json::to_vec(&ProxyRequest::from_intent(intent)).map_err(|error| {
            PeriscopeError::new(
                "relay.request_encode_failed",
                format!("failed to encode proxy request: {error}"),
            )
        })?;

        let request = HttpRequest::builder(HttpMethod::Post, self.endpoint.clone())
            .header("Content-Type", "application/json")?
            .header("Accept", "application/json, */*")?
            .body(body)
            .build()?;

        Ok(PreparedRequest {
            request,
            tls: self.tls_policy.handshake_config_for(&self.endpoint)?,
        })
    }

    fn service_failure(&self, error: &PeriscopeError) -> NavigationFailure {
        NavigationFailure::Network {
            target: self.endpoint.authority(),
            detail: describe_network_error(error),
        }
    }
}

impl PageLoader for ServiceLoader {
    fn load(&self, intent: &NavigationIntent) -> Result<LoadedPage, NavigationFailure> {
        let prepared = self
            .prepare(intent)
            .map_err(|error| self.service_failure(&error))?;
        let deadline = Instant::now() + self.timeout;
        let response = self
            .client
            .execute(&prepared, deadline)
            .map_err(|error| self.service_failure(&error))?;

        debug!(
            url = %intent.url,
            status = response.status.as_u16(),
            "proxy service answered"
        );
        decode_service_response(intent, response)
    }
}

/// Rebuilds a page or failure from a proxy service response.
pub fn decode_service_response(
    intent: &NavigationIntent,
    response: HttpResponse,
) -> Result<LoadedPage, NavigationFailure> {
    let status = response.status.as_u16();
    if status != 200 {
        return Err(match serde_json::from_slice::<ProxyErrorBody>(&response.body) {
            Ok(body) => body.into_failure(status),
            Err(_) => NavigationFailure::Network {
                target: intent.url.host().to_owned(),
                detail: format!("the proxy service answered HTTP {status}"),
            },
        });
    }

    let final_url = response
        .header(FINAL_URL_HEADER)
        .and_then(|value| TargetUrl::parse(value).ok())
        .unwrap_or_else(|| intent.url.clone());
    let degraded = response
        .header(REWRITE_HEADER)
        .is_some_and(|value| value.eq_ignore_ascii_case("degraded"));

    if response.header(PASSTHROUGH_HEADER).is_some() {
        let content_type = response.header("content-type").map(str::to_owned);
        return Ok(LoadedPage {
            final_url,
            title: None,
            content: PageContent::Binary {
                content_type,
                bytes: response.body,
            },
            degraded,
        });
    }

    let html: String = serde_json::from_slice(&response.body).map_err(|error| {
        NavigationFailure::Network {
            target: intent.url.host().to_owned(),
            detail: format!("the proxy service sent an unreadable document ({error})"),
        }
    })?;

    Ok(LoadedPage {
        final_url,
        title: extract_title(&html),
        content: PageContent::Html(html),
        degraded,
    })
}
