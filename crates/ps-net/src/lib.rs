//! Networking for the proxy: URL model, input normalisation, HTTP/1.1 client,
//! and the redirect-following fetcher.

pub mod client;
pub mod dns;
pub mod fetch;
pub mod http;
pub mod normalize;
pub mod pool;
pub mod tls;
pub mod tls_backend;
pub mod transport;
pub mod url;

use http::HttpMethod;
use http::HttpRequest;
use ps_core::PeriscopeResult;
use tls::TlsHandshakeConfig;
use tls::TlsPolicy;
use url::TargetUrl;

pub use fetch::FetchOptions;
pub use fetch::FetchRequest;
pub use fetch::FetchResult;
pub use fetch::FetchStatus;
pub use fetch::FetchedDocument;
pub use fetch::Fetcher;
pub use http::Header;
pub use http::HttpResponse;
pub use http::HttpStatusCode;
pub use normalize::UrlNormalizer;
pub use tls::TrustStoreMode;
pub use url::Scheme;

const DEFAULT_BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";
const DEFAULT_ACCEPT_HEADER: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Request prepared by the network layer before transport execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub request: HttpRequest,
    pub tls: Option<TlsHandshakeConfig>,
}

/// Builds a top-level navigation request that looks like a desktop browser's.
///
/// `form` is sent as an urlencoded body for POST and ignored otherwise.
pub fn prepare_navigation_request(
    method: HttpMethod,
    url: &TargetUrl,
    form: &[(String, String)],
    tls_policy: &TlsPolicy,
) -> PeriscopeResult<PreparedRequest> {
    let tls = tls_policy.handshake_config_for(url)?;

    let mut request = HttpRequest::builder(method, url.clone());
    request = request.header("User-Agent", DEFAULT_BROWSER_USER_AGENT)?;
    request = request.header("Accept", DEFAULT_ACCEPT_HEADER)?;
    request = request.header("Accept-Language", DEFAULT_ACCEPT_LANGUAGE)?;
    request = request.header("Accept-Encoding", "gzip, deflate, br")?;
    request = request.header("Upgrade-Insecure-Requests", "1")?;
    request = request.header("Sec-Fetch-Site", "none")?;
    request = request.header("Sec-Fetch-Mode", "navigate")?;
    request = request.header("Sec-Fetch-User", "?1")?;
    request = request.header("Sec-Fetch-Dest", "document")?;

    if method == HttpMethod::Post {
        let body = ::url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        request = request
            .header("Content-Type", FORM_CONTENT_TYPE)?
            .body(body.into_bytes());
    }

    Ok(PreparedRequest {
        request: request.build()?,
        tls,
    })
}

#[cfg(test)]
mod tests {
    use super::prepare_navigation_request;
    use crate::http::HttpMethod;
    use crate::tls::TlsPolicy;
    use crate::url::TargetUrl;

    fn url(input: &str) -> TargetUrl {
        match TargetUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn https_request_prepares_tls_config() {
        let prepared = prepare_navigation_request(
            HttpMethod::Get,
            &url("https://example.com/"),
            &[],
            &TlsPolicy::default(),
        );
        let prepared = match prepared {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert!(prepared.tls.is_some());
        assert_eq!(
            prepared.request.header("Accept-Encoding"),
            Some("gzip, deflate, br")
        );
        assert!(prepared.request.body.is_empty());
    }

    #[test]
    fn post_request_carries_urlencoded_form() {
        let form = vec![
            ("q".to_owned(), "two words".to_owned()),
            ("lang".to_owned(), "en&fr".to_owned()),
        ];
        let prepared = prepare_navigation_request(
            HttpMethod::Post,
            &url("http://example.com/search"),
            &form,
            &TlsPolicy::default(),
        );
        let prepared = match prepared {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert!(prepared.tls.is_none());
        assert_eq!(
            prepared.request.header("Content-Type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(prepared.request.body, b"q=two+words&lang=en%26fr");
        assert_eq!(prepared.request.header("Content-Length"), Some("24"));
    }
}
