//! Messages crossing the sandboxed frame boundary and the proxy request body.
//!
//! The frame is untrusted: every payload is size-checked, parsed into a typed
//! message, and its URL re-validated before the host acts on it.

use ps_core::FailureKind;
use ps_core::NavigationFailure;
use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;
use ps_net::fetch::FetchRequest;
use ps_net::url::TargetUrl;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// `sandbox` attribute for the frame that renders proxied documents.
///
/// Never grants `allow-top-navigation`: navigation only happens through the
/// relay.
pub const SANDBOX_ATTRIBUTE: &str = "allow-scripts allow-forms allow-same-origin allow-popups";

/// Final URL (after redirects) of a packaged document.
pub const FINAL_URL_HEADER: &str = "X-Periscope-Final-Url";
/// Present with value `degraded` when the document was served unrewritten.
pub const REWRITE_HEADER: &str = "X-Periscope-Rewrite";
/// Present with value `1` when a non-HTML body is passed through raw.
pub const PASSTHROUGH_HEADER: &str = "X-Periscope-Passthrough";

/// Size limits for one frame-to-host channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub max_message_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NavigationMethod {
    #[default]
    Get,
    Post,
}

/// Typed in-frame message. The `type` tag is checked before anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FrameMessage {
    #[serde(rename = "PROXY_NAVIGATE")]
    ProxyNavigate {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<NavigationMethod>,
        #[serde(
            rename = "formData",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        form_data: Option<Map<String, Value>>,
    },
}

impl FrameMessage {
    /// Validated intent; relative or non-http(s) URLs are rejected.
    pub fn into_intent(self) -> PeriscopeResult<NavigationIntent> {
        match self {
            Self::ProxyNavigate {
                url,
                method,
                form_data,
            } => intent_from_parts(&url, method, form_data),
        }
    }
}

/// Body of a `POST /proxy` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<NavigationMethod>,
    #[serde(rename = "formData", default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<Map<String, Value>>,
}

impl ProxyRequest {
    pub fn from_intent(intent: &NavigationIntent) -> Self {
        let form_data = match intent.method {
            NavigationMethod::Get => None,
            NavigationMethod::Post => Some(
                intent
                    .form_data
                    .iter()
                    .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                    .collect(),
            ),
        };

        Self {
            url: intent.url.as_str().to_owned(),
            method: Some(intent.method),
            form_data,
        }
    }

    /// Same validation as a frame message: the URL must already be absolute.
    pub fn into_intent(self) -> PeriscopeResult<NavigationIntent> {
        intent_from_parts(&self.url, self.method, self.form_data)
    }
}

/// JSON body of every non-200 proxy response.
///
/// `error` is the user-facing message; the remaining fields let a client
/// rebuild the exact [`NavigationFailure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
}

impl ProxyErrorBody {
    /// Plain request-level error with no navigation context.
    pub fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind: None,
            target: None,
            detail: None,
            status: None,
            status_text: None,
        }
    }

    pub fn from_failure(failure: &NavigationFailure) -> Self {
        let mut body = Self::message(failure.to_string());
        body.kind = Some(failure.kind().as_str().to_owned());
        match failure {
            NavigationFailure::InvalidInput { input, reason } => {
                body.target = Some(input.clone());
                body.detail = Some(reason.clone());
            }
            NavigationFailure::Network { target, detail } => {
                body.target = Some(target.clone());
                body.detail = Some(detail.clone());
            }
            NavigationFailure::Upstream {
                target,
                status,
                status_text,
            } => {
                body.target = Some(target.clone());
                body.status = Some(*status);
                body.status_text = Some(status_text.clone());
            }
        }
        body
    }

    /// Rebuilds the failure; `http_status` is the proxy response status.
    pub fn into_failure(self, http_status: u16) -> NavigationFailure {
        let target = self.target.unwrap_or_default();
        let kind = match self.kind.as_deref() {
            Some("invalid_input") => FailureKind::InvalidInput,
            Some("upstream") => FailureKind::Upstream,
            Some("network") => FailureKind::Network,
            _ if http_status == 400 => FailureKind::InvalidInput,
            _ => FailureKind::Network,
        };

        match kind {
            FailureKind::InvalidInput => NavigationFailure::InvalidInput {
                input: target,
                reason: self.detail.unwrap_or(self.error),
            },
            FailureKind::Upstream => NavigationFailure::Upstream {
                target,
                status: self.status.unwrap_or(http_status),
                status_text: self.status_text.unwrap_or_default(),
            },
            FailureKind::Network => NavigationFailure::Network {
                target,
                detail: self.detail.unwrap_or(self.error),
            },
        }
    }
}

/// A navigation requested by the frame, already validated. Consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationIntent {
    pub url: TargetUrl,
    pub method: NavigationMethod,
    pub form_data: Vec<(String, String)>,
}

impl NavigationIntent {
    pub fn get(url: TargetUrl) -> Self {
        Self {
            url,
            method: NavigationMethod::Get,
            form_data: Vec::new(),
        }
    }

    pub fn post(url: TargetUrl, form_data: Vec<(String, String)>) -> Self {
        Self {
            url,
            method: NavigationMethod::Post,
            form_data,
        }
    }

    pub fn into_fetch_request(self) -> FetchRequest {
        match self.method {
            NavigationMethod::Get => FetchRequest::get(self.url),
            NavigationMethod::Post => FetchRequest::post(self.url, self.form_data),
        }
    }
}

/// Size-checks and parses a raw `postMessage` payload.
pub fn decode_frame_message(raw: &str, config: &ChannelConfig) -> PeriscopeResult<FrameMessage> {
    if raw.len() > config.max_message_bytes {
        return Err(PeriscopeError::new(
            "ipc.message_too_large",
            format!(
                "payload exceeds max_message_bytes ({} > {})",
                raw.len(),
                config.max_message_bytes
            ),
        ));
    }

    serde_json::from_str(raw).map_err(|error| {
        PeriscopeError::new(
            "ipc.message_unrecognized",
            format!("payload is not a navigation message: {error}"),
        )
    })
}

/// Parses a raw payload straight into a validated intent.
pub fn parse_navigation_intent(
    raw: &str,
    config: &ChannelConfig,
) -> PeriscopeResult<NavigationIntent> {
    decode_frame_message(raw, config)?.into_intent()
}

fn intent_from_parts(
    url: &str,
    method: Option<NavigationMethod>,
    form_data: Option<Map<String, Value>>,
) -> PeriscopeResult<NavigationIntent> {
    let url = TargetUrl::parse(url).map_err(|error| {
        PeriscopeError::new(
            "ipc.url_invalid",
            format!("navigation URL rejected: {}", error.message),
        )
    })?;

    Ok(match method.unwrap_or_default() {
        NavigationMethod::Get => NavigationIntent::get(url),
        NavigationMethod::Post => {
            NavigationIntent::post(url, form_data.as_ref().map(form_fields).unwrap_or_default())
        }
    })
}

/// String-valued form fields; numbers and booleans are stringified, the rest dropped.
fn form_fields(map: &Map<String, Value>) -> Vec<(String, String)> {
    map.iter()
        .filter_map(|(name, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => return None,
            };
            Some((name.clone(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::ChannelConfig;
    use super::NavigationIntent;
    use super::NavigationMethod;
    use super::ProxyErrorBody;
    use super::ProxyRequest;
    use super::SANDBOX_ATTRIBUTE;
    use super::decode_frame_message;
    use super::parse_navigation_intent;
    use ps_core::NavigationFailure;
    use ps_net::http::HttpMethod;
    use ps_net::url::TargetUrl;

    fn url(input: &str) -> TargetUrl {
        match TargetUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn intent(raw: &str) -> NavigationIntent {
        match parse_navigation_intent(raw, &ChannelConfig::default()) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn parses_get_navigation() {
        let parsed = intent(r#"{"type":"PROXY_NAVIGATE","url":"https://example.com/next"}"#);
        assert_eq!(parsed, NavigationIntent::get(url("https://example.com/next")));
    }

    #[test]
    fn parses_post_navigation_with_form_data() {
        let parsed = intent(
            r#"{"type":"PROXY_NAVIGATE","url":"https://example.com/login","method":"POST",
                "formData":{"user":"ada","remember":true,"age":36,"file":{"name":"x"}}}"#,
        );
        assert_eq!(parsed.method, NavigationMethod::Post);
        assert_eq!(
            parsed.form_data,
            vec![
                ("age".to_owned(), "36".to_owned()),
                ("remember".to_owned(), "true".to_owned()),
                ("user".to_owned(), "ada".to_owned()),
            ]
        );
        assert_eq!(parsed.into_fetch_request().method, HttpMethod::Post);
    }

    #[test]
    fn unrecognised_shapes_are_rejected() {
        let config = ChannelConfig::default();
        for raw in [
            r#"{"type":"RESIZE","height":10}"#,
            r#"{"url":"https://example.com/"}"#,
            r#"{"type":"PROXY_NAVIGATE"}"#,
            r#"{"type":"PROXY_NAVIGATE","url":"https://example.com/","method":"DELETE"}"#,
            "not json",
            "[]",
        ] {
            let decoded = decode_frame_message(raw, &config);
            assert!(
                matches!(decoded, Err(ref error) if error.code == "ipc.message_unrecognized"),
                "{raw}"
            );
        }
    }

    #[test]
    fn relative_and_foreign_urls_are_rejected() {
        let config = ChannelConfig::default();
        for raw in [
            r#"{"type":"PROXY_NAVIGATE","url":"/relative"}"#,
            r#"{"type":"PROXY_NAVIGATE","url":"javascript:alert(1)"}"#,
            r#"{"type":"PROXY_NAVIGATE","url":"file:///etc/passwd"}"#,
        ] {
            let parsed = parse_navigation_intent(raw, &config);
            assert!(
                matches!(parsed, Err(ref error) if error.code == "ipc.url_invalid"),
                "{raw}"
            );
        }
    }

    #[test]
    fn oversized_messages_are_rejected() {
        let config = ChannelConfig {
            max_message_bytes: 64,
        };
        let raw = format!(
            r#"{{"type":"PROXY_NAVIGATE","url":"https://example.com/{}"}}"#,
            "a".repeat(100)
        );
        let decoded = decode_frame_message(&raw, &config);
        assert!(matches!(decoded, Err(ref error) if error.code == "ipc.message_too_large"));
    }

    #[test]
    fn proxy_request_defaults_to_get() {
        let parsed: Result<ProxyRequest, _> = serde_json::from_str(r#"{"url":"example.com"}"#);
        match parsed {
            Ok(request) => {
                assert_eq!(request.method, None);
                assert!(request.form_data.is_none());
                assert!(matches!(
                    request.into_intent(),
                    Err(ref error) if error.code == "ipc.url_invalid"
                ));
            }
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn proxy_request_requires_absolute_url() {
        let relative = ProxyRequest {
            url: "example.com".to_owned(),
            method: None,
            form_data: None,
        };
        assert!(matches!(relative.into_intent(), Err(ref error) if error.code == "ipc.url_invalid"));

        let parsed: Result<ProxyRequest, _> = serde_json::from_str(
            r#"{"url":"https://example.com/login","method":"POST","formData":{"user":"ada","n":3}}"#,
        );
        match parsed.map(ProxyRequest::into_intent) {
            Ok(Ok(intent)) => {
                assert_eq!(intent.method, NavigationMethod::Post);
                assert_eq!(
                    intent.form_data,
                    vec![
                        ("n".to_owned(), "3".to_owned()),
                        ("user".to_owned(), "ada".to_owned())
                    ]
                );
            }
            Ok(Err(error)) => panic!("{error}"),
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn sandbox_never_allows_top_navigation() {
        assert!(SANDBOX_ATTRIBUTE.contains("allow-scripts"));
        assert!(!SANDBOX_ATTRIBUTE.contains("top-navigation"));
    }

    #[test]
    fn error_body_round_trips_failures() {
        let failures = [
            NavigationFailure::Upstream {
                target: "example.com".to_owned(),
                status: 404,
                status_text: "Not Found".to_owned(),
            },
            NavigationFailure::Network {
                target: "example.com".to_owned(),
                detail: "the request timed out".to_owned(),
            },
            NavigationFailure::InvalidInput {
                input: "http://".to_owned(),
                reason: "empty host".to_owned(),
            },
        ];

        for failure in failures {
            let body = ProxyErrorBody::from_failure(&failure);
            assert_eq!(body.error, failure.to_string());
            let status = failure.upstream_status().unwrap_or(500);
            assert_eq!(body.into_failure(status), failure);
        }
    }

    #[test]
    fn bare_error_body_falls_back_on_status() {
        let invalid = ProxyErrorBody::message("missing `url`").into_failure(400);
        assert!(matches!(invalid, NavigationFailure::InvalidInput { .. }));

        let network = ProxyErrorBody::message("boom").into_failure(500);
        assert!(matches!(network, NavigationFailure::Network { ref detail, .. } if detail == "boom"));
    }
}
