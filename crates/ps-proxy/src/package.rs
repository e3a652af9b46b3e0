//! Maps pipeline output onto the proxy's HTTP response contract.

use crate::pipeline::PipelineOutcome;
use ps_core::NavigationFailure;
use ps_ipc::FINAL_URL_HEADER;
use ps_ipc::PASSTHROUGH_HEADER;
use ps_ipc::ProxyErrorBody;
use ps_ipc::REWRITE_HEADER;
use serde::Serialize;

pub const JSON_CONTENT_TYPE: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

/// Response ready for the wire, minus connection-level headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProxyResponse {
    pub fn json(status: u16, value: &impl Serialize) -> Self {
        // Serializing plain data structs cannot fail; fall back to an empty object.
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
        Self {
            status,
            content_type: JSON_CONTENT_TYPE.to_owned(),
            headers: Vec::new(),
            body,
        }
    }

    /// Plain request-level error, e.g. a malformed proxy request.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, &ProxyErrorBody::message(message))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        self
    }
}

pub fn package(outcome: PipelineOutcome) -> ProxyResponse {
    match outcome {
        PipelineOutcome::Document {
            html,
            final_url,
            degraded,
            ..
        } => {
            let response = ProxyResponse::json(200, &html)
                .with_header(FINAL_URL_HEADER, final_url.as_str());
            if degraded {
                response.with_header(REWRITE_HEADER, "degraded")
            } else {
                response
            }
        }
        PipelineOutcome::Passthrough {
            body,
            content_type,
            final_url,
        } => ProxyResponse {
            status: 200,
            content_type: content_type.unwrap_or_else(|| OCTET_STREAM.to_owned()),
            headers: Vec::new(),
            body,
        }
        .with_header(FINAL_URL_HEADER, final_url.as_str())
        .with_header(PASSTHROUGH_HEADER, "1"),
        PipelineOutcome::Failed(failure) => package_failure(&failure),
    }
}

pub fn package_failure(failure: &NavigationFailure) -> ProxyResponse {
    ProxyResponse::json(failure_status(failure), &ProxyErrorBody::from_failure(failure))
}

/// 400 for bad input, the upstream status when it is an error status, else 502;
/// 500 for network failures.
pub fn failure_status(failure: &NavigationFailure) -> u16 {
    match failure {
        NavigationFailure::InvalidInput { .. } => 400,
        NavigationFailure::Upstream { status, .. } if (400..=599).contains(status) => *status,
        NavigationFailure::Upstream { .. } => 502,
        NavigationFailure::Network { .. } => 500,
    }
}
