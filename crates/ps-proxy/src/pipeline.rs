//! Fetch, rewrite, and inject: one navigation from target URL to servable output.

use crate::config::ProxyConfig;
use ps_core::NavigationFailure;
use ps_core::PeriscopeResult;
use ps_net::fetch::FetchRequest;
use ps_net::fetch::FetchResult;
use ps_net::fetch::FetchedDocument;
use ps_net::fetch::Fetcher;
use ps_net::normalize::UrlNormalizer;
use ps_net::url::TargetUrl;
use ps_rewrite::ReferenceRewriter;
use ps_rewrite::decode_text;
use ps_rewrite::extract_title;
use ps_rewrite::inject_interceptor;
use ps_rewrite::inject_into_html;
use ps_rewrite::is_html_content_type;
use tracing::debug;
use tracing::warn;

/// What one pipeline run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// HTML carrying the interceptor. `degraded` means references were left as-is.
    Document {
        html: String,
        final_url: TargetUrl,
        title: Option<String>,
        degraded: bool,
    },
    /// Non-HTML body, served byte-for-byte.
    Passthrough {
        body: Vec<u8>,
        content_type: Option<String>,
        final_url: TargetUrl,
    },
    Failed(NavigationFailure),
}

impl PipelineOutcome {
    pub fn failure(&self) -> Option<&NavigationFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn final_url(&self) -> Option<&TargetUrl> {
        match self {
            Self::Document { final_url, .. } | Self::Passthrough { final_url, .. } => {
                Some(final_url)
            }
            Self::Failed(_) => None,
        }
    }
}

pub struct ProxyPipeline {
    fetcher: Fetcher,
    normalizer: UrlNormalizer,
    rewriter: ReferenceRewriter,
}

impl ProxyPipeline {
    pub fn new(config: &ProxyConfig) -> PeriscopeResult<Self> {
        let fetcher = Fetcher::new(config.fetch_options())?;
        Ok(Self::from_parts(
            fetcher,
            config.normalizer(),
            ReferenceRewriter::default(),
        ))
    }

    pub fn from_parts(
        fetcher: Fetcher,
        normalizer: UrlNormalizer,
        rewriter: ReferenceRewriter,
    ) -> Self {
        Self {
            fetcher,
            normalizer,
            rewriter,
        }
    }

    pub fn normalizer(&self) -> &UrlNormalizer {
        &self.normalizer
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn run(&self, request: FetchRequest) -> PipelineOutcome {
        let result = self.fetcher.fetch(request);
        self.process(result)
    }

    /// Normalizes address-bar text first; invalid input never reaches the network.
    pub fn run_input(&self, raw: &str) -> PipelineOutcome {
        match self.normalizer.normalize(raw) {
            Ok(url) => self.run(FetchRequest::get(url)),
            Err(failure) => PipelineOutcome::Failed(failure),
        }
    }

    /// Turns a finished fetch into servable output. Never touches the network.
    pub fn process(&self, result: FetchResult) -> PipelineOutcome {
        match result {
            FetchResult::Success(document) => self.process_document(document),
            failed => match failed.failure() {
                Some(failure) => PipelineOutcome::Failed(failure),
                None => PipelineOutcome::Failed(NavigationFailure::Network {
                    target: String::new(),
                    detail: "the fetch produced no result".to_owned(),
                }),
            },
        }
    }

    fn process_document(&self, document: FetchedDocument) -> PipelineOutcome {
        let FetchedDocument {
            final_url,
            content_type,
            body,
            ..
        } = document;

        if !is_html_content_type(content_type.as_deref()) {
            debug!(url = %final_url, content_type = ?content_type, "passing body through");
            return PipelineOutcome::Passthrough {
                body,
                content_type,
                final_url,
            };
        }

        let text = decode_text(&body, content_type.as_deref());
        let title = extract_title(&text);

        match self.rewriter.rewrite(&text, &final_url) {
            Ok(rewritten) => PipelineOutcome::Document {
                html: inject_interceptor(rewritten),
                final_url,
                title,
                degraded: false,
            },
            Err(reason) => {
                warn!(url = %final_url, %reason, "serving document unrewritten");
                PipelineOutcome::Document {
                    html: inject_into_html(text, &final_url),
                    final_url,
                    title,
                    degraded: true,
                }
            }
        }
    }
}
