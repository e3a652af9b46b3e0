//! Origin-anchored rewriting of `href`/`src` attributes and CSS `url(...)`.
//!
//! Matching is regex-based on purpose: pages are frequently malformed, and a
//! missed reference only costs a broken asset, never a failed navigation.
//! Inline `<script>` bodies are never touched.

use ps_net::url::TargetUrl;
use regex_lite::Captures;
use regex_lite::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_REFERENCE_BUDGET: usize = 50_000;

static ATTRIBUTE_REFERENCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|[\s"'/])(?:href|src)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#).ok()
});

// Lowercase only: `URL(` in markup is almost always a JavaScript constructor.
static CSS_REFERENCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"\burl\(\s*(?:"([^"]*)"|'([^']*)'|([^"')\s]*))\s*\)"#).ok()
});

static SCRIPT_OPEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)<script\b[^>]*>").ok());

static SCRIPT_CLOSE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)</script\s*>").ok());

/// HTML whose relative references now resolve against `base_url`'s origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenDocument {
    html: String,
    base_url: TargetUrl,
}

impl RewrittenDocument {
    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn base_url(&self) -> &TargetUrl {
        &self.base_url
    }

    pub fn into_parts(self) -> (String, TargetUrl) {
        (self.html, self.base_url)
    }
}

/// The document is served without rewriting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteDegraded {
    #[error("document holds more than {budget} references")]
    BudgetExceeded { budget: usize },
    #[error("reference pattern failed to compile")]
    PatternUnavailable,
}

/// Rewrites relative references, bounded by a per-document reference budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceRewriter {
    budget: usize,
}

impl Default for ReferenceRewriter {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_BUDGET)
    }
}

impl ReferenceRewriter {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn rewrite(
        &self,
        html: &str,
        final_url: &TargetUrl,
    ) -> Result<RewrittenDocument, RewriteDegraded> {
        let (Some(attributes), Some(css), Some(open), Some(close)) = (
            &*ATTRIBUTE_REFERENCE,
            &*CSS_REFERENCE,
            &*SCRIPT_OPEN,
            &*SCRIPT_CLOSE,
        ) else {
            return Err(RewriteDegraded::PatternUnavailable);
        };

        let segments = split_script_bodies(html, open, close);
        let limit = self.budget + 1;
        let found: usize = segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Markup(text) => Some(
                    attributes.find_iter(text).take(limit).count()
                        + css.find_iter(text).take(limit).count(),
                ),
                Segment::Script(_) => None,
            })
            .sum();
        if found > self.budget {
            return Err(RewriteDegraded::BudgetExceeded {
                budget: self.budget,
            });
        }

        let origin = final_url.origin();
        let mut rewritten = 0_usize;
        let mut replace = |caps: &Captures| {
            let replacement = splice_reference(caps, &origin);
            if replacement.is_some() {
                rewritten += 1;
            }
            replacement.unwrap_or_else(|| caps[0].to_owned())
        };

        let mut output = String::with_capacity(html.len());
        for segment in segments {
            match segment {
                Segment::Script(text) => output.push_str(text),
                Segment::Markup(text) => {
                    let pass = attributes.replace_all(text, &mut replace);
                    output.push_str(&css.replace_all(&pass, &mut replace));
                }
            }
        }
        let html = output;

        debug!(origin = %origin, found, rewritten, "rewrote document references");
        Ok(RewrittenDocument {
            html,
            base_url: final_url.clone(),
        })
    }
}

enum Segment<'a> {
    Markup(&'a str),
    /// Inline script body, copied through untouched.
    Script(&'a str),
}

/// Splits `html` around `<script>` bodies. Open tags stay in markup so their
/// `src` is still rewritten; an unclosed script runs to the end of the input.
fn split_script_bodies<'a>(html: &'a str, open: &Regex, close: &Regex) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    let mut position = 0;

    while let Some(tag) = open.find_at(html, position) {
        segments.push(Segment::Markup(&html[position..tag.end()]));
        let body_end = close
            .find_at(html, tag.end())
            .map_or(html.len(), |closing| closing.start());
        segments.push(Segment::Script(&html[tag.end()..body_end]));
        position = body_end;
    }

    segments.push(Segment::Markup(&html[position..]));
    segments
}

/// Rebuilds the whole match with only the reference value replaced.
fn splice_reference(caps: &Captures<'_>, origin: &str) -> Option<String> {
    let whole = caps.get(0)?;
    let value = (1..caps.len()).find_map(|index| caps.get(index))?;
    let absolute = anchor_reference(origin, value.as_str())?;

    let text = whole.as_str();
    let start = value.start() - whole.start();
    let end = value.end() - whole.start();
    Some(format!("{}{absolute}{}", &text[..start], &text[end..]))
}

/// Absolute form of `reference` anchored at `origin`, or `None` to leave it alone.
pub fn anchor_reference(origin: &str, reference: &str) -> Option<String> {
    let trimmed = reference.trim();
    if trimmed.is_empty()
        || trimmed.starts_with("//")
        || trimmed.starts_with('#')
        || has_scheme(trimmed)
    {
        return None;
    }

    if trimmed.starts_with('/') {
        Some(format!("{origin}{trimmed}"))
    } else {
        Some(format!("{origin}/{trimmed}"))
    }
}

fn has_scheme(reference: &str) -> bool {
    let Some((scheme, _)) = reference.split_once(':') else {
        return false;
    };

    let mut bytes = scheme.bytes();
    bytes.next().is_some_and(|first| first.is_ascii_alphabetic())
        && bytes.all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'+' | b'-' | b'.'))
}
