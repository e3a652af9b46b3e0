//! Inserts the navigation interceptor script into a rewritten document.

use crate::rewrite::RewrittenDocument;
use ps_net::url::TargetUrl;
use regex_lite::Regex;
use serde_json::json;
use std::sync::LazyLock;

/// Attribute that marks the injected `<script>` element.
pub const INTERCEPTOR_MARKER: &str = "data-periscope-interceptor";

/// `type` of every message the script posts to the parent frame.
pub const NAVIGATE_MESSAGE_TYPE: &str = "PROXY_NAVIGATE";

const INTERCEPTOR_SOURCE: &str = include_str!("interceptor.js");
const CONFIG_PLACEHOLDER: &str = "__PERISCOPE_CONFIG__";

static HEAD_OPEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").ok());
static HTML_OPEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)<html(?:\s[^>]*)?>").ok());
static LEADING_DOCTYPE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*<!doctype[^>]*>").ok());

/// Full `<script>` element for a document served from `document_url`.
pub fn interceptor_script(document_url: &TargetUrl) -> String {
    let config = json!({
        "origin": document_url.origin(),
        "scheme": document_url.scheme().as_str(),
        "documentUrl": document_url.as_str(),
        "messageType": NAVIGATE_MESSAGE_TYPE,
    });
    // `</` inside an inline script would close the element early.
    let config = config.to_string().replace("</", "<\\/");
    let source = INTERCEPTOR_SOURCE.replace(CONFIG_PLACEHOLDER, &config);

    format!("<script {INTERCEPTOR_MARKER}>\n{source}</script>")
}

/// Consumes the document and returns HTML carrying exactly one interceptor.
pub fn inject_interceptor(document: RewrittenDocument) -> String {
    let (html, base_url) = document.into_parts();
    inject_into_html(html, &base_url)
}

/// Injects into HTML whose references were left as-is.
pub fn inject_into_html(html: String, document_url: &TargetUrl) -> String {
    let script = interceptor_script(document_url);

    if let Some(end) = match_end(&HEAD_OPEN, &html) {
        return splice(&html, end, &script);
    }

    let wrapped = format!("<head>{script}</head>");
    let anchor = match_end(&HTML_OPEN, &html).or_else(|| match_end(&LEADING_DOCTYPE, &html));
    splice(&html, anchor.unwrap_or(0), &wrapped)
}

fn match_end(pattern: &LazyLock<Option<Regex>>, html: &str) -> Option<usize> {
    pattern
        .as_ref()
        .and_then(|regex| regex.find(html))
        .map(|found| found.end())
}

fn splice(html: &str, at: usize, insert: &str) -> String {
    let mut out = String::with_capacity(html.len() + insert.len());
    out.push_str(&html[..at]);
    out.push_str(insert);
    out.push_str(&html[at..]);
    out
}

#[cfg(test)]
mod tests {
    use super::INTERCEPTOR_MARKER;
    use super::inject_interceptor;
    use super::inject_into_html;
    use super::interceptor_script;
    use crate::rewrite::ReferenceRewriter;
    use ps_net::url::TargetUrl;

    fn url(input: &str) -> TargetUrl {
        match TargetUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn inject(html: &str) -> String {
        let document = ReferenceRewriter::default().rewrite(html, &url("https://example.com/a/b"));
        match document {
            Ok(document) => inject_interceptor(document),
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn script_goes_right_after_head_open_tag() {
        let script = interceptor_script(&url("https://example.com/a/b"));
        let html = "<html><head lang=\"en\"><title>t</title></head><body></body></html>";
        assert_eq!(
            inject(html),
            format!("<html><head lang=\"en\">{script}<title>t</title></head><body></body></html>")
        );
    }

    #[test]
    fn header_element_is_not_mistaken_for_head() {
        let out = inject("<html><body><header>x</header></body></html>");
        assert!(out.starts_with("<html><head><script data-periscope-interceptor>"));
        assert!(out.ends_with("</script></head><body><header>x</header></body></html>"));
    }

    #[test]
    fn missing_html_falls_back_to_doctype_then_start() {
        let after_doctype = inject("<!DOCTYPE html>\n<p>hi</p>");
        assert!(after_doctype.starts_with("<!DOCTYPE html><head><script"));
        assert!(after_doctype.ends_with("</script></head>\n<p>hi</p>"));

        let fragment = inject("<p>hi</p>");
        assert!(fragment.starts_with("<head><script"));
        assert!(fragment.ends_with("</head><p>hi</p>"));
    }

    #[test]
    fn injects_exactly_once() {
        let out = inject("<html><head></head><head></head></html>");
        assert_eq!(out.matches(INTERCEPTOR_MARKER).count(), 1);
    }

    #[test]
    fn untouched_document_only_gains_the_script() {
        let html = "<html><head></head><body><a href=\"https://a.test/\">a</a></body></html>";
        let script = interceptor_script(&url("https://example.com/a/b"));
        assert_eq!(inject(html).replacen(&script, "", 1), html);
    }

    #[test]
    fn config_is_embedded_safely() {
        let script = interceptor_script(&url("https://example.com/p?q=%3C/script%3E"));
        assert!(script.contains("\"origin\":\"https://example.com\""));
        assert!(script.contains("PROXY_NAVIGATE"));
        assert!(!script.contains("__PERISCOPE_CONFIG__"));
        assert_eq!(script.matches("</script>").count(), 1);
    }

    #[test]
    fn unrewritten_html_gets_the_same_script() {
        let html = "<html><head></head><body><img src=\"/logo.png\"></body></html>".to_owned();
        let out = inject_into_html(html, &url("https://example.com/a/b"));
        assert_eq!(out.matches(INTERCEPTOR_MARKER).count(), 1);
        assert!(out.contains("<img src=\"/logo.png\">"));
    }
}
