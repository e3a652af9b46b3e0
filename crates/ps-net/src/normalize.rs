//! Address-bar input normalisation: URL, bare host, or search query.

use crate::dns::is_private_address;
use crate::url::TargetUrl;
use ps_core::NavigationFailure;
use std::net::IpAddr;
use url::form_urlencoded;

pub const DEFAULT_SEARCH_URL: &str = "https://duckduckgo.com/?q=";

const KNOWN_SUFFIXES: &[&str] = &[
    "com", "org", "net", "io", "co", "gov", "edu", "mil", "int", "dev", "app", "ai", "info",
    "biz", "xyz", "site", "online", "tech", "blog", "news", "shop", "store", "cloud", "page",
    "wiki", "tv", "me",
];

/// Delegated two-letter country-code TLDs.
const COUNTRY_CODES: &str = "\
    ac ad ae af ag ai al am ao aq ar as at au aw ax az ba bb bd be bf bg bh bi bj bm bn bo bq \
    br bs bt bw by bz ca cc cd cf cg ch ci ck cl cm cn co cr cu cv cw cx cy cz de dj dk dm do \
    dz ec ee eg er es et eu fi fj fk fm fo fr ga gd ge gf gg gh gi gl gm gn gp gq gr gs gt gu \
    gw gy hk hm hn hr ht hu id ie il im in io iq ir is it je jm jo jp ke kg kh ki km kn kp kr \
    kw ky kz la lb lc li lk lr ls lt lu lv ly ma mc md me mg mh mk ml mm mn mo mp mq mr ms mt \
    mu mv mw mx my mz na nc ne nf ng ni nl no np nr nu nz om pa pe pf pg ph pk pl pm pn pr ps \
    pt pw py qa re ro rs ru rw sa sb sc sd se sg sh si sk sl sm sn so sr ss st su sv sx sy sz \
    tc td tf tg th tj tk tl tm tn to tr tt tv tw tz ua ug uk us uy uz va vc ve vg vi vn vu wf \
    ws ye yt za zm zw";

/// Turns raw user text into a fetchable target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlNormalizer {
    search_url: String,
}

impl Default for UrlNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_URL)
    }
}

impl UrlNormalizer {
    /// `search_url` is a prefix; the encoded query text is appended to it.
    pub fn new(search_url: impl Into<String>) -> Self {
        Self {
            search_url: search_url.into(),
        }
    }

    pub fn search_url(&self) -> &str {
        &self.search_url
    }

    pub fn normalize(&self, raw: &str) -> Result<TargetUrl, NavigationFailure> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(invalid(text, "the address is empty"));
        }

        if has_http_scheme(text) {
            return TargetUrl::parse(text).map_err(|error| invalid(text, &error.message));
        }

        if let Some(scheme) = bare_host_scheme(text) {
            let candidate = format!("{scheme}://{text}");
            return TargetUrl::parse(&candidate).map_err(|error| invalid(text, &error.message));
        }

        self.search_target(text)
    }

    fn search_target(&self, text: &str) -> Result<TargetUrl, NavigationFailure> {
        let query: String = form_urlencoded::byte_serialize(text.as_bytes()).collect();
        let candidate = format!("{}{query}", self.search_url);
        TargetUrl::parse(&candidate)
            .map_err(|error| invalid(text, &format!("search backend unusable: {}", error.message)))
    }
}

fn invalid(input: &str, reason: &str) -> NavigationFailure {
    NavigationFailure::InvalidInput {
        input: input.to_owned(),
        reason: reason.to_owned(),
    }
}

fn has_http_scheme(text: &str) -> bool {
    starts_with_ignore_case(text, "http://") || starts_with_ignore_case(text, "https://")
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Scheme to prepend when `text` reads as a bare host (plus optional path).
fn bare_host_scheme(text: &str) -> Option<&'static str> {
    if text.chars().any(char::is_whitespace) {
        return None;
    }

    let authority = text
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let host = strip_port(&authority)?;

    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        return Some(if is_private_address(ip) { "http" } else { "https" });
    }

    if is_local_host(host) {
        return Some("http");
    }

    let (labels, suffix) = host.rsplit_once('.')?;
    if labels.is_empty() || labels.split('.').any(str::is_empty) {
        return None;
    }

    if KNOWN_SUFFIXES.contains(&suffix) || is_country_code(suffix) {
        Some("https")
    } else {
        None
    }
}

/// Drops a trailing `:port`; `None` when the port is not numeric.
fn strip_port(authority: &str) -> Option<&str> {
    if authority.starts_with('[') {
        let close = authority.find(']')?;
        let rest = &authority[close + 1..];
        return match rest.strip_prefix(':') {
            Some(port) if is_port(port) => Some(&authority[..=close]),
            None if rest.is_empty() => Some(authority),
            _ => None,
        };
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if is_port(port) => Some(host),
        Some(_) => None,
        None => Some(authority),
    }
}

fn is_port(text: &str) -> bool {
    !text.is_empty() && text.len() <= 5 && text.bytes().all(|byte| byte.is_ascii_digit())
}

fn is_local_host(host: &str) -> bool {
    host == "localhost" || host.ends_with(".localhost") || host.ends_with(".local")
}

fn is_country_code(suffix: &str) -> bool {
    suffix.len() == 2 && COUNTRY_CODES.split_ascii_whitespace().any(|code| code == suffix)
}

#[cfg(test)]
mod tests {
    use super::UrlNormalizer;
    use ps_core::FailureKind;
    use ps_core::NavigationFailure;

    fn normalize(input: &str) -> Result<String, NavigationFailure> {
        UrlNormalizer::default()
            .normalize(input)
            .map(|url| url.as_str().to_owned())
    }

    #[test]
    fn bare_domain_gets_https() {
        let target = UrlNormalizer::default().normalize("example.com");
        let target = match target {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(target.as_str(), "https://example.com/");
        assert_eq!(target.host(), "example.com");
        assert_eq!(target.origin(), "https://example.com");
    }

    #[test]
    fn explicit_scheme_is_kept_as_is() {
        assert_eq!(
            normalize("HTTP://Example.org/path?x=1"),
            Ok("http://example.org/path?x=1".to_owned())
        );
        assert_eq!(
            normalize("  https://example.com/a  "),
            Ok("https://example.com/a".to_owned())
        );
    }

    #[test]
    fn country_code_and_path_are_accepted() {
        assert_eq!(
            normalize("bbc.co.uk/news"),
            Ok("https://bbc.co.uk/news".to_owned())
        );
        assert_eq!(
            normalize("example.de:8443/x"),
            Ok("https://example.de:8443/x".to_owned())
        );
    }

    #[test]
    fn free_text_becomes_search_query() {
        let target = UrlNormalizer::default().normalize("quick brown fox");
        let target = match target {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(target.host(), "duckduckgo.com");
        let query = target
            .query_pairs()
            .into_iter()
            .find(|(name, _)| name == "q")
            .map(|(_, value)| value);
        assert_eq!(query.as_deref(), Some("quick brown fox"));
    }

    #[test]
    fn unknown_suffix_and_single_words_search() {
        let normalizer = UrlNormalizer::new("https://search.example/?q=");
        for input in ["rust", "file.tar.gz1", "notes.txt2", ".com", "mailto:someone"] {
            match normalizer.normalize(input) {
                Ok(target) => assert_eq!(target.host(), "search.example", "{input}"),
                Err(error) => panic!("{input}: {error}"),
            }
        }
    }

    #[test]
    fn file_names_with_short_extensions_search() {
        let normalizer = UrlNormalizer::new("https://search.example/?q=");
        for input in ["app.js", "index.ts", "backup.gz", "notes.db"] {
            match normalizer.normalize(input) {
                Ok(target) => assert_eq!(target.host(), "search.example", "{input}"),
                Err(error) => panic!("{input}: {error}"),
            }
        }

        assert_eq!(normalize("example.pl"), Ok("https://example.pl/".to_owned()));
        assert_eq!(normalize("crates.rs"), Ok("https://crates.rs/".to_owned()));
    }

    #[test]
    fn local_hosts_get_plain_http() {
        assert_eq!(
            normalize("localhost:3000/app"),
            Ok("http://localhost:3000/app".to_owned())
        );
        assert_eq!(
            normalize("printer.local"),
            Ok("http://printer.local/".to_owned())
        );
        assert_eq!(
            normalize("192.168.1.10:8080"),
            Ok("http://192.168.1.10:8080/".to_owned())
        );
        assert_eq!(normalize("1.1.1.1"), Ok("https://1.1.1.1/".to_owned()));
    }

    #[test]
    fn empty_input_is_invalid() {
        let result = UrlNormalizer::default().normalize("   ");
        assert!(matches!(result, Err(ref failure) if failure.kind() == FailureKind::InvalidInput));
    }

    #[test]
    fn unparsable_explicit_url_is_invalid() {
        let result = normalize("https://");
        assert!(matches!(result, Err(NavigationFailure::InvalidInput { .. })));

        let result = normalize("https://user:pw@example.com/");
        assert!(matches!(result, Err(NavigationFailure::InvalidInput { .. })));
    }

    #[test]
    fn broken_search_backend_reports_invalid_input() {
        let normalizer = UrlNormalizer::new("not a url ");
        let result = normalizer.normalize("hello world");
        assert!(matches!(result, Err(NavigationFailure::InvalidInput { .. })));
    }
}
