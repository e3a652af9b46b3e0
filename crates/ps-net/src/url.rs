//! Absolute target URL model shared by the normalizer, fetcher, and relay.

use core::fmt;
use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;
use url::Url;

/// Supported application-level URL schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn is_secure(self) -> bool {
        matches!(self, Self::Https)
    }
}

/// Absolute http(s) URL. Never relative, never carries userinfo or a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetUrl {
    parsed: Url,
    scheme: Scheme,
    host: String,
    port: u16,
}

impl TargetUrl {
    pub fn parse(input: &str) -> PeriscopeResult<Self> {
        let parsed = Url::parse(input.trim()).map_err(|error| {
            PeriscopeError::new(
                "net.url.invalid",
                format!("failed to parse URL `{input}`: {error}"),
            )
        })?;

        Self::from_url(parsed)
    }

    /// Resolves `reference` against `self`, the way a `Location` header is resolved.
    pub fn join(&self, reference: &str) -> PeriscopeResult<Self> {
        let joined = self.parsed.join(reference.trim()).map_err(|error| {
            PeriscopeError::new(
                "net.url.join_failed",
                format!("failed to resolve `{reference}` against `{self}`: {error}"),
            )
        })?;

        Self::from_url(joined)
    }

    fn from_url(mut parsed: Url) -> PeriscopeResult<Self> {
        if parsed.cannot_be_a_base() {
            return Err(PeriscopeError::new(
                "net.url.invalid_base",
                "URL cannot be used for network navigation",
            ));
        }

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(PeriscopeError::new(
                "net.url.credentials_disallowed",
                "URL userinfo (`username:password@`) is not allowed",
            ));
        }

        let scheme = match parsed.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(PeriscopeError::new(
                    "net.url.scheme_unsupported",
                    format!("unsupported scheme `{other}`"),
                ));
            }
        };

        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| PeriscopeError::new("net.url.host_missing", "URL must include a host"))?
            .to_ascii_lowercase();

        let port = parsed.port_or_known_default().ok_or_else(|| {
            PeriscopeError::new(
                "net.url.port_missing",
                "unable to determine effective port for URL",
            )
        })?;

        // Fragments are client-side only and never sent on the wire.
        parsed.set_fragment(None);

        Ok(Self {
            parsed,
            scheme,
            host,
            port,
        })
    }

    pub fn as_str(&self) -> &str {
        self.parsed.as_str()
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.scheme.is_secure()
    }

    pub fn authority(&self) -> String {
        if self.port == default_port(self.scheme) {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `scheme://host[:port]`, the anchor for rewritten references.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.authority())
    }

    pub fn path_and_query(&self) -> String {
        let path = if self.parsed.path().is_empty() {
            "/"
        } else {
            self.parsed.path()
        };

        match self.parsed.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_owned(),
        }
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.parsed
            .query_pairs()
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect()
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_port(scheme: Scheme) -> u16 {
    match scheme {
        Scheme::Http => 80,
        Scheme::Https => 443,
    }
}
