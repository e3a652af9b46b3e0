//! Proxy configuration: JSON file, then environment overrides, then validation.

use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;
use ps_net::fetch::FetchOptions;
use ps_net::normalize::DEFAULT_SEARCH_URL;
use ps_net::normalize::UrlNormalizer;
use ps_net::tls::TrustStoreMode;
use ps_net::url::TargetUrl;
use serde::Deserialize;
use serde::Serialize;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "PERISCOPE_CONFIG";
pub const ENV_BIND_ADDR: &str = "PERISCOPE_BIND_ADDR";
pub const ENV_PORT: &str = "PERISCOPE_PORT";
pub const ENV_SEARCH_URL: &str = "PERISCOPE_SEARCH_URL";
pub const ENV_ALLOW_PRIVATE_TARGETS: &str = "PERISCOPE_ALLOW_PRIVATE_TARGETS";
pub const ENV_FETCH_TIMEOUT_SECS: &str = "PERISCOPE_FETCH_TIMEOUT_SECS";

/// Which certificate roots verify upstream TLS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStore {
    #[default]
    WebpkiOnly,
    WebpkiAndOs,
}

impl From<TrustStore> for TrustStoreMode {
    fn from(value: TrustStore) -> Self {
        match value {
            TrustStore::WebpkiOnly => Self::WebPkiOnly,
            TrustStore::WebpkiAndOs => Self::WebPkiAndOs,
        }
    }
}

/// Configuration for the proxy service and the fetch pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Bind address (default: 127.0.0.1)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Bind port (0 = OS-assigned ephemeral port)
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Concurrent client connections; extra connections are closed on accept.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Largest accepted request head or body.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    /// Hard deadline across all redirect hops of one fetch.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Upstream bodies are capped after content decoding.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Allow fetching loopback/private/link-local addresses.
    #[serde(default)]
    pub allow_private_targets: bool,

    #[serde(default)]
    pub trust_store: TrustStore,

    /// Search backend prefix; the encoded query is appended.
    #[serde(default = "default_search_url")]
    pub search_url: String,

    /// `Access-Control-Allow-Origin` sent on every response.
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bind_port: default_bind_port(),
            max_connections: default_max_connections(),
            max_request_bytes: default_max_request_bytes(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_redirects: default_max_redirects(),
            max_body_bytes: default_max_body_bytes(),
            allow_private_targets: false,
            trust_store: TrustStore::default(),
            search_url: default_search_url(),
            allowed_origin: default_allowed_origin(),
        }
    }
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_bind_port() -> u16 {
    8787
}

fn default_max_connections() -> usize {
    256
}

fn default_max_request_bytes() -> usize {
    64 * 1024
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_max_redirects() -> usize {
    10
}

fn default_max_body_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_search_url() -> String {
    DEFAULT_SEARCH_URL.to_owned()
}

fn default_allowed_origin() -> String {
    "*".to_owned()
}

impl ProxyConfig {
    pub fn from_json_str(text: &str) -> PeriscopeResult<Self> {
        serde_json::from_str(text).map_err(|error| {
            PeriscopeError::new(
                "config.parse_failed",
                format!("invalid configuration JSON: {error}"),
            )
        })
    }

    pub fn from_file(path: &Path) -> PeriscopeResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|error| {
            PeriscopeError::new(
                "config.read_failed",
                format!("failed to read `{}`: {error}", path.display()),
            )
        })?;
        Self::from_json_str(&text)
    }

    /// Loads from `path` (or `PERISCOPE_CONFIG`), applies process environment
    /// overrides, and validates.
    pub fn load(path: Option<&Path>) -> PeriscopeResult<Self> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    pub fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> PeriscopeResult<Self> {
        let env_path = lookup(ENV_CONFIG_PATH).filter(|value| !value.trim().is_empty());
        let mut config = match (path, env_path) {
            (Some(path), _) => Self::from_file(path)?,
            (None, Some(env_path)) => Self::from_file(Path::new(&env_path))?,
            (None, None) => Self::default(),
        };

        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> PeriscopeResult<()> {
        if let Some(value) = lookup(ENV_BIND_ADDR) {
            self.bind_addr = parse_env(ENV_BIND_ADDR, &value)?;
        }
        if let Some(value) = lookup(ENV_PORT) {
            self.bind_port = parse_env(ENV_PORT, &value)?;
        }
        if let Some(value) = lookup(ENV_SEARCH_URL) {
            self.search_url = value.trim().to_owned();
        }
        if let Some(value) = lookup(ENV_ALLOW_PRIVATE_TARGETS) {
            self.allow_private_targets = parse_flag(ENV_ALLOW_PRIVATE_TARGETS, &value)?;
        }
        if let Some(value) = lookup(ENV_FETCH_TIMEOUT_SECS) {
            self.fetch_timeout_secs = parse_env(ENV_FETCH_TIMEOUT_SECS, &value)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> PeriscopeResult<()> {
        let positive = [
            ("max_connections", self.max_connections as u64),
            ("max_request_bytes", self.max_request_bytes as u64),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("max_body_bytes", self.max_body_bytes as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PeriscopeError::new(
                    "config.value_invalid",
                    format!("`{name}` must be greater than zero"),
                ));
            }
        }

        // The normalizer appends the query, so the prefix itself must parse.
        TargetUrl::parse(&self.search_url).map_err(|error| {
            PeriscopeError::new(
                "config.search_url_invalid",
                format!(
                    "`search_url` must be an absolute http(s) URL: {}",
                    error.message
                ),
            )
        })?;

        if self.allowed_origin.trim().is_empty()
            || self.allowed_origin.contains(['\r', '\n'])
        {
            return Err(PeriscopeError::new(
                "config.allowed_origin_invalid",
                "`allowed_origin` must be `*` or a single origin",
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.bind_port)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: self.fetch_timeout(),
            max_redirects: self.max_redirects,
            max_body_bytes: self.max_body_bytes,
            allow_private_targets: self.allow_private_targets,
            trust_store: self.trust_store.into(),
        }
    }

    pub fn normalizer(&self) -> UrlNormalizer {
        UrlNormalizer::new(self.search_url.clone())
    }
}

fn parse_env<T>(name: &str, value: &str) -> PeriscopeResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|error| {
        PeriscopeError::new(
            "config.env_invalid",
            format!("invalid value `{value}` for {name}: {error}"),
        )
    })
}

fn parse_flag(name: &str, value: &str) -> PeriscopeResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(PeriscopeError::new(
            "config.env_invalid",
            format!("invalid boolean `{other}` for {name}"),
        )),
    }
}
