//! TLS policy contracts for outbound fetches.

use crate::url::Scheme;
use crate::url::TargetUrl;
use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;
use std::net::IpAddr;

/// Supported TLS protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    V1_2,
    V1_3,
}

impl TlsVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1_2 => "TLS1.2",
            Self::V1_3 => "TLS1.3",
        }
    }
}

/// Controls which trust anchors are used for server certificate verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustStoreMode {
    /// Use only the embedded Mozilla/WebPKI roots.
    WebPkiOnly,
    /// Use WebPKI roots and merge operating-system roots (enterprise/local CAs).
    WebPkiAndOs,
}

/// Per-connection handshake inputs. Versions, ALPN, and roots are fixed per client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsHandshakeConfig {
    pub server_name: String,
    pub enable_sni: bool,
}

/// Certificate verification is always on; only the knobs below vary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPolicy {
    pub minimum_version: TlsVersion,
    pub maximum_version: TlsVersion,
    pub trust_store_mode: TrustStoreMode,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            minimum_version: TlsVersion::V1_2,
            maximum_version: TlsVersion::V1_3,
            trust_store_mode: TrustStoreMode::WebPkiOnly,
        }
    }
}

impl TlsPolicy {
    pub fn with_trust_store_mode(mut self, mode: TrustStoreMode) -> Self {
        self.trust_store_mode = mode;
        self
    }

    pub fn validate(&self) -> PeriscopeResult<()> {
        if self.minimum_version > self.maximum_version {
            return Err(PeriscopeError::new(
                "net.tls.invalid_version_range",
                "minimum TLS version cannot be greater than maximum version",
            ));
        }

        Ok(())
    }

    /// Permitted versions, newest first.
    pub fn versions(&self) -> PeriscopeResult<Vec<TlsVersion>> {
        self.validate()?;
        Ok([TlsVersion::V1_3, TlsVersion::V1_2]
            .into_iter()
            .filter(|version| (self.minimum_version..=self.maximum_version).contains(version))
            .collect())
    }

    pub fn handshake_config_for(
        &self,
        url: &TargetUrl,
    ) -> PeriscopeResult<Option<TlsHandshakeConfig>> {
        self.validate()?;

        match url.scheme() {
            Scheme::Http => Ok(None),
            Scheme::Https => Ok(Some(TlsHandshakeConfig {
                server_name: url.host().trim_matches(['[', ']']).to_owned(),
                // SNI carries DNS names only; IP literals are verified against the cert's IP SANs.
                enable_sni: !is_ip_address(url.host()),
            })),
        }
    }
}

fn is_ip_address(host: &str) -> bool {
    host.trim_matches(['[', ']']).parse::<IpAddr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::TlsPolicy;
    use super::TlsVersion;
    use super::TrustStoreMode;
    use crate::url::TargetUrl;

    fn url(input: &str) -> TargetUrl {
        match TargetUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn validates_version_range() {
        let policy = TlsPolicy {
            minimum_version: TlsVersion::V1_3,
            maximum_version: TlsVersion::V1_2,
            ..TlsPolicy::default()
        };

        assert!(policy.validate().is_err());
    }

    #[test]
    fn creates_handshake_for_https_only() {
        let policy = TlsPolicy::default();

        let secure = policy.handshake_config_for(&url("https://example.com/"));
        let secure = match secure {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert!(secure.as_ref().is_some_and(|handshake| handshake.enable_sni));

        let plain = policy.handshake_config_for(&url("http://example.com/"));
        assert_eq!(plain, Ok(None));
    }

    #[test]
    fn ip_hosts_skip_sni() {
        let handshake = TlsPolicy::default().handshake_config_for(&url("https://93.184.216.34/"));
        let handshake = match handshake {
            Ok(Some(value)) => value,
            Ok(None) => panic!("expected a TLS handshake"),
            Err(error) => panic!("{error}"),
        };
        assert!(!handshake.enable_sni);
        assert_eq!(handshake.server_name, "93.184.216.34");
    }

    #[test]
    fn versions_follow_the_range() {
        assert_eq!(
            TlsPolicy::default().versions(),
            Ok(vec![TlsVersion::V1_3, TlsVersion::V1_2])
        );

        let modern = TlsPolicy {
            minimum_version: TlsVersion::V1_3,
            ..TlsPolicy::default()
        };
        assert_eq!(modern.versions(), Ok(vec![TlsVersion::V1_3]));
    }

    #[test]
    fn trust_store_mode_can_be_overridden() {
        let policy = TlsPolicy::default().with_trust_store_mode(TrustStoreMode::WebPkiAndOs);
        assert_eq!(policy.trust_store_mode, TrustStoreMode::WebPkiAndOs);
        assert_eq!(TlsPolicy::default().trust_store_mode, TrustStoreMode::WebPkiOnly);
    }
}
