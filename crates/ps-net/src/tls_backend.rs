//! TLS upgrade for HTTPS connections.
//!
//! The rustls client configuration is built once per adapter (roots, version
//! range, ALPN) and shared by every connection the client opens.

use crate::tls::TlsHandshakeConfig;
use crate::tls::TlsPolicy;
use crate::transport::BoxedIoStream;
use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;
use std::net::TcpStream;

#[cfg(feature = "tls-rustls")]
use crate::tls::TlsVersion;
#[cfg(feature = "tls-rustls")]
use crate::tls::TrustStoreMode;
#[cfg(feature = "tls-rustls")]
use rustls::ClientConfig;
#[cfg(feature = "tls-rustls")]
use rustls::RootCertStore;
#[cfg(feature = "tls-rustls")]
use rustls::SupportedProtocolVersion;
#[cfg(feature = "tls-rustls")]
use rustls::pki_types::ServerName;
#[cfg(feature = "tls-rustls")]
use std::sync::Arc;
#[cfg(feature = "tls-rustls")]
use tracing::debug;
#[cfg(feature = "tls-rustls")]
use tracing::warn;

/// Upgrades a connected TCP stream to TLS.
pub trait TlsBackendAdapter: Send + Sync {
    fn connect_tls(
        &self,
        stream: TcpStream,
        handshake: &TlsHandshakeConfig,
    ) -> PeriscopeResult<BoxedIoStream>;
}

#[derive(Debug, Clone)]
pub struct RustlsTlsAdapter {
    #[cfg(feature = "tls-rustls")]
    with_sni: Arc<ClientConfig>,
    /// Same config with SNI off, for IP-literal hosts.
    #[cfg(feature = "tls-rustls")]
    without_sni: Arc<ClientConfig>,
}

#[cfg(feature = "tls-rustls")]
impl RustlsTlsAdapter {
    pub fn new(policy: &TlsPolicy) -> PeriscopeResult<Self> {
        let versions: Vec<&'static SupportedProtocolVersion> = policy
            .versions()?
            .into_iter()
            .map(to_rustls_version)
            .collect();
        let roots = root_store(policy.trust_store_mode);
        if roots.is_empty() {
            return Err(PeriscopeError::new(
                "net.tls.root_store_empty",
                "no trust anchors available for TLS verification",
            ));
        }
        debug!(
            trust_store = ?policy.trust_store_mode,
            anchors = roots.len(),
            min = policy.minimum_version.as_str(),
            max = policy.maximum_version.as_str(),
            "built TLS client config"
        );

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let mut config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)
            .map_err(|error| {
                PeriscopeError::new(
                    "net.tls.config_versions_invalid",
                    format!("failed to configure TLS protocol versions: {error}"),
                )
            })?
            .with_root_certificates(roots)
            .with_no_client_auth();
        // The client only speaks HTTP/1.1.
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        let mut without_sni = config.clone();
        without_sni.enable_sni = false;

        Ok(Self {
            with_sni: Arc::new(config),
            without_sni: Arc::new(without_sni),
        })
    }
}

#[cfg(feature = "tls-rustls")]
impl TlsBackendAdapter for RustlsTlsAdapter {
    fn connect_tls(
        &self,
        mut stream: TcpStream,
        handshake: &TlsHandshakeConfig,
    ) -> PeriscopeResult<BoxedIoStream> {
        use rustls::ClientConnection;
        use rustls::StreamOwned;

        let config = if handshake.enable_sni {
            &self.with_sni
        } else {
            &self.without_sni
        };

        let server_name = ServerName::try_from(handshake.server_name.clone()).map_err(|error| {
            PeriscopeError::new(
                "net.tls.server_name_invalid",
                format!(
                    "invalid TLS server name `{}`: {error}",
                    handshake.server_name
                ),
            )
        })?;

        let mut connection =
            ClientConnection::new(Arc::clone(config), server_name).map_err(|error| {
                PeriscopeError::new(
                    "net.tls.connection_init_failed",
                    format!(
                        "failed to initialize TLS connection for `{}`: {error}",
                        handshake.server_name
                    ),
                )
            })?;

        while connection.is_handshaking() {
            connection.complete_io(&mut stream).map_err(|error| {
                PeriscopeError::new(
                    "net.tls.handshake_failed",
                    format!(
                        "TLS handshake failed for `{}`: {error}",
                        handshake.server_name
                    ),
                )
            })?;
        }

        Ok(Box::new(StreamOwned::new(connection, stream)))
    }
}

/// WebPKI roots, plus whatever OS roots parse. Unreadable OS stores are
/// logged and skipped.
#[cfg(feature = "tls-rustls")]
fn root_store(mode: TrustStoreMode) -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if mode == TrustStoreMode::WebPkiAndOs {
        let native = rustls_native_certs::load_native_certs();
        for error in &native.errors {
            warn!(%error, "skipping unreadable operating-system trust anchors");
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        debug!(added, ignored, "merged operating-system roots");
    }

    roots
}

#[cfg(feature = "tls-rustls")]
fn to_rustls_version(version: TlsVersion) -> &'static SupportedProtocolVersion {
    match version {
        TlsVersion::V1_2 => &rustls::version::TLS12,
        TlsVersion::V1_3 => &rustls::version::TLS13,
    }
}

#[cfg(not(feature = "tls-rustls"))]
impl RustlsTlsAdapter {
    pub fn new(policy: &TlsPolicy) -> PeriscopeResult<Self> {
        policy.validate()?;
        Ok(Self {})
    }
}

#[cfg(not(feature = "tls-rustls"))]
impl TlsBackendAdapter for RustlsTlsAdapter {
    fn connect_tls(
        &self,
        _stream: TcpStream,
        _handshake: &TlsHandshakeConfig,
    ) -> PeriscopeResult<BoxedIoStream> {
        Err(PeriscopeError::new(
            "net.tls.backend_unavailable",
            "rustls backend is disabled for this build; enable `ps-net/tls-rustls`",
        ))
    }
}
