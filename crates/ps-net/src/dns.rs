//! DNS resolution contracts and the private-target guard.

use ps_core::PeriscopeError;
use ps_core::PeriscopeResult;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;

/// Name resolution abstraction.
pub trait DnsResolver: Send + Sync {
    fn resolve(&self, host: &str, port: u16) -> PeriscopeResult<Vec<SocketAddr>>;
}

/// Uses the operating system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDnsResolver;

impl DnsResolver for SystemDnsResolver {
    fn resolve(&self, host: &str, port: u16) -> PeriscopeResult<Vec<SocketAddr>> {
        let query = format!("{host}:{port}");
        let addresses: Vec<SocketAddr> = query
            .to_socket_addrs()
            .map_err(|error| {
                PeriscopeError::new(
                    "net.dns.resolve_failed",
                    format!("failed to resolve `{query}`: {error}"),
                )
            })?
            .collect();

        if addresses.is_empty() {
            return Err(PeriscopeError::new(
                "net.dns.no_results",
                format!("resolver returned no addresses for `{query}`"),
            ));
        }

        Ok(addresses)
    }
}

/// Resolver wrapper that drops loopback/private/link-local answers.
///
/// The proxy fetches on behalf of an untrusted page, so by default it must not
/// be usable to reach services on the proxy host's own network.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardedDnsResolver<R = SystemDnsResolver> {
    inner: R,
    allow_private: bool,
}

impl GuardedDnsResolver {
    pub fn system(allow_private: bool) -> Self {
        Self::new(SystemDnsResolver, allow_private)
    }
}

impl<R: DnsResolver> GuardedDnsResolver<R> {
    pub fn new(inner: R, allow_private: bool) -> Self {
        Self {
            inner,
            allow_private,
        }
    }
}

impl<R: DnsResolver> DnsResolver for GuardedDnsResolver<R> {
    fn resolve(&self, host: &str, port: u16) -> PeriscopeResult<Vec<SocketAddr>> {
        let addresses = self.inner.resolve(host, port)?;
        if self.allow_private {
            return Ok(addresses);
        }

        let public: Vec<SocketAddr> = addresses
            .into_iter()
            .filter(|address| !is_private_address(address.ip()))
            .collect();

        if public.is_empty() {
            return Err(PeriscopeError::new(
                "net.dns.private_target_denied",
                format!("`{host}` resolves only to private or loopback addresses"),
            ));
        }

        Ok(public)
    }
}

/// Loopback, private, link-local, unique-local, or unspecified.
pub fn is_private_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_address(IpAddr::V4(mapped));
            }
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_unspecified()
        }
    }
}
