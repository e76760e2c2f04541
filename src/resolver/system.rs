use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use log::debug;
use once_cell::sync::OnceCell;

use crate::core::{BalanceError, BalanceResult};

use super::{LookupAddr, Resolve};

/// Pass-through resolver backed by hickory with the system configuration.
///
/// The underlying resolver is built on first use, so a process that never
/// resolves anything does not read the system configuration.
#[derive(Default)]
pub struct SystemResolver {
    inner: OnceCell<TokioAsyncResolver>,
}

impl SystemResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an already configured hickory resolver.
    pub fn with_resolver(resolver: TokioAsyncResolver) -> Self {
        Self {
            inner: OnceCell::with_value(resolver),
        }
    }

    fn resolver(&self) -> BalanceResult<&TokioAsyncResolver> {
        self.inner.get_or_try_init(|| {
            TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
                BalanceError::DnsResolution(format!("Unable to load system resolver conf: {e}"))
            })
        })
    }

    async fn lookup_all(&self, name: &str) -> BalanceResult<Vec<IpAddr>> {
        debug!("Resolving DNS for domain: {}", name);

        let addrs: Vec<IpAddr> = self
            .resolver()?
            .lookup_ip(name)
            .await
            .map_err(|e| BalanceError::DnsResolution(format!("Lookup failed for {name}: {e}")))?
            .iter()
            .collect();

        Ok(addrs)
    }
}

#[async_trait]
impl Resolve for SystemResolver {
    async fn lookup(&self, name: &str) -> BalanceResult<LookupAddr> {
        self.lookup_all(name)
            .await?
            .into_iter()
            .next()
            .map(LookupAddr::from)
            .ok_or_else(|| BalanceError::DnsResolution(format!("No address found for {name}")))
    }

    async fn resolve(&self, name: &str) -> BalanceResult<Vec<IpAddr>> {
        let addrs: Vec<IpAddr> = self
            .lookup_all(name)
            .await?
            .into_iter()
            .filter(|ip| ip.is_ipv4())
            .collect();

        if addrs.is_empty() {
            return Err(BalanceError::DnsResolution(format!(
                "No A record found for {name}"
            )));
        }

        Ok(addrs)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use hickory_resolver::config::{ResolverConfig, ResolverOpts};

    use super::*;

    #[tokio::test]
    async fn test_ip_literal_needs_no_query() {
        let resolver = SystemResolver::with_resolver(TokioAsyncResolver::tokio(
            ResolverConfig::default(),
            ResolverOpts::default(),
        ));

        let addr = resolver.lookup("127.0.0.1").await.unwrap();
        assert_eq!(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.address);
        assert_eq!(4, addr.family);

        assert_eq!(
            vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            resolver.resolve("127.0.0.1").await.unwrap()
        );
        assert!(resolver.resolve("::1").await.is_err());
    }

    #[tokio::test]
    async fn test_system_conf_errors_are_resolution_errors() {
        let resolver = SystemResolver::new();
        match resolver.lookup("127.0.0.1").await {
            Ok(addr) => assert_eq!(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.address),
            Err(e) => assert!(matches!(e, BalanceError::DnsResolution(_))),
        }
    }
}
