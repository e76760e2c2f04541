use std::{net::IpAddr, sync::Arc};

use async_trait::async_trait;
use log::{debug, trace};
use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

use crate::{
    balance::{Endpoint, Selector, ServerPool},
    core::BalanceResult,
};

use super::{LookupAddr, Resolve};

static INTERCEPTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "dnslb_interceptions_total",
        "Number of intercepted resolution requests by domain, entry point and result",
        &["domain", "entry", "result"]
    )
    .unwrap()
});

/// Answers one domain from the pool and forwards every other name.
pub struct DomainInterceptor {
    pool: Arc<ServerPool>,
    fallback: Arc<dyn Resolve>,
}

impl DomainInterceptor {
    pub fn new(pool: Arc<ServerPool>, fallback: Arc<dyn Resolve>) -> Self {
        Self { pool, fallback }
    }

    pub fn domain(&self) -> &str {
        self.pool.domain()
    }

    /// DNS names compare case-insensitively; a trailing root dot is ignored.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.strip_suffix('.').unwrap_or(name);
        let domain = self.domain();
        let domain = domain.strip_suffix('.').unwrap_or(domain);
        name.eq_ignore_ascii_case(domain)
    }

    fn select(&self, entry: &str) -> BalanceResult<Endpoint> {
        let selected = Selector::get(&self.pool);
        let result = if selected.is_ok() { "ok" } else { "unavailable" };
        INTERCEPTIONS
            .with_label_values(&[self.domain(), entry, result])
            .inc();
        selected
    }
}

#[async_trait]
impl Resolve for DomainInterceptor {
    async fn lookup(&self, name: &str) -> BalanceResult<LookupAddr> {
        if !self.matches(name) {
            trace!("Passing lookup for {name} through");
            return self.fallback.lookup(name).await;
        }

        let endpoint = self.select("lookup")?;
        debug!("Intercepted lookup for {name}: {}", endpoint.address);
        Ok(LookupAddr::from(endpoint.address))
    }

    async fn resolve(&self, name: &str) -> BalanceResult<Vec<IpAddr>> {
        if !self.matches(name) {
            trace!("Passing resolve for {name} through");
            return self.fallback.resolve(name).await;
        }

        let endpoint = self.select("resolve")?;
        debug!("Intercepted resolve for {name}: {}", endpoint.address);
        Ok(vec![endpoint.address])
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{Ipv4Addr, Ipv6Addr},
        sync::atomic::Ordering,
    };

    use super::*;
    use crate::{balance::DnsBalancer, config::Server, resolver::tests::FixedResolver};

    fn server(last: u8) -> Server {
        Server::new(IpAddr::V4(Ipv4Addr::new(192, 168, 31, last)), 5018)
    }

    fn setup() -> (DnsBalancer, Arc<FixedResolver>, DomainInterceptor) {
        let balancer = DnsBalancer::new(
            "custom.domain",
            vec![server(3), server(4), server(5), server(6).as_backup()],
        )
        .unwrap();
        let fallback = Arc::new(
            FixedResolver::default()
                .with_host("example.com", IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))),
        );
        let interceptor = balancer.interceptor(fallback.clone());
        (balancer, fallback, interceptor)
    }

    #[test]
    fn test_matches() {
        let (_, _, interceptor) = setup();
        assert!(interceptor.matches("custom.domain"));
        assert!(interceptor.matches("Custom.Domain."));
        assert!(!interceptor.matches("api.custom.domain"));
        assert!(!interceptor.matches("custom.domain.com"));
        assert!(!interceptor.matches(""));
    }

    #[tokio::test]
    async fn test_lookup_answers_from_pool() {
        let (_, fallback, interceptor) = setup();

        let answers: Vec<String> = futures::future::join_all(
            (0..4).map(|_| interceptor.lookup("custom.domain")),
        )
        .await
        .into_iter()
        .map(|addr| addr.unwrap().address.to_string())
        .collect();
        assert_eq!(
            vec!["192.168.31.3", "192.168.31.4", "192.168.31.5", "192.168.31.3"],
            answers
        );
        assert_eq!(0, fallback.calls.load(Ordering::SeqCst));

        let addr = interceptor.lookup("custom.domain").await.unwrap();
        assert_eq!(4, addr.family);
    }

    #[tokio::test]
    async fn test_resolve_returns_single_address() {
        let (_, _, interceptor) = setup();
        assert_eq!(
            vec![IpAddr::V4(Ipv4Addr::new(192, 168, 31, 3))],
            interceptor.resolve("custom.domain").await.unwrap()
        );
        assert_eq!(
            vec![IpAddr::V4(Ipv4Addr::new(192, 168, 31, 4))],
            interceptor.resolve("CUSTOM.domain.").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_other_domains_pass_through_unchanged() {
        let (balancer, fallback, interceptor) = setup();

        let direct = fallback.lookup("example.com").await.unwrap();
        assert_eq!(direct, interceptor.lookup("example.com").await.unwrap());
        assert_eq!(
            fallback.resolve("example.com").await.unwrap(),
            interceptor.resolve("example.com").await.unwrap()
        );

        let direct = fallback.lookup("nowhere.test").await.unwrap_err().to_string();
        let via = interceptor.lookup("nowhere.test").await.unwrap_err().to_string();
        assert_eq!(direct, via);

        // pass-through never advances the rotation
        assert_eq!("192.168.31.3", balancer.get().unwrap().address.to_string());
    }

    #[tokio::test]
    async fn test_no_server_available_is_a_resolution_failure() {
        let (balancer, _, interceptor) = setup();
        for index in 0..4 {
            balancer.pool().set_disabled(index, true);
        }

        assert!(interceptor
            .lookup("custom.domain")
            .await
            .unwrap_err()
            .is_no_server_available());
        assert!(interceptor
            .resolve("custom.domain")
            .await
            .unwrap_err()
            .is_no_server_available());

        balancer.pool().set_disabled(3, false);
        assert_eq!(
            vec![IpAddr::V4(Ipv4Addr::new(192, 168, 31, 6))],
            interceptor.resolve("custom.domain").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_ipv6_endpoint_family() {
        let balancer = DnsBalancer::new(
            "v6.custom.domain",
            vec![Server::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 5018)],
        )
        .unwrap();
        let interceptor = balancer.interceptor(Arc::new(FixedResolver::default()));

        let addr = interceptor.lookup("v6.custom.domain").await.unwrap();
        assert_eq!(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.address);
        assert_eq!(6, addr.family);
    }
}
