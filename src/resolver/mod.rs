//! Name resolution entry points.
//!
//! [`Resolve`] is the strategy every resolver implements. The process-wide
//! [`lookup`] and [`resolve`] functions go through the resolver installed in
//! a global slot, which starts out as the [`SystemResolver`] and is wrapped
//! by [`DomainInterceptor`] when a balancer is enabled. Code that prefers
//! explicit wiring can hold an interceptor directly instead.

pub mod interceptor;
pub mod system;

use std::{fmt, net::IpAddr, sync::Arc};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;

use crate::core::BalanceResult;

pub use interceptor::DomainInterceptor;
pub use system::SystemResolver;

/// One resolved address plus its address family, 4 or 6.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LookupAddr {
    pub address: IpAddr,
    pub family: u8,
}

impl From<IpAddr> for LookupAddr {
    fn from(address: IpAddr) -> Self {
        let family = match address {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 6,
        };
        Self { address, family }
    }
}

impl fmt::Display for LookupAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (IPv{})", self.address, self.family)
    }
}

#[async_trait]
pub trait Resolve: Send + Sync {
    /// Resolves `name` to a single address.
    async fn lookup(&self, name: &str) -> BalanceResult<LookupAddr>;

    /// Resolves `name` to a list of IPv4 addresses.
    async fn resolve(&self, name: &str) -> BalanceResult<Vec<IpAddr>>;
}

static GLOBAL_RESOLVER: Lazy<ArcSwap<Arc<dyn Resolve>>> = Lazy::new(|| {
    let system: Arc<dyn Resolve> = Arc::new(SystemResolver::new());
    ArcSwap::from_pointee(system)
});

/// The resolver behind the process-wide entry points.
pub fn global() -> Arc<dyn Resolve> {
    let current = GLOBAL_RESOLVER.load();
    Arc::clone(&**current)
}

/// Replaces the process-wide resolver.
pub fn install(resolver: Arc<dyn Resolve>) {
    debug!("Installing global resolver");
    GLOBAL_RESOLVER.store(Arc::new(resolver));
}

/// Replaces the process-wide resolver with a wrapper around the current one.
pub(crate) fn install_with<F>(wrap: F)
where
    F: Fn(Arc<dyn Resolve>) -> Arc<dyn Resolve>,
{
    GLOBAL_RESOLVER.rcu(|current| wrap(Arc::clone(&**current)));
}

/// Process-wide single-address lookup.
pub async fn lookup(name: &str) -> BalanceResult<LookupAddr> {
    global().lookup(name).await
}

/// Process-wide address-list resolution.
pub async fn resolve(name: &str) -> BalanceResult<Vec<IpAddr>> {
    global().resolve(name).await
}
