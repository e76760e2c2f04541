//! Pool-bound load balancer for one domain.
//!
//! [`DnsBalancer`] owns a [`ServerPool`] and exposes the weighted
//! [`Selector`], the health monitor and the resolution interceptor on top
//! of it.

pub mod pool;
pub mod selector;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{info, warn};

use crate::{
    config::{self, Config},
    core::BalanceResult,
    health::{HealthCheckHandle, HealthCheckOptions, HealthMonitor, Probe},
    resolver::{self, interceptor::DomainInterceptor, Resolve},
};

pub use pool::{Endpoint, ServerPool};
pub use selector::{Selector, Tier};

/// Client-side load balancer answering resolution requests for one domain.
pub struct DnsBalancer {
    pool: Arc<ServerPool>,
    enabled: AtomicBool,
}

impl DnsBalancer {
    /// Builds a balancer for `domain` from the given server entries.
    pub fn new(domain: &str, servers: Vec<config::Server>) -> BalanceResult<Self> {
        let pool = ServerPool::initialize(domain, servers)?;
        Ok(Self {
            pool: Arc::new(pool),
            enabled: AtomicBool::new(false),
        })
    }

    pub fn from_config(config: &Config) -> BalanceResult<Self> {
        Self::new(&config.domain, config.servers.clone())
    }

    pub fn domain(&self) -> &str {
        self.pool.domain()
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// Picks the next endpoint by weighted round robin.
    pub fn get(&self) -> BalanceResult<Endpoint> {
        Selector::get(&self.pool)
    }

    /// Starts probing every endpoint each `interval`, with no probe timeout.
    ///
    /// Probing stops when the returned handle is cancelled or dropped.
    #[must_use = "dropping the handle cancels the health check"]
    pub fn start_health_check<P>(&self, probe: P, interval: Duration) -> HealthCheckHandle
    where
        P: Probe + 'static,
    {
        self.start_health_check_with(
            probe,
            HealthCheckOptions {
                interval,
                ..Default::default()
            },
        )
    }

    #[must_use = "dropping the handle cancels the health check"]
    pub fn start_health_check_with<P>(
        &self,
        probe: P,
        options: HealthCheckOptions,
    ) -> HealthCheckHandle
    where
        P: Probe + 'static,
    {
        HealthMonitor::new(self.pool.clone(), Arc::new(probe), options).start()
    }

    /// Builds an interceptor for this domain that forwards other names to `fallback`.
    pub fn interceptor(&self, fallback: Arc<dyn Resolve>) -> DomainInterceptor {
        DomainInterceptor::new(self.pool.clone(), fallback)
    }

    /// Routes the process-wide resolution entry points for this domain through the pool.
    ///
    /// The currently installed resolver becomes the fallback for every other
    /// name. Calling this again on the same balancer does nothing.
    pub fn enable(&self) {
        if self.enabled.swap(true, Ordering::AcqRel) {
            warn!(
                "Interception for '{}' is already enabled, ignoring",
                self.domain()
            );
            return;
        }

        let pool = self.pool.clone();
        resolver::install_with(move |current| {
            let interceptor: Arc<dyn Resolve> =
                Arc::new(DomainInterceptor::new(pool.clone(), current));
            interceptor
        });
        info!("Interception enabled for '{}'", self.domain());
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}
