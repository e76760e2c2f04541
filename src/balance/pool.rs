use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwap;
use log::{debug, info};

use crate::{
    config::{self, is_valid_domain},
    config_error,
    core::BalanceResult,
};

/// A candidate endpoint as handed out by the selector and the health probes.
///
/// Endpoints are plain values: every read returns a copy taken from the
/// current pool snapshot, so holding one never blocks a health update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub address: IpAddr,
    pub port: u16,
    pub weight: u32,
    pub disabled: bool,
    pub backup: bool,
}

impl Endpoint {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Primary tier membership: enabled and not tagged as backup.
    pub(crate) fn is_primary_eligible(&self) -> bool {
        !self.disabled && !self.backup
    }

    /// Fallback tier membership: enabled, backup or not.
    pub(crate) fn is_fallback_eligible(&self) -> bool {
        !self.disabled
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl TryFrom<config::Server> for Endpoint {
    type Error = crate::core::BalanceError;

    fn try_from(value: config::Server) -> BalanceResult<Self> {
        if value.weight == 0 {
            return Err(config_error!(
                "Server {} has weight 0, weight must be at least 1",
                SocketAddr::new(value.address, value.port)
            ));
        }

        Ok(Self {
            address: value.address,
            port: value.port,
            weight: value.weight,
            disabled: value.disabled,
            backup: value.backup,
        })
    }
}

/// Ordered endpoints bound to one domain, plus the selection counter.
///
/// The endpoint list is copy-on-write: readers load an `Arc` snapshot and
/// health updates swap in a modified copy. Order never changes after
/// construction because it defines the weighted ranges.
pub struct ServerPool {
    domain: String,
    endpoints: ArcSwap<Vec<Endpoint>>,
    counter: AtomicU64,
}

impl fmt::Debug for ServerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPool")
            .field("domain", &self.domain)
            .field("endpoints", &self.endpoints.load())
            .field("counter", &self.counter.load(Ordering::Relaxed))
            .finish()
    }
}

impl ServerPool {
    /// Normalizes the server entries and binds them to `domain`.
    pub fn initialize(domain: &str, servers: Vec<config::Server>) -> BalanceResult<Self> {
        if !is_valid_domain(domain) {
            return Err(config_error!("Invalid domain '{}'", domain));
        }

        if servers.is_empty() {
            return Err(config_error!("Domain '{}' has no servers", domain));
        }

        let endpoints = servers
            .into_iter()
            .map(Endpoint::try_from)
            .collect::<BalanceResult<Vec<_>>>()?;

        for endpoint in endpoints.iter() {
            info!(
                "Configuring endpoint {} for '{}' (weight: {}, backup: {})",
                endpoint, domain, endpoint.weight, endpoint.backup
            );
        }

        Ok(Self {
            domain: domain.to_string(),
            endpoints: ArcSwap::from_pointee(endpoints),
            counter: AtomicU64::new(0),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn len(&self) -> usize {
        self.endpoints.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current endpoint list. The snapshot never changes once loaded.
    pub fn snapshot(&self) -> Arc<Vec<Endpoint>> {
        self.endpoints.load_full()
    }

    /// Flips the health flag of the endpoint at `index`.
    ///
    /// Returns `true` when the flag actually changed. Concurrent callers
    /// each see their own write applied on top of the latest list.
    pub(crate) fn set_disabled(&self, index: usize, disabled: bool) -> bool {
        let previous = self.endpoints.rcu(|current| {
            let mut next = Vec::clone(current);
            if let Some(endpoint) = next.get_mut(index) {
                endpoint.disabled = disabled;
            }
            next
        });

        let changed = previous
            .get(index)
            .map(|endpoint| endpoint.disabled != disabled)
            .unwrap_or(false);

        if changed {
            debug!(
                "Endpoint #{} of '{}' is now {}",
                index,
                self.domain,
                if disabled { "disabled" } else { "enabled" }
            );
        }

        changed
    }

    pub(crate) fn counter(&self) -> &AtomicU64 {
        &self.counter
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn server(last: u8) -> config::Server {
        config::Server::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 80)
    }

    #[test]
    fn test_initialize_defaults() {
        let pool = ServerPool::initialize(
            "custom.domain",
            vec![server(1), server(2).with_weight(3).as_backup()],
        )
        .unwrap();

        assert_eq!("custom.domain", pool.domain());
        assert_eq!(2, pool.len());

        let snapshot = pool.snapshot();
        assert_eq!(1, snapshot[0].weight);
        assert!(!snapshot[0].disabled);
        assert!(!snapshot[0].backup);
        assert_eq!(3, snapshot[1].weight);
        assert!(snapshot[1].backup);
        assert_eq!("10.0.0.2:80", snapshot[1].to_string());
    }

    #[test]
    fn test_initialize_rejects_bad_input() {
        assert!(ServerPool::initialize("custom.domain", vec![]).is_err());
        assert!(ServerPool::initialize("", vec![server(1)]).is_err());
        assert!(ServerPool::initialize("custom.domain", vec![server(1).with_weight(0)]).is_err());
    }

    #[test]
    fn test_set_disabled_is_copy_on_write() {
        let pool = ServerPool::initialize("custom.domain", vec![server(1), server(2)]).unwrap();
        let before = pool.snapshot();

        assert!(pool.set_disabled(1, true));
        assert!(!pool.set_disabled(1, true));

        // old snapshot is untouched
        assert!(!before[1].disabled);
        assert!(pool.snapshot()[1].disabled);
        assert!(!pool.snapshot()[0].disabled);

        assert!(pool.set_disabled(1, false));
        assert!(!pool.snapshot()[1].disabled);
    }

    #[test]
    fn test_set_disabled_out_of_range() {
        let pool = ServerPool::initialize("custom.domain", vec![server(1)]).unwrap();
        assert!(!pool.set_disabled(5, true));
        assert_eq!(1, pool.len());
    }
}
