//! Periodic health checking of the endpoint pool.
//!
//! Every tick the monitor probes each endpoint concurrently. Outcomes are
//! applied to the pool as they arrive: a fulfilled probe enables the
//! endpoint, a rejected one disables it. Probes never block a tick, so
//! rounds may overlap; [`SettlementPolicy`] decides what happens when an
//! older round settles after a newer one.

pub mod probe;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

use crate::{
    balance::{Endpoint, ServerPool},
    config::{self, SettlementPolicy},
    core::BalanceError,
};

pub use probe::{Probe, ProbeError, ProbeResult, TcpProbe};

static PROBE_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "dnslb_probe_results_total",
        "Number of settled health probes by domain and outcome",
        &["domain", "outcome"]
    )
    .unwrap()
});

/// Shortest tick period the monitor runs with.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Debug)]
pub struct HealthCheckOptions {
    pub interval: Duration,
    /// `None` lets a probe run forever; the endpoint keeps its last state meanwhile.
    pub timeout: Option<Duration>,
    pub settlement: SettlementPolicy,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self::from(&config::HealthCheck::default())
    }
}

impl From<&config::HealthCheck> for HealthCheckOptions {
    fn from(value: &config::HealthCheck) -> Self {
        Self {
            interval: value.interval(),
            timeout: value.timeout(),
            settlement: value.settlement,
        }
    }
}

pub struct HealthMonitor {
    pool: Arc<ServerPool>,
    probe: Arc<dyn Probe>,
    options: HealthCheckOptions,
    // newest round applied per endpoint, only consulted for `LatestRound`
    applied_rounds: Mutex<Vec<u64>>,
}

impl HealthMonitor {
    /// A zero `interval` is raised to [`MIN_INTERVAL`].
    pub fn new(
        pool: Arc<ServerPool>,
        probe: Arc<dyn Probe>,
        mut options: HealthCheckOptions,
    ) -> Self {
        if options.interval < MIN_INTERVAL {
            warn!(
                "Health check interval {:?} for '{}' is too short, using {:?}",
                options.interval,
                pool.domain(),
                MIN_INTERVAL
            );
            options.interval = MIN_INTERVAL;
        }
        let applied_rounds = Mutex::new(vec![0; pool.len()]);
        Self {
            pool,
            probe,
            options,
            applied_rounds,
        }
    }

    /// Spawns the tick loop on the current tokio runtime.
    ///
    /// The first round runs one interval after the call.
    pub fn start(self) -> HealthCheckHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let domain = self.pool.domain().to_string();

        info!(
            "Starting health check for '{}' every {:?} (timeout: {:?}, settlement: {:?})",
            domain, self.options.interval, self.options.timeout, self.options.settlement
        );

        let monitor = Arc::new(self);
        let task = tokio::spawn(monitor.run(shutdown_rx));

        HealthCheckHandle {
            domain,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.options.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut round = 0u64;
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Health check for '{}' received shutdown signal", self.pool.domain());
                        break;
                    }
                }
                _ = ticker.tick() => {
                    round += 1;
                    self.dispatch(round);
                }
            }
        }

        info!("Health check for '{}' stopped", self.pool.domain());
    }

    /// Fires one probe per endpoint without waiting for any of them.
    fn dispatch(self: &Arc<Self>, round: u64) {
        let snapshot = self.pool.snapshot();
        debug!(
            "Health check round {} for '{}': probing {} endpoints",
            round,
            self.pool.domain(),
            snapshot.len()
        );

        for (index, endpoint) in snapshot.iter().enumerate() {
            let monitor = self.clone();
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                let outcome = monitor.probe_once(endpoint.clone()).await;
                monitor.settle(index, round, &endpoint, outcome);
            });
        }
    }

    async fn probe_once(&self, endpoint: Endpoint) -> ProbeResult {
        match self.options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.probe.probe(endpoint))
                .await
                .unwrap_or_else(|_| {
                    Err(BalanceError::HealthCheck(format!("probe timed out after {timeout:?}")).into())
                }),
            None => self.probe.probe(endpoint).await,
        }
    }

    fn settle(&self, index: usize, round: u64, endpoint: &Endpoint, outcome: ProbeResult) {
        let domain = self.pool.domain();

        // held across the check and the write so a newer round cannot slip in between
        let mut applied_rounds = self
            .applied_rounds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.options.settlement == SettlementPolicy::LatestRound {
            if let Some(latest) = applied_rounds.get_mut(index) {
                if *latest > round {
                    debug!(
                        "Dropping round {} result for {} of '{}', round {} already applied",
                        round, endpoint, domain, latest
                    );
                    PROBE_RESULTS.with_label_values(&[domain, "stale"]).inc();
                    return;
                }
                *latest = round;
            }
        }

        match outcome {
            Ok(()) => {
                PROBE_RESULTS.with_label_values(&[domain, "healthy"]).inc();
                if self.pool.set_disabled(index, false) {
                    info!("Endpoint {} of '{}' passed health check, enabled", endpoint, domain);
                }
            }
            Err(e) => {
                PROBE_RESULTS.with_label_values(&[domain, "unhealthy"]).inc();
                if self.pool.set_disabled(index, true) {
                    warn!("Endpoint {} of '{}' failed health check, disabled: {}", endpoint, domain, e);
                } else {
                    debug!("Endpoint {} of '{}' still unhealthy: {}", endpoint, domain, e);
                }
            }
        }
    }
}

/// Cancels the tick schedule when told to, or when dropped.
///
/// Probes already dispatched are not cancelled and may still update the
/// pool after [`HealthCheckHandle::cancel`].
#[must_use = "dropping the handle cancels the health check"]
pub struct HealthCheckHandle {
    domain: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HealthCheckHandle {
    pub fn cancel(&self) {
        if !self.shutdown.send_replace(true) {
            debug!("Cancelling health check for '{}'", self.domain);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for HealthCheckHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
