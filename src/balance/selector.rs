use std::sync::atomic::Ordering;

use log::{debug, warn};
use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

use crate::{
    core::{BalanceError, BalanceResult},
    internal_error,
};

use super::pool::{Endpoint, ServerPool};

static SELECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "dnslb_selections_total",
        "Number of endpoint selections by domain and tier",
        &["domain", "tier"]
    )
    .unwrap()
});

/// The subset of the pool a single pick is made from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Tier {
    /// Enabled, non-backup endpoints.
    Primary,
    /// Every enabled endpoint, backup included. Used only when `Primary` is empty.
    Fallback,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Primary => "primary",
            Tier::Fallback => "fallback",
        }
    }
}

/// Weighted round robin over a [`ServerPool`].
///
/// The selector keeps no state of its own; the rotation position is the
/// pool's counter. Each pick reduces the counter modulo the weight sum of
/// the tier it picks from and stores `target + 1`, so when the tier changes
/// between calls the rotation continues from the reduced position rather
/// than from a fixed round robin slot.
#[derive(Copy, Clone, Debug, Default)]
pub struct Selector;

impl Selector {
    /// Picks one endpoint, or fails with [`BalanceError::NoServerAvailable`].
    pub fn get(pool: &ServerPool) -> BalanceResult<Endpoint> {
        let snapshot = pool.snapshot();

        let Some((tier, candidates)) = eligible_tier(&snapshot) else {
            warn!("No server is usable for '{}'", pool.domain());
            return Err(BalanceError::NoServerAvailable(pool.domain().to_string()));
        };

        let weight_sum: u64 = candidates.iter().map(|e| e.weight as u64).sum();

        // single read-modify-write so concurrent pickers never share a slot
        let previous = match pool.counter().fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |counter| Some(counter % weight_sum + 1),
        ) {
            Ok(counter) | Err(counter) => counter,
        };
        let target = previous % weight_sum;

        let endpoint = weighted_pick(&candidates, target).ok_or_else(|| {
            internal_error!("target {} out of range for weight sum {}", target, weight_sum)
        })?;

        debug!(
            "Selected {} for '{}' from {} tier (target: {}, weight sum: {})",
            endpoint,
            pool.domain(),
            tier.as_str(),
            target,
            weight_sum
        );
        SELECTIONS
            .with_label_values(&[pool.domain(), tier.as_str()])
            .inc();

        Ok(endpoint.clone())
    }
}

/// Returns the tier the next pick comes from, or `None` if every endpoint is disabled.
pub fn eligible_tier(endpoints: &[Endpoint]) -> Option<(Tier, Vec<&Endpoint>)> {
    let primary: Vec<&Endpoint> = endpoints
        .iter()
        .filter(|e| e.is_primary_eligible())
        .collect();
    if !primary.is_empty() {
        return Some((Tier::Primary, primary));
    }

    let fallback: Vec<&Endpoint> = endpoints
        .iter()
        .filter(|e| e.is_fallback_eligible())
        .collect();
    if !fallback.is_empty() {
        return Some((Tier::Fallback, fallback));
    }

    None
}

/// First endpoint whose cumulative weight exceeds `target`, in stored order.
fn weighted_pick<'a>(candidates: &[&'a Endpoint], target: u64) -> Option<&'a Endpoint> {
    let mut cumulative = 0u64;
    for endpoint in candidates {
        cumulative += endpoint.weight as u64;
        if cumulative > target {
            return Some(endpoint);
        }
    }
    None
}
