//! Quota counter trait for abstracting shared-store and in-process backends.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

use super::key::CounterKey;

/// The narrow counting capability every quota tier is built on.
///
/// Two implementations exist: [`SharedCounters`](super::SharedCounters) over
/// a cluster-wide store, and [`MemoryCounters`](super::MemoryCounters) for
/// single-instance deployments. The orchestrator selects one at startup and
/// never branches on backend type per call.
#[async_trait]
pub trait QuotaCounters: Send + Sync {
    /// Check the success-only counter without committing an event.
    ///
    /// Returns `Ok(false)` when the tier must throttle. `max_count == 0`
    /// always admits and touches no state.
    async fn check_success(
        &self,
        key: &CounterKey,
        max_count: i64,
        window: Duration,
    ) -> Result<bool>;

    /// Commit one successful event. Only called after the protected handler
    /// completed without error, never for a rejected check.
    async fn record_success(
        &self,
        key: &CounterKey,
        max_count: i64,
        window: Duration,
    ) -> Result<()>;

    /// Check-and-charge the total counter. The cost is taken at check time
    /// since this counter includes failures; there is no record phase.
    async fn check_total(&self, key: &CounterKey, max_count: i64, window: Duration)
        -> Result<bool>;
}
