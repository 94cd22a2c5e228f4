//! In-process fallback limiter.
//!
//! Drop-in functional equivalent of the shared-backend counters for
//! deployments without a shared store. Check and record are fused into a
//! single [`MemoryLimiter::request`] call, so tiers that need "check without
//! committing" probe a disposable key and commit against the real one. The
//! probe key's state drifts from the real key's over time, making the
//! in-process success check an estimate; the shared backend does not have
//! this limitation. See `test_probe_key_estimate_diverges`.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::Result;

use super::backend::QuotaCounters;
use super::key::CounterKey;

/// Windowed request counter with fused check-and-record.
///
/// Safe for concurrent invocation from many tasks; entries lock per key, so
/// unrelated keys never serialize against each other.
pub struct MemoryLimiter {
    entries: DashMap<String, Mutex<VecDeque<Instant>>>,
    /// Keys idle longer than this are dropped by [`purge_expired`](Self::purge_expired).
    expiration: Duration,
}

impl MemoryLimiter {
    /// Create a limiter. `expiration` bounds how long an idle key's log is
    /// retained and should be at least the longest enforcement window in use.
    pub fn new(expiration: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            expiration,
        }
    }

    /// Check and record in one atomic step.
    ///
    /// Admits and counts the event unless `max_count` occurrences already
    /// sit inside the rolling `window`; a rejected call records nothing.
    /// `max_count == 0` always admits and touches no state.
    pub fn request(&self, key: &str, max_count: i64, window: Duration) -> bool {
        if max_count <= 0 {
            return true;
        }

        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut log = entry.lock();

        let now = Instant::now();
        while let Some(oldest) = log.front() {
            if now.duration_since(*oldest) >= window {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() as i64 >= max_count {
            return false;
        }
        log.push_back(now);
        true
    }

    /// Drop keys whose newest event is older than the configured expiration.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| {
            let log = entry.lock();
            match log.back() {
                Some(newest) => now.duration_since(*newest) < self.expiration,
                None => false,
            }
        });
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

/// [`QuotaCounters`] over a [`MemoryLimiter`].
pub struct MemoryCounters {
    limiter: MemoryLimiter,
}

impl MemoryCounters {
    /// Create in-process counters. `expiration` follows
    /// [`MemoryLimiter::new`]; pass the longest window in use (24 h when the
    /// daily tier is on).
    pub fn new(expiration: Duration) -> Self {
        Self {
            limiter: MemoryLimiter::new(expiration),
        }
    }

    /// Access the underlying limiter, e.g. to run periodic purges.
    pub fn limiter(&self) -> &MemoryLimiter {
        &self.limiter
    }
}

#[async_trait]
impl QuotaCounters for MemoryCounters {
    async fn check_success(
        &self,
        key: &CounterKey,
        max_count: i64,
        window: Duration,
    ) -> Result<bool> {
        // Fused check-and-record: probe a throwaway key so the real success
        // counter only ever sees committed events.
        Ok(self.limiter.request(&key.probe(), max_count, window))
    }

    async fn record_success(
        &self,
        key: &CounterKey,
        max_count: i64,
        window: Duration,
    ) -> Result<()> {
        self.limiter.request(&key.to_string(), max_count, window);
        Ok(())
    }

    async fn check_total(
        &self,
        key: &CounterKey,
        max_count: i64,
        window: Duration,
    ) -> Result<bool> {
        Ok(self.limiter.request(&key.to_string(), max_count, window))
    }
}
