//! Admission orchestration across quota tiers.
//!
//! Per request, tiers are evaluated strictly in sequence — key-minute,
//! key-daily, then the legacy user tier — short-circuiting on the first
//! rejection. A successful check yields an [`AdmissionPermit`] naming the
//! success counters that were consulted; after the protected handler runs,
//! [`AdmissionController::complete`] commits a success into exactly those
//! counters, and only when the outcome was not an error.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::LimiterSettings;
use crate::context::{RequestIdentity, StatusCategory};
use crate::error::{Result, ThrottleRejection};
use crate::limit::{CounterKey, Counting, PolicyStore, QuotaCounters, QuotaScope};

/// Coordinates the configured quota tiers around the protected request.
pub struct AdmissionController {
    settings: LimiterSettings,
    policies: Arc<PolicyStore>,
    counters: Arc<dyn QuotaCounters>,
}

/// Proof that every tier admitted one request.
///
/// Holds the success-tier counters that were actually checked. Consumed by
/// value in [`AdmissionController::complete`], so a completed request can
/// never be recorded twice; dropping it without completing (e.g. on
/// cancellation) records nothing.
#[derive(Debug)]
pub struct AdmissionPermit {
    success_targets: Vec<SuccessTarget>,
}

#[derive(Debug)]
struct SuccessTarget {
    key: CounterKey,
    max_count: i64,
    window: Duration,
}

impl AdmissionPermit {
    /// Whether the success tier of `scope` was checked for this request.
    pub fn covers(&self, scope: QuotaScope) -> bool {
        self.success_targets.iter().any(|t| t.key.scope == scope)
    }

    /// Number of success counters that will be recorded on completion.
    pub fn success_tier_count(&self) -> usize {
        self.success_targets.len()
    }
}

impl AdmissionController {
    /// Create a controller over the chosen counter backend.
    pub fn new(
        settings: LimiterSettings,
        policies: Arc<PolicyStore>,
        counters: Arc<dyn QuotaCounters>,
    ) -> Self {
        Self {
            settings,
            policies,
            counters,
        }
    }

    /// Decide whether the request may proceed to the protected handler.
    ///
    /// Tier order: key-minute, key-daily (both skipped when the request
    /// carries no API key), then the legacy user tier. Within a tier the
    /// success counter is checked before the total counter. Backend failures
    /// abort with [`QuotagateError::Backend`](crate::error::QuotagateError)
    /// and are never reported as throttling.
    pub async fn admit(&self, identity: &RequestIdentity) -> Result<AdmissionPermit> {
        let mut permit = AdmissionPermit {
            success_targets: Vec::new(),
        };

        if let Some(api_key) = &identity.key {
            for scope in [QuotaScope::KeyMinute, QuotaScope::KeyDaily] {
                self.check_tier(scope, api_key.id, &api_key.group, &mut permit)
                    .await?;
            }
        } else {
            trace!(user_id = identity.user_id, "No API key, skipping key tiers");
        }

        // The legacy user tier resolves policy by the caller's group, not
        // the key's group.
        self.check_tier(
            QuotaScope::User,
            identity.user_id,
            &identity.user_group,
            &mut permit,
        )
        .await?;

        Ok(permit)
    }

    async fn check_tier(
        &self,
        scope: QuotaScope,
        subject: i64,
        group: &str,
        permit: &mut AdmissionPermit,
    ) -> Result<()> {
        if !self.settings.scope(scope).enabled {
            return Ok(());
        }

        let limit = self.policies.resolve(scope, group);
        if limit.total_max == 0 && limit.success_max == 0 {
            return Ok(());
        }

        let window = self.settings.window(scope);
        trace!(
            scope = ?scope,
            subject = subject,
            group = group,
            total_max = limit.total_max,
            success_max = limit.success_max,
            overridden = limit.overridden,
            "Checking quota tier"
        );

        if limit.success_max > 0 {
            let key = CounterKey::new(scope, Counting::Success, subject);
            if !self
                .counters
                .check_success(&key, limit.success_max, window)
                .await?
            {
                debug!(scope = ?scope, subject = subject, "Success quota exceeded");
                return Err(ThrottleRejection {
                    scope,
                    counting: Counting::Success,
                    window_secs: window.as_secs(),
                    limit: limit.success_max,
                }
                .into());
            }
            permit.success_targets.push(SuccessTarget {
                key,
                max_count: limit.success_max,
                window,
            });
        }

        if limit.total_max > 0 {
            let key = CounterKey::new(scope, Counting::Total, subject);
            if !self
                .counters
                .check_total(&key, limit.total_max, window)
                .await?
            {
                debug!(scope = ?scope, subject = subject, "Total quota exceeded");
                return Err(ThrottleRejection {
                    scope,
                    counting: Counting::Total,
                    window_secs: window.as_secs(),
                    limit: limit.total_max,
                }
                .into());
            }
        }

        Ok(())
    }

    /// Commit the request's outcome.
    ///
    /// A non-error status records one success into each counter the permit
    /// covers, in tier order. The response is already decided by now, so
    /// record failures are logged and swallowed rather than propagated.
    pub async fn complete(&self, permit: AdmissionPermit, status: StatusCategory) {
        if status.is_error() {
            return;
        }

        for target in permit.success_targets {
            if let Err(e) = self
                .counters
                .record_success(&target.key, target.max_count, target.window)
                .await
            {
                warn!(
                    key = %target.key,
                    error = ?e,
                    "Failed to record success against quota counter"
                );
            }
        }
    }
}
