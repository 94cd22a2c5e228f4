//! Configuration management for Quotagate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::limit::QuotaScope;

/// Seconds in the fixed window of the key-daily tier.
const DAILY_WINDOW_SECS: u64 = 86_400;

/// Static limiter settings: one block per quota scope.
///
/// These are the scope defaults; per-group overrides live in the
/// [`PolicyStore`](crate::limit::PolicyStore) and are mutated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Legacy per-user tier (on by default once enabled, see `success_max`)
    #[serde(default = "default_user_scope")]
    pub user: ScopeSettings,

    /// Per-key minute tier
    #[serde(default)]
    pub key_minute: ScopeSettings,

    /// Per-key daily tier. `window_minutes` is ignored here; the window is a
    /// fixed 24 hours.
    #[serde(default)]
    pub key_daily: ScopeSettings,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            user: default_user_scope(),
            key_minute: ScopeSettings::default(),
            key_daily: ScopeSettings::default(),
        }
    }
}

/// Settings for a single quota scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeSettings {
    /// Whether this tier is evaluated at all
    #[serde(default)]
    pub enabled: bool,

    /// Enforcement window in minutes (user and key-minute scopes)
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,

    /// Maximum requests per window, failures included. 0 disables the
    /// total-count check.
    #[serde(default)]
    pub total_max: i64,

    /// Maximum successful requests per window. 0 disables the success-count
    /// check.
    #[serde(default)]
    pub success_max: i64,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            window_minutes: default_window_minutes(),
            total_max: 0,
            success_max: 0,
        }
    }
}

fn default_window_minutes() -> u64 {
    1
}

// The user scope predates the per-key tiers and keeps its historical default:
// the success counter is effectively on (large positive) unless configured
// otherwise, while the per-key scopes default to off (0).
fn default_user_scope() -> ScopeSettings {
    ScopeSettings {
        enabled: false,
        window_minutes: default_window_minutes(),
        total_max: 0,
        success_max: 1000,
    }
}

impl LimiterSettings {
    /// Load settings from a YAML file.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let settings: LimiterSettings = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::QuotagateError::Config(e.to_string()))?;
        Ok(settings)
    }

    /// The settings block for a scope.
    pub fn scope(&self, scope: QuotaScope) -> &ScopeSettings {
        match scope {
            QuotaScope::User => &self.user,
            QuotaScope::KeyMinute => &self.key_minute,
            QuotaScope::KeyDaily => &self.key_daily,
        }
    }

    /// The enforcement window for a scope. The daily scope is always 24 h
    /// regardless of its `window_minutes`.
    pub fn window(&self, scope: QuotaScope) -> Duration {
        match scope {
            QuotaScope::KeyDaily => Duration::from_secs(DAILY_WINDOW_SECS),
            _ => Duration::from_secs(self.scope(scope).window_minutes * 60),
        }
    }
}
