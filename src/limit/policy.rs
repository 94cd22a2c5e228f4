//! Hot-swappable per-group rate limit policy.
//!
//! Each scope carries its defaults from [`LimiterSettings`] plus a
//! group-override map that the administrative path replaces wholesale from a
//! JSON blob of shape `{ "<group>": [total_max, success_max], ... }`.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::error;

use crate::config::LimiterSettings;
use crate::error::{QuotagateError, Result};

use super::key::QuotaScope;

/// The resolved limits for one group within one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLimit {
    /// Maximum requests per window, failures included. 0 = off.
    pub total_max: i64,
    /// Maximum successful requests per window. 0 = off.
    pub success_max: i64,
    /// Whether a group override supplied these values
    pub overridden: bool,
}

struct ScopePolicy {
    total_default: i64,
    success_default: i64,
    overrides: RwLock<HashMap<String, [i64; 2]>>,
}

impl ScopePolicy {
    fn new(total_default: i64, success_default: i64) -> Self {
        Self {
            total_default,
            success_default,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    fn resolve(&self, group: &str) -> GroupLimit {
        let overrides = self.overrides.read();
        match overrides.get(group) {
            Some([total, success]) => GroupLimit {
                total_max: *total,
                success_max: *success,
                overridden: true,
            },
            None => GroupLimit {
                total_max: self.total_default,
                success_max: self.success_default,
                overridden: false,
            },
        }
    }
}

/// Process-wide rate limit policy, one override map per scope.
///
/// Readers (every request) take the read side of a `parking_lot::RwLock` and
/// never block each other; the administrative writer swaps a fully validated
/// map, so readers observe either the old or the new map in full.
pub struct PolicyStore {
    user: ScopePolicy,
    key_minute: ScopePolicy,
    key_daily: ScopePolicy,
}

impl PolicyStore {
    /// Create a store seeded with the scope defaults from `settings`.
    pub fn new(settings: &LimiterSettings) -> Self {
        Self {
            user: ScopePolicy::new(settings.user.total_max, settings.user.success_max),
            key_minute: ScopePolicy::new(
                settings.key_minute.total_max,
                settings.key_minute.success_max,
            ),
            key_daily: ScopePolicy::new(
                settings.key_daily.total_max,
                settings.key_daily.success_max,
            ),
        }
    }

    fn scope(&self, scope: QuotaScope) -> &ScopePolicy {
        match scope {
            QuotaScope::User => &self.user,
            QuotaScope::KeyMinute => &self.key_minute,
            QuotaScope::KeyDaily => &self.key_daily,
        }
    }

    /// Resolve the limits for a group: an explicit override always wins over
    /// the scope default, even when it is lower.
    pub fn resolve(&self, scope: QuotaScope, group: &str) -> GroupLimit {
        self.scope(scope).resolve(group)
    }

    /// Replace the override map for a scope from an administrative JSON blob.
    ///
    /// The blob is validated in full before anything is applied; on any
    /// validation failure the prior configuration remains in effect.
    pub fn update_overrides(&self, scope: QuotaScope, json: &str) -> Result<()> {
        let parsed: HashMap<String, [i64; 2]> = serde_json::from_str(json)
            .map_err(|e| QuotagateError::Config(format!("invalid rate limit overrides: {e}")))?;

        for (group, limits) in &parsed {
            validate_group_limits(scope, group, limits)?;
        }

        let mut overrides = self.scope(scope).overrides.write();
        *overrides = parsed;
        Ok(())
    }

    /// Serialize the current override map for administrative display.
    ///
    /// Serialization failure is logged, not propagated; callers receive an
    /// empty-object string.
    pub fn overrides_json(&self, scope: QuotaScope) -> String {
        let overrides = self.scope(scope).overrides.read();
        match serde_json::to_string(&*overrides) {
            Ok(json) => json,
            Err(e) => {
                error!(scope = ?scope, error = %e, "Failed to serialize rate limit overrides");
                "{}".to_string()
            }
        }
    }
}

fn validate_group_limits(scope: QuotaScope, group: &str, limits: &[i64; 2]) -> Result<()> {
    // The user scope predates the zero-means-off convention of the per-key
    // scopes: its success limit must stay at least 1.
    let success_floor = match scope {
        QuotaScope::User => 1,
        _ => 0,
    };

    if limits[0] < 0 || limits[1] < success_floor {
        return Err(QuotagateError::Config(format!(
            "group {} has out-of-range rate limit values: [{}, {}]",
            group, limits[0], limits[1]
        )));
    }
    if limits[0] > i32::MAX as i64 || limits[1] > i32::MAX as i64 {
        return Err(QuotagateError::Config(format!(
            "group {} [{}, {}] exceeds the maximum rate limit value {}",
            group,
            limits[0],
            limits[1],
            i32::MAX
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterSettings;

    fn store() -> PolicyStore {
        let mut settings = LimiterSettings::default();
        settings.user.total_max = 100;
        settings.user.success_max = 1000;
        settings.key_minute.total_max = 20;
        settings.key_minute.success_max = 10;
        PolicyStore::new(&settings)
    }

    #[test]
    fn test_resolve_defaults_without_override() {
        let store = store();
        let limit = store.resolve(QuotaScope::KeyMinute, "unknown");
        assert_eq!(limit.total_max, 20);
        assert_eq!(limit.success_max, 10);
        assert!(!limit.overridden);
    }

    #[test]
    fn test_override_wins_even_when_lower_than_default() {
        let store = store();
        store
            .update_overrides(QuotaScope::KeyMinute, r#"{"basic": [5, 2]}"#)
            .unwrap();

        let limit = store.resolve(QuotaScope::KeyMinute, "basic");
        assert_eq!(limit.total_max, 5);
        assert_eq!(limit.success_max, 2);
        assert!(limit.overridden);

        // Other groups keep the defaults.
        let other = store.resolve(QuotaScope::KeyMinute, "premium");
        assert_eq!(other.total_max, 20);
        assert!(!other.overridden);
    }

    #[test]
    fn test_update_replaces_whole_map() {
        let store = store();
        store
            .update_overrides(QuotaScope::KeyDaily, r#"{"a": [1, 1], "b": [2, 2]}"#)
            .unwrap();
        store
            .update_overrides(QuotaScope::KeyDaily, r#"{"b": [3, 3]}"#)
            .unwrap();

        assert!(!store.resolve(QuotaScope::KeyDaily, "a").overridden);
        assert_eq!(store.resolve(QuotaScope::KeyDaily, "b").total_max, 3);
    }

    #[test]
    fn test_negative_values_rejected_and_prior_config_kept() {
        let store = store();
        store
            .update_overrides(QuotaScope::KeyMinute, r#"{"ok": [5, 5]}"#)
            .unwrap();

        let err = store
            .update_overrides(QuotaScope::KeyMinute, r#"{"bad": [-1, 5]}"#)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bad"), "error should name the group: {msg}");
        assert!(msg.contains("-1"), "error should name the values: {msg}");

        // Prior overrides untouched.
        assert!(store.resolve(QuotaScope::KeyMinute, "ok").overridden);
    }

    #[test]
    fn test_values_above_i32_max_rejected() {
        let store = store();
        let err = store
            .update_overrides(QuotaScope::KeyMinute, r#"{"big": [2147483648, 1]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("big"));
    }

    #[test]
    fn test_user_scope_success_floor_is_one() {
        let store = store();
        // Zero success is valid for key scopes...
        store
            .update_overrides(QuotaScope::KeyMinute, r#"{"g": [5, 0]}"#)
            .unwrap();
        store
            .update_overrides(QuotaScope::KeyDaily, r#"{"g": [5, 0]}"#)
            .unwrap();
        // ...but not for the legacy user scope.
        assert!(store
            .update_overrides(QuotaScope::User, r#"{"g": [5, 0]}"#)
            .is_err());
        store
            .update_overrides(QuotaScope::User, r#"{"g": [5, 1]}"#)
            .unwrap();
    }

    #[test]
    fn test_malformed_json_rejected() {
        let store = store();
        assert!(store
            .update_overrides(QuotaScope::User, r#"{"g": [5]}"#)
            .is_err());
        assert!(store.update_overrides(QuotaScope::User, "not json").is_err());
    }

    #[test]
    fn test_overrides_json_round_trip() {
        let store = store();
        assert_eq!(store.overrides_json(QuotaScope::KeyMinute), "{}");

        store
            .update_overrides(QuotaScope::KeyMinute, r#"{"g": [7, 3]}"#)
            .unwrap();
        let json = store.overrides_json(QuotaScope::KeyMinute);
        let parsed: HashMap<String, [i64; 2]> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["g"], [7, 3]);
    }

    #[test]
    fn test_concurrent_readers_see_consistent_map() {
        use std::sync::Arc;

        let store = Arc::new(store());
        store
            .update_overrides(QuotaScope::KeyMinute, r#"{"g": [10, 10]}"#)
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    let limit = store.resolve(QuotaScope::KeyMinute, "g");
                    // Values always come from one blob, never a mix.
                    assert_eq!(limit.total_max, limit.success_max);
                }
            }));
        }
        for i in 0..500 {
            let v = (i % 50) + 1;
            store
                .update_overrides(QuotaScope::KeyMinute, &format!(r#"{{"g": [{v}, {v}]}}"#))
                .unwrap();
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
