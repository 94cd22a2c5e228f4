//! Counter key generation and handling.

use std::fmt;

/// The identity dimension a quota tier keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaScope {
    /// Legacy per-user tier, keyed by caller user id
    User,
    /// Per-key tier with a minute-granularity window
    KeyMinute,
    /// Per-key tier with a fixed 24 h window
    KeyDaily,
}

impl QuotaScope {
    /// Short tag used in counter keys. Tags are unique per scope so keys
    /// from different tiers never collide.
    pub fn tag(&self) -> &'static str {
        match self {
            QuotaScope::User => "usr",
            QuotaScope::KeyMinute => "kmin",
            QuotaScope::KeyDaily => "kday",
        }
    }

    /// Human wording used in throttling messages.
    pub fn describe(&self) -> &'static str {
        match self {
            QuotaScope::User => "user",
            QuotaScope::KeyMinute => "key minute",
            QuotaScope::KeyDaily => "key daily",
        }
    }
}

/// Which events a counter tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counting {
    /// Every admitted check, failures included
    Total,
    /// Only requests whose handler completed without error
    Success,
}

impl Counting {
    fn tag(&self) -> &'static str {
        match self {
            Counting::Total => "t",
            Counting::Success => "s",
        }
    }
}

/// A key that uniquely identifies one counter in either backend.
///
/// Composed of a scope tag, a counting tag, and the caller/key identity, so
/// tiers and sub-counters never share state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The quota scope this counter enforces
    pub scope: QuotaScope,
    /// Total or success-only counting
    pub counting: Counting,
    /// The user id or key id the counter belongs to
    pub subject: i64,
}

impl CounterKey {
    /// Create a new counter key.
    pub fn new(scope: QuotaScope, counting: Counting, subject: i64) -> Self {
        Self {
            scope,
            counting,
            subject,
        }
    }

    /// A disposable probe key derived from this one.
    ///
    /// The in-process fallback fuses check and record, so "check without
    /// committing" is emulated against this key while the real key only sees
    /// committed events.
    pub fn probe(&self) -> String {
        format!("{}:probe", self)
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ratelimit:{}:{}:{}",
            self.scope.tag(),
            self.counting.tag(),
            self.subject
        )
    }
}
