//! Read-only view of the inbound request consumed by admission control.
//!
//! The surrounding framework creates one identity per request and reads the
//! response status after the protected handler runs. Quotagate never owns or
//! persists these values beyond the request.

/// Identity of the caller behind an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    /// The caller's user id. Keys the legacy per-user tier.
    pub user_id: i64,
    /// The caller's group label, used to resolve per-user policy overrides.
    pub user_group: String,
    /// The API key the request was made with, if any. Absence skips all
    /// key-scoped tiers.
    pub key: Option<ApiKeyIdentity>,
}

/// An API-key identity with its group label.
///
/// The key group is distinct from the caller's group: per-key tiers resolve
/// policy by the key's group, the user tier by the caller's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyIdentity {
    /// Database id of the key. Keys the per-key tiers.
    pub id: i64,
    /// Group label assigned to the key.
    pub group: String,
}

impl RequestIdentity {
    /// Create an identity without an API key (legacy user tier only).
    pub fn for_user(user_id: i64, user_group: impl Into<String>) -> Self {
        Self {
            user_id,
            user_group: user_group.into(),
            key: None,
        }
    }

    /// Attach an API-key identity.
    pub fn with_key(mut self, id: i64, group: impl Into<String>) -> Self {
        self.key = Some(ApiKeyIdentity {
            id,
            group: group.into(),
        });
        self
    }
}

/// Outcome category of the protected handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    /// Handler completed with a non-error status (< 400)
    Success,
    /// Handler produced a 4xx status
    ClientError,
    /// Handler produced a 5xx status
    ServerError,
}

impl StatusCategory {
    /// Whether this outcome counts as an error for success-tier recording.
    pub fn is_error(&self) -> bool {
        !matches!(self, StatusCategory::Success)
    }

    /// Classify a numeric HTTP status code.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            0..=399 => StatusCategory::Success,
            400..=499 => StatusCategory::ClientError,
            _ => StatusCategory::ServerError,
        }
    }
}
