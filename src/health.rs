//! Channel-health gatekeeper.
//!
//! Decides whether an upstream channel should be disabled after an error.
//! Pure decision table: transient failures never disable, credential and
//! quota failures do.

use async_trait::async_trait;
use tracing::{info, warn};

/// Error message fragments that mark a transient upstream failure. These
/// never disable a channel, whatever the status code says.
const TRANSIENT_MARKERS: &[&str] = &[
    "no candidates returned",
    "deadline exceeded",
    "timeout",
    "connect",
    "do request failed",
    "provider returned error",
    "internal server error",
    "no response received",
];

/// An error reported by an upstream channel.
#[derive(Debug, Clone)]
pub struct UpstreamError {
    /// HTTP status the upstream answered with (0 when none was received)
    pub status: u16,
    /// Provider error classification, e.g. `insufficient_quota`
    pub kind: Option<String>,
    /// Raw error message
    pub message: String,
}

impl UpstreamError {
    /// Create an error from a status code and message.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            kind: None,
            message: message.into(),
        }
    }

    /// Attach the provider's error classification.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

/// Decide whether a channel should be disabled after `error`.
///
/// Returns false when automatic disabling is off or there is no error.
/// Transient markers win over status codes. 401 and 403 disable (credentials
/// invalid, access revoked); 429 never does (capacity, not failure); an
/// `insufficient_quota` classification disables; everything else is left
/// alone.
pub fn should_disable(auto_disable: bool, error: Option<&UpstreamError>) -> bool {
    if !auto_disable {
        return false;
    }
    let error = match error {
        Some(e) => e,
        None => return false,
    };

    let message = error.message.to_lowercase();
    if TRANSIENT_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
    {
        return false;
    }

    if error.status == 401 {
        return true;
    }
    if error.status == 429 {
        // too many requests
        return false;
    }
    if error.status == 403 {
        // forbidden
        return true;
    }
    if error.kind.as_deref() == Some("insufficient_quota") {
        return true;
    }
    false
}

/// Persistence collaborator that flips a channel's status.
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    /// Mark the channel as auto-disabled. Returns whether the update stuck.
    async fn set_auto_disabled(&self, channel_id: i64, reason: &str) -> bool;
}

/// A channel reference, enough to disable it and to log about it.
#[derive(Debug, Clone)]
pub struct ChannelRef {
    /// Database id of the channel
    pub id: i64,
    /// Human-readable channel name for logs
    pub name: String,
}

/// Disable a channel through the persistence collaborator.
///
/// Persistence failure is never raised; the outcome is only reported through
/// logging, since disablement is advisory housekeeping around an already
/// failed request.
pub async fn disable_channel(repo: &dyn ChannelRepository, channel: &ChannelRef, reason: &str) {
    if repo.set_auto_disabled(channel.id, reason).await {
        info!(
            channel_id = channel.id,
            channel = %channel.name,
            reason = %reason,
            "Channel disabled"
        );
    } else {
        warn!(
            channel_id = channel.id,
            channel = %channel.name,
            "Failed to disable channel"
        );
    }
}
