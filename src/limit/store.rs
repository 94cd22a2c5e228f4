//! Shared counter store collaborator boundary.
//!
//! The sliding-window log needs list push/trim/length/index-from-end with
//! per-key expiry; the token bucket needs one atomic read-refill-consume
//! primitive. [`RedisStore`] provides both over a managed connection, with
//! the bucket update running as a server-side script so concurrent callers
//! for the same key cannot race the compound operation.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::error::Result;

/// Storage operations the shared-backend counters are built on.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Number of entries in the timestamp log at `key`.
    async fn list_len(&self, key: &str) -> Result<u64>;

    /// The oldest (last) timestamp in the log, if any.
    async fn list_oldest(&self, key: &str) -> Result<Option<f64>>;

    /// Push `timestamp` as the newest entry, trim the log to `keep` entries,
    /// and refresh the key's expiry.
    async fn list_push_trim(
        &self,
        key: &str,
        timestamp: f64,
        keep: u64,
        ttl: Duration,
    ) -> Result<()>;

    /// Refresh the expiry of `key` so stale keys are garbage-collected.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Atomically refill the bucket at `key` to at most `capacity` tokens at
    /// `refill_rate` tokens/second since its last update, then consume
    /// `requested` tokens if available. Returns whether consumption happened.
    async fn bucket_take(
        &self,
        key: &str,
        capacity: f64,
        refill_rate: f64,
        requested: f64,
        ttl: Duration,
        now: f64,
    ) -> Result<bool>;
}

/// Current wall-clock time as fractional unix seconds.
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// Compound read-refill-compare-consume for one bucket. Runs server-side so
// two concurrent requests for the same key cannot both take the last slot.
const BUCKET_TAKE_SCRIPT: &str = r#"
local tokens = tonumber(redis.call('HGET', KEYS[1], 'tokens'))
local last = tonumber(redis.call('HGET', KEYS[1], 'last_refill'))
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local requested = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

if tokens == nil or last == nil then
  tokens = capacity
  last = now
end

local elapsed = now - last
if elapsed < 0 then
  elapsed = 0
end
tokens = tokens + elapsed * rate
if tokens > capacity then
  tokens = capacity
end

local allowed = 0
if tokens >= requested then
  tokens = tokens - requested
  allowed = 1
end

redis.call('HSET', KEYS[1], 'tokens', tokens, 'last_refill', now)
redis.call('EXPIRE', KEYS[1], ttl)
return allowed
"#;

/// Redis-backed shared store.
pub struct RedisStore {
    connection: ConnectionManager,
    bucket_script: redis::Script,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a PING.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        let mut conn = connection.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        debug!(url = %url, "Connected to shared rate limit store");

        Ok(Self {
            connection,
            bucket_script: redis::Script::new(BUCKET_TAKE_SCRIPT),
        })
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn list_len(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        let len: u64 = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn list_oldest(&self, key: &str) -> Result<Option<f64>> {
        let mut conn = self.connection.clone();
        let oldest: Option<f64> = redis::cmd("LINDEX")
            .arg(key)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        Ok(oldest)
    }

    async fn list_push_trim(
        &self,
        key: &str,
        timestamp: f64,
        keep: u64,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(key)
            .arg(timestamp)
            .ignore()
            .cmd("LTRIM")
            .arg(key)
            .arg(0)
            .arg(keep.saturating_sub(1) as i64)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn bucket_take(
        &self,
        key: &str,
        capacity: f64,
        refill_rate: f64,
        requested: f64,
        ttl: Duration,
        now: f64,
    ) -> Result<bool> {
        let mut conn = self.connection.clone();
        let allowed: i64 = self
            .bucket_script
            .key(key)
            .arg(capacity)
            .arg(refill_rate)
            .arg(requested)
            .arg(now)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(allowed == 1)
    }
}
