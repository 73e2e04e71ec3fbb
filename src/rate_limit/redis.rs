use super::lua_scripts::FIXED_WINDOW_SCRIPT;
use super::store::{CounterStore, StoreError};
use super::types::UsageRecord;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::time::Duration;
use tracing::debug;

/// Redis-backed counter store shared by every instance of a fleet
///
/// Keys carry a TTL of one window plus the eviction grace, so stale records
/// expire server-side and `evict_expired` has nothing to do.
pub struct RedisCounterStore {
    /// Redis connection manager (cloned per call; multiplexed underneath)
    connection: ConnectionManager,
    /// Pre-hashed fixed window script
    script: Script,
    /// Extra lifetime of a key past its window end
    grace: Duration,
}

impl RedisCounterStore {
    /// Create a new Redis counter store
    pub async fn new(redis_url: &str, grace: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            script: Script::new(FIXED_WINDOW_SCRIPT),
            grace,
        })
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut connection)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(
        &self,
        key: &str,
        window_start_ms: u64,
        window_ms: u64,
    ) -> Result<UsageRecord, StoreError> {
        let mut connection = self.connection.clone();
        let ttl_ms = window_ms.saturating_add(self.grace.as_millis() as u64);

        let result = self
            .script
            .key(key)
            .arg(window_start_ms)
            .arg(window_ms)
            .arg(ttl_ms)
            .invoke_async::<_, Vec<u64>>(&mut connection)
            .await?;

        let record = match result.as_slice() {
            [start, window, count] => UsageRecord {
                window_start_ms: *start,
                window_ms: *window,
                count: *count,
            },
            other => {
                return Err(StoreError::Protocol(format!(
                    "expected 3 values from fixed window script, got {}",
                    other.len()
                )))
            }
        };

        debug!(
            "Fixed window update for key {}: window_start={}, count={}",
            key, record.window_start_ms, record.count
        );

        Ok(record)
    }

    async fn peek(&self, key: &str) -> Result<Option<UsageRecord>, StoreError> {
        let mut connection = self.connection.clone();
        let (start, window, count) = redis::cmd("HMGET")
            .arg(key)
            .arg("window_start")
            .arg("window")
            .arg("count")
            .query_async::<_, (Option<u64>, Option<u64>, Option<u64>)>(&mut connection)
            .await?;

        Ok(match (start, window, count) {
            (Some(window_start_ms), Some(window_ms), Some(count)) => Some(UsageRecord {
                window_start_ms,
                window_ms,
                count,
            }),
            _ => None,
        })
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut connection)
            .await?;
        Ok(())
    }

    async fn evict_expired(&self, _now_ms: u64, _grace_ms: u64) -> Result<usize, StoreError> {
        Ok(0)
    }

    fn len(&self) -> Option<usize> {
        None
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
