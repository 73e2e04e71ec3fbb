use super::types::UsageRecord;
use crate::error::AdmissionError;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failures of the backing counter store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Unexpected store reply: {0}")]
    Protocol(String),
}

impl From<StoreError> for AdmissionError {
    fn from(err: StoreError) -> Self {
        AdmissionError::StoreUnavailable(err.to_string())
    }
}

/// Storage for usage counters.
///
/// `increment` is the whole read/reset/increment step for one key and must be
/// atomic per key: two concurrent calls for the same key observe distinct
/// counts. Calls for different keys must not serialize on a shared lock.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one request against `key` in the window starting at `window_start_ms`.
    ///
    /// A missing record, or one from an older window, is reset to zero first.
    /// Returns the record after the increment.
    async fn increment(
        &self,
        key: &str,
        window_start_ms: u64,
        window_ms: u64,
    ) -> Result<UsageRecord, StoreError>;

    /// Read a record without changing it
    async fn peek(&self, key: &str) -> Result<Option<UsageRecord>, StoreError>;

    /// Delete a record
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Drop records whose window ended at least `grace_ms` before `now_ms`
    async fn evict_expired(&self, now_ms: u64, grace_ms: u64) -> Result<usize, StoreError>;

    /// Number of records held, when the store can tell cheaply
    fn len(&self) -> Option<usize>;

    /// Short backend name used in logs
    fn name(&self) -> &'static str;
}
