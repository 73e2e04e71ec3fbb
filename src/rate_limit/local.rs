use super::store::{CounterStore, StoreError};
use super::types::UsageRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Local (in-memory) counter store for single-instance deployments.
///
/// Each update runs under the map shard's write lock for that key, so the
/// read/reset/increment step is atomic per key while unrelated keys on other
/// shards proceed in parallel.
#[derive(Clone, Default)]
pub struct LocalCounterStore {
    records: Arc<DashMap<String, UsageRecord>>,
}

impl LocalCounterStore {
    /// Create a new local counter store
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all records (for testing)
    #[cfg(test)]
    pub fn clear(&self) {
        self.records.clear();
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn increment(
        &self,
        key: &str,
        window_start_ms: u64,
        window_ms: u64,
    ) -> Result<UsageRecord, StoreError> {
        let mut entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!("Creating usage record for key: {}", key);
                UsageRecord::fresh(window_start_ms, window_ms)
            });

        entry.value_mut().hit(window_start_ms, window_ms);
        Ok(*entry.value())
    }

    async fn peek(&self, key: &str) -> Result<Option<UsageRecord>, StoreError> {
        Ok(self.records.get(key).map(|record| *record.value()))
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.records.remove(key);
        Ok(())
    }

    async fn evict_expired(&self, now_ms: u64, grace_ms: u64) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records
            .retain(|_, record| record.window_end_ms().saturating_add(grace_ms) > now_ms);
        Ok(before.saturating_sub(self.records.len()))
    }

    fn len(&self) -> Option<usize> {
        Some(self.records.len())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
