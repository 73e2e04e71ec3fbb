use super::clock::{Clock, SystemClock};
use super::local::LocalCounterStore;
use super::redis::RedisCounterStore;
use super::store::{CounterStore, StoreError};
use super::types::{AdmitDecision, RateLimitKey, UsageRecord};
use crate::error::AdmissionError;
use crate::identity::ClientIdentity;
use crate::metrics;
use crate::policy::{LimitTier, TierConfig};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default bound on a single counter store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);

/// Default prefix of counter keys
pub const DEFAULT_KEY_PREFIX: &str = "admission:ratelimit";

/// Fixed window rate limiter over a pluggable counter store.
///
/// The service owns every usage record; callers only go through
/// [`check_limit`](Self::check_limit), [`get_limit_info`](Self::get_limit_info)
/// and [`reset_limit`](Self::reset_limit). When the store fails or times out
/// the request is admitted and the failure is logged.
pub struct RateLimiterService {
    store: Arc<dyn CounterStore>,
    tiers: HashMap<LimitTier, TierConfig>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    key_prefix: String,
}

impl RateLimiterService {
    /// Create a rate limiter over an explicit store and clock
    pub fn new(
        store: Arc<dyn CounterStore>,
        tiers: HashMap<LimitTier, TierConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            tiers,
            clock,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Create a new rate limiter service with local-only counters
    pub fn local_only(tiers: HashMap<LimitTier, TierConfig>) -> Self {
        info!("Initializing local-only rate limiter");
        Self::new(
            Arc::new(LocalCounterStore::new()),
            tiers,
            Arc::new(SystemClock),
        )
    }

    /// Create a new rate limiter service backed by Redis.
    ///
    /// Falls back to local counters when Redis cannot be reached at startup.
    pub async fn with_redis(
        tiers: HashMap<LimitTier, TierConfig>,
        redis_url: &str,
        grace: Duration,
    ) -> Self {
        info!("Initializing rate limiter with Redis backend");

        match RedisCounterStore::new(redis_url, grace).await {
            Ok(store) => match store.ping().await {
                Ok(_) => {
                    info!("Redis connection successful, using Redis as counter store");
                    Self::new(Arc::new(store), tiers, Arc::new(SystemClock))
                }
                Err(e) => {
                    warn!("Redis ping failed: {}, falling back to local counters", e);
                    Self::local_only(tiers)
                }
            },
            Err(e) => {
                warn!(
                    "Redis connection failed: {}, falling back to local counters",
                    e
                );
                Self::local_only(tiers)
            }
        }
    }

    /// Bound every store call by `timeout`
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Namespace store keys under `prefix`
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Window length and quota of `tier`
    pub fn tier_config(&self, tier: LimitTier) -> TierConfig {
        self.tiers
            .get(&tier)
            .copied()
            .unwrap_or_else(|| tier.default_config())
    }

    /// Count one request for `(identity, tier)` and decide whether to admit it
    pub async fn check_limit(&self, identity: &ClientIdentity, tier: LimitTier) -> AdmitDecision {
        let config = self.tier_config(tier);
        let now = self.clock.now_ms();
        let window_start = window_start(now, config.window_ms);
        let key = RateLimitKey::new(identity.clone(), tier);
        let store_key = key.to_store_key(&self.key_prefix);

        let record = match self
            .bounded(self.store.increment(&store_key, window_start, config.window_ms))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.report_failure("check", &key, e);
                return self.fail_open(config, window_start, now);
            }
        };

        let reset_at = record.window_end_ms();
        if record.count <= config.max_requests {
            let remaining = config.max_requests - record.count;
            debug!(
                identity = %identity,
                tier = %tier,
                remaining,
                "Rate limit check passed"
            );
            AdmitDecision::allowed(config.max_requests, remaining, reset_at, now)
        } else {
            warn!(
                identity = %identity,
                tier = %tier,
                count = record.count,
                "Rate limit exceeded"
            );
            metrics::record_rate_limit_exceeded(tier.as_str());
            AdmitDecision::denied(config.max_requests, reset_at, now)
        }
    }

    /// Report the current state of `(identity, tier)` without counting a request.
    ///
    /// `allowed` tells whether the next request would be admitted.
    pub async fn get_limit_info(
        &self,
        identity: &ClientIdentity,
        tier: LimitTier,
    ) -> AdmitDecision {
        let config = self.tier_config(tier);
        let now = self.clock.now_ms();
        let window_start = window_start(now, config.window_ms);
        let key = RateLimitKey::new(identity.clone(), tier);
        let store_key = key.to_store_key(&self.key_prefix);

        let record = match self.bounded(self.store.peek(&store_key)).await {
            Ok(Some(record)) if record.window_start_ms >= window_start => record,
            Ok(_) => UsageRecord::fresh(window_start, config.window_ms),
            Err(e) => {
                self.report_failure("info", &key, e);
                return self.fail_open(config, window_start, now);
            }
        };

        let reset_at = record.window_end_ms();
        if record.count < config.max_requests {
            AdmitDecision::allowed(
                config.max_requests,
                config.max_requests - record.count,
                reset_at,
                now,
            )
        } else {
            AdmitDecision::denied(config.max_requests, reset_at, now)
        }
    }

    /// Forget `(identity, tier)`; the next check starts a fresh window
    pub async fn reset_limit(&self, identity: &ClientIdentity, tier: LimitTier) {
        let key = RateLimitKey::new(identity.clone(), tier);
        let store_key = key.to_store_key(&self.key_prefix);

        match self.bounded(self.store.remove(&store_key)).await {
            Ok(()) => info!(identity = %identity, tier = %tier, "Rate limit reset"),
            Err(e) => self.report_failure("reset", &key, e),
        }
    }

    /// Drop records whose window ended more than `grace` ago
    pub async fn evict_expired(&self, grace: Duration) -> usize {
        let now = self.clock.now_ms();
        match self
            .bounded(self.store.evict_expired(now, grace.as_millis() as u64))
            .await
        {
            Ok(evicted) => {
                if evicted > 0 {
                    debug!(evicted, store = self.store.name(), "Evicted stale usage records");
                }
                metrics::record_evicted_records(evicted as u64);
                if let Some(len) = self.store.len() {
                    metrics::record_usage_records(len);
                }
                evicted
            }
            Err(e) => {
                metrics::record_store_failure("evict");
                error!(error = %AdmissionError::from(e), "Usage record eviction failed");
                0
            }
        }
    }

    /// Run [`evict_expired`](Self::evict_expired) every `interval` in the background
    pub fn spawn_eviction(self: &Arc<Self>, interval: Duration, grace: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.evict_expired(grace).await;
            }
        })
    }

    /// Number of usage records held by the store, if known
    pub fn active_records(&self) -> Option<usize> {
        self.store.len()
    }

    /// Name of the counter store backend
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.store_timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout(self.store_timeout))?
    }

    fn report_failure(&self, operation: &'static str, key: &RateLimitKey, err: StoreError) {
        metrics::record_store_failure(operation);
        error!(
            error = %AdmissionError::from(err),
            operation,
            store = self.store.name(),
            identity = %key.identity,
            tier = %key.tier,
            "Counter store unavailable, admitting request"
        );
    }

    fn fail_open(&self, config: TierConfig, window_start: u64, now: u64) -> AdmitDecision {
        AdmitDecision::allowed(
            config.max_requests,
            config.max_requests,
            window_start.saturating_add(config.window_ms),
            now,
        )
    }
}

/// Start of the fixed window containing `now_ms`
pub fn window_start(now_ms: u64, window_ms: u64) -> u64 {
    if window_ms == 0 {
        return now_ms;
    }
    now_ms / window_ms * window_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;
    use async_trait::async_trait;

    const WINDOW_MS: u64 = 60_000;

    fn tiers(max_requests: u64) -> HashMap<LimitTier, TierConfig> {
        LimitTier::ALL
            .iter()
            .map(|tier| {
                (
                    *tier,
                    TierConfig {
                        window_ms: WINDOW_MS,
                        max_requests,
                    },
                )
            })
            .collect()
    }

    fn service_with_clock(max_requests: u64) -> (RateLimiterService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10 * WINDOW_MS));
        let service = RateLimiterService::new(
            Arc::new(LocalCounterStore::new()),
            tiers(max_requests),
            clock.clone(),
        );
        (service, clock)
    }

    fn identity(s: &str) -> ClientIdentity {
        ClientIdentity::from(s)
    }

    /// A store whose every call fails
    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn increment(&self, _: &str, _: u64, _: u64) -> Result<UsageRecord, StoreError> {
            Err(StoreError::Protocol("connection refused".to_string()))
        }

        async fn peek(&self, _: &str) -> Result<Option<UsageRecord>, StoreError> {
            Err(StoreError::Protocol("connection refused".to_string()))
        }

        async fn remove(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Protocol("connection refused".to_string()))
        }

        async fn evict_expired(&self, _: u64, _: u64) -> Result<usize, StoreError> {
            Err(StoreError::Protocol("connection refused".to_string()))
        }

        fn len(&self) -> Option<usize> {
            None
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    /// A store that never answers
    struct HangingStore;

    #[async_trait]
    impl CounterStore for HangingStore {
        async fn increment(&self, _: &str, _: u64, _: u64) -> Result<UsageRecord, StoreError> {
            std::future::pending().await
        }

        async fn peek(&self, _: &str) -> Result<Option<UsageRecord>, StoreError> {
            std::future::pending().await
        }

        async fn remove(&self, _: &str) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn evict_expired(&self, _: u64, _: u64) -> Result<usize, StoreError> {
            std::future::pending().await
        }

        fn len(&self) -> Option<usize> {
            None
        }

        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    #[test]
    fn test_window_start() {
        assert_eq!(window_start(0, 1000), 0);
        assert_eq!(window_start(999, 1000), 0);
        assert_eq!(window_start(1000, 1000), 1000);
        assert_eq!(window_start(2500, 1000), 2000);
    }

    #[tokio::test]
    async fn test_exactly_max_requests_admitted() {
        let (service, _clock) = service_with_clock(5);
        let id = identity("192.168.1.1");

        for i in 0..5 {
            let decision = service.check_limit(&id, LimitTier::Normal).await;
            assert!(decision.allowed, "Request {} should be allowed", i);
            assert_eq!(decision.remaining, 4 - i);
        }

        let decision = service.check_limit(&id, LimitTier::Normal).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.retry_after.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_retry_after_counts_to_window_end() {
        let (service, clock) = service_with_clock(1);
        let id = identity("192.168.1.1");

        service.check_limit(&id, LimitTier::Strict).await;
        clock.advance(Duration::from_millis(15_500));

        let decision = service.check_limit(&id, LimitTier::Strict).await;
        assert!(!decision.allowed);
        // 44.5s left in the window, rounded up
        assert_eq!(decision.retry_after, Some(45));
        assert_eq!(decision.reset_at, 11 * WINDOW_MS);
    }

    #[tokio::test]
    async fn test_new_window_restores_quota() {
        let (service, clock) = service_with_clock(3);
        let id = identity("192.168.1.1");

        for _ in 0..4 {
            service.check_limit(&id, LimitTier::Normal).await;
        }
        assert!(!service.check_limit(&id, LimitTier::Normal).await.allowed);

        clock.advance(Duration::from_millis(WINDOW_MS));

        let decision = service.check_limit(&id, LimitTier::Normal).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn test_reset_limit_starts_fresh() {
        let (service, _clock) = service_with_clock(3);
        let id = identity("192.168.1.1");

        for _ in 0..5 {
            service.check_limit(&id, LimitTier::Normal).await;
        }

        service.reset_limit(&id, LimitTier::Normal).await;

        let decision = service.check_limit(&id, LimitTier::Normal).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn test_get_limit_info_does_not_consume_quota() {
        let (service, _clock) = service_with_clock(3);
        let id = identity("192.168.1.1");

        let fresh = service.get_limit_info(&id, LimitTier::Normal).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 3);

        service.check_limit(&id, LimitTier::Normal).await;

        let first = service.get_limit_info(&id, LimitTier::Normal).await;
        let second = service.get_limit_info(&id, LimitTier::Normal).await;
        assert_eq!(first, second);
        assert_eq!(first.remaining, 2);

        let decision = service.check_limit(&id, LimitTier::Normal).await;
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test]
    async fn test_get_limit_info_when_exhausted() {
        let (service, _clock) = service_with_clock(2);
        let id = identity("192.168.1.1");

        service.check_limit(&id, LimitTier::Normal).await;
        service.check_limit(&id, LimitTier::Normal).await;

        let info = service.get_limit_info(&id, LimitTier::Normal).await;
        assert!(!info.allowed);
        assert_eq!(info.remaining, 0);
        assert!(info.retry_after.is_some());
    }

    #[tokio::test]
    async fn test_get_limit_info_ignores_stale_window() {
        let (service, clock) = service_with_clock(2);
        let id = identity("192.168.1.1");

        service.check_limit(&id, LimitTier::Normal).await;
        service.check_limit(&id, LimitTier::Normal).await;
        clock.advance(Duration::from_millis(WINDOW_MS));

        let info = service.get_limit_info(&id, LimitTier::Normal).await;
        assert!(info.allowed);
        assert_eq!(info.remaining, 2);
    }

    #[tokio::test]
    async fn test_identities_and_tiers_are_independent() {
        let (service, _clock) = service_with_clock(2);
        let a = identity("192.168.1.1");
        let b = identity("192.168.1.2");

        for _ in 0..3 {
            service.check_limit(&a, LimitTier::Normal).await;
        }
        assert!(!service.check_limit(&a, LimitTier::Normal).await.allowed);

        let other_identity = service.check_limit(&b, LimitTier::Normal).await;
        assert!(other_identity.allowed);
        assert_eq!(other_identity.remaining, 1);

        let other_tier = service.check_limit(&a, LimitTier::Strict).await;
        assert!(other_tier.allowed);
        assert_eq!(other_tier.remaining, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_checks_never_over_admit() {
        let max = 20u64;
        let extra = 30u64;
        let (service, _clock) = service_with_clock(max);
        let service = Arc::new(service);
        let barrier = Arc::new(tokio::sync::Barrier::new((max + extra) as usize));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..(max + extra) {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            tasks.spawn(async move {
                barrier.wait().await;
                service
                    .check_limit(&ClientIdentity::from("shared"), LimitTier::Normal)
                    .await
                    .allowed
            });
        }

        let mut admitted = 0;
        let mut denied = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                admitted += 1;
            } else {
                denied += 1;
            }
        }

        assert_eq!(admitted, max);
        assert_eq!(denied, extra);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let service = RateLimiterService::new(
            Arc::new(BrokenStore),
            tiers(1),
            Arc::new(ManualClock::new(0)),
        );
        let id = identity("192.168.1.1");

        for _ in 0..5 {
            let decision = service.check_limit(&id, LimitTier::Normal).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 1);
        }

        assert!(service.get_limit_info(&id, LimitTier::Normal).await.allowed);
        service.reset_limit(&id, LimitTier::Normal).await;
        assert_eq!(service.evict_expired(Duration::from_secs(1)).await, 0);
    }

    #[tokio::test]
    async fn test_store_timeout_fails_open() {
        let service = RateLimiterService::new(
            Arc::new(HangingStore),
            tiers(1),
            Arc::new(ManualClock::new(0)),
        )
        .with_store_timeout(Duration::from_millis(10));

        let decision = service
            .check_limit(&identity("192.168.1.1"), LimitTier::Normal)
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_eviction_removes_stale_records() {
        let (service, clock) = service_with_clock(5);

        service.check_limit(&identity("a"), LimitTier::Normal).await;
        service.check_limit(&identity("b"), LimitTier::Strict).await;
        assert_eq!(service.active_records(), Some(2));

        // Still inside the grace period
        clock.advance(Duration::from_millis(WINDOW_MS + 1_000));
        assert_eq!(service.evict_expired(Duration::from_secs(5)).await, 0);

        clock.advance(Duration::from_millis(5_000));
        assert_eq!(service.evict_expired(Duration::from_secs(5)).await, 2);
        assert_eq!(service.active_records(), Some(0));

        // An evicted key behaves like a new one
        let decision = service.check_limit(&identity("a"), LimitTier::Normal).await;
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn test_unconfigured_tier_uses_defaults() {
        let service = RateLimiterService::local_only(HashMap::new());
        assert_eq!(service.tier_config(LimitTier::Strict).max_requests, 10);
        assert_eq!(service.store_name(), "local");
    }
}
