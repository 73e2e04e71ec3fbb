use crate::identity::ClientIdentity;
use crate::policy::LimitTier;
use serde::{Deserialize, Serialize};

/// Counter key: one record per `(identity, tier)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Caller the counter belongs to
    pub identity: ClientIdentity,
    /// Tier whose quota is being consumed
    pub tier: LimitTier,
}

impl RateLimitKey {
    /// Create a new rate limit key
    pub fn new(identity: ClientIdentity, tier: LimitTier) -> Self {
        Self { identity, tier }
    }

    /// Convert to the key used by counter stores
    pub fn to_store_key(&self, prefix: &str) -> String {
        format!("{}:{}:{}", prefix, self.tier.as_str(), self.identity)
    }
}

/// Usage counter of one key within its current fixed window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Start of the window the count belongs to (epoch milliseconds)
    pub window_start_ms: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests counted in this window, admitted or not
    pub count: u64,
}

impl UsageRecord {
    /// A record for a window with nothing counted yet
    pub fn fresh(window_start_ms: u64, window_ms: u64) -> Self {
        Self {
            window_start_ms,
            window_ms,
            count: 0,
        }
    }

    pub fn window_end_ms(&self) -> u64 {
        self.window_start_ms.saturating_add(self.window_ms)
    }

    /// Move to `window_start_ms` if it is newer, zeroing the count, then count one request
    pub fn hit(&mut self, window_start_ms: u64, window_ms: u64) {
        if self.window_start_ms < window_start_ms {
            self.window_start_ms = window_start_ms;
            self.window_ms = window_ms;
            self.count = 0;
        }
        self.count += 1;
    }
}

/// The engine's answer for one key at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmitDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Quota of the tier
    pub limit: u64,
    /// Remaining requests in the current window
    pub remaining: u64,
    /// When the current window ends (epoch milliseconds)
    pub reset_at: u64,
    /// Seconds until the current window ends, rounded up
    pub reset_after: u64,
    /// Seconds the caller should wait (set only on denial)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl AdmitDecision {
    /// Create an allowed decision
    pub fn allowed(limit: u64, remaining: u64, reset_at: u64, now_ms: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            reset_after: seconds_until(reset_at, now_ms),
            retry_after: None,
        }
    }

    /// Create a denied decision
    pub fn denied(limit: u64, reset_at: u64, now_ms: u64) -> Self {
        let retry_after = seconds_until(reset_at, now_ms);
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            reset_after: retry_after,
            retry_after: Some(retry_after),
        }
    }
}

/// Whole seconds from `now_ms` to `deadline_ms`, rounded up and never below one
fn seconds_until(deadline_ms: u64, now_ms: u64) -> u64 {
    deadline_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_key_to_store_key() {
        let key = RateLimitKey::new(ClientIdentity::from("192.168.1.1-abc"), LimitTier::Strict);
        assert_eq!(
            key.to_store_key("admission:ratelimit"),
            "admission:ratelimit:strict:192.168.1.1-abc"
        );

        let exempt = RateLimitKey::new(ClientIdentity::from("x"), LimitTier::AdminExempt);
        assert_eq!(exempt.to_store_key("p"), "p:admin-exempt:x");
    }

    #[test]
    fn test_usage_record_hit_resets_on_new_window() {
        let mut record = UsageRecord::fresh(0, 1000);
        record.hit(0, 1000);
        record.hit(0, 1000);
        assert_eq!(record.count, 2);

        record.hit(1000, 1000);
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start_ms, 1000);
        assert_eq!(record.window_end_ms(), 2000);

        // An older window never rewinds the record
        record.hit(0, 1000);
        assert_eq!(record.count, 2);
        assert_eq!(record.window_start_ms, 1000);
    }

    #[test]
    fn test_admit_decision() {
        let allowed = AdmitDecision::allowed(100, 50, 60_000, 30_000);
        assert!(allowed.allowed);
        assert_eq!(allowed.remaining, 50);
        assert_eq!(allowed.reset_after, 30);
        assert_eq!(allowed.retry_after, None);

        let denied = AdmitDecision::denied(100, 60_000, 59_001);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after, Some(1));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let denied = AdmitDecision::denied(10, 10_000, 8_500);
        assert_eq!(denied.retry_after, Some(2));

        let at_boundary = AdmitDecision::denied(10, 10_000, 10_000);
        assert_eq!(at_boundary.retry_after, Some(1));
    }
}
