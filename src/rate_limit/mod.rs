//! Rate limiting module
//!
//! Fixed window counters keyed by `(identity, tier)`, kept either in process
//! memory or in Redis:
//!
//! - **Local**: `DashMap` records, per-key atomic updates, background eviction
//! - **Redis**: one Lua script per check, shared by every instance of a fleet
//!
//! # Features
//!
//! - Admit/deny decisions with remaining quota and reset time
//! - Read-only snapshots and administrative resets
//! - Fail-open when the counter store errors or exceeds its timeout
//! - Rate limit headers in responses (`X-RateLimit-*`, `Retry-After`)
//!
//! The window boundary is a known weakness of the algorithm: a caller can get
//! up to twice the quota through by splitting a burst across two windows.
//!
//! # Example
//!
//! ```rust,no_run
//! use admission::identity::ClientIdentity;
//! use admission::policy::LimitTier;
//! use admission::rate_limit::RateLimiterService;
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Local-only rate limiter with the default tier quotas
//!     let service = RateLimiterService::local_only(HashMap::new());
//!
//!     let identity = ClientIdentity::from("203.0.113.7");
//!     let decision = service.check_limit(&identity, LimitTier::Normal).await;
//!     assert!(decision.allowed);
//! }
//! ```

pub mod clock;
pub mod local;
pub mod lua_scripts;
pub mod middleware;
pub mod redis;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use local::LocalCounterStore;
pub use middleware::{add_rate_limit_headers, apply_rate_limit_headers, create_rate_limit_response};
pub use self::redis::RedisCounterStore;
pub use service::RateLimiterService;
pub use store::{CounterStore, StoreError};
pub use types::{AdmitDecision, RateLimitKey, UsageRecord};
