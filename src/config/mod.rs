use crate::cors::CorsConfig;
use crate::error::{AdmissionError, Result};
use crate::identity::IdentityConfig;
use crate::metrics::MetricsConfig;
use crate::policy::{LimitTier, TierConfig, TierRule};
use crate::rate_limit::service::{DEFAULT_KEY_PREFIX, DEFAULT_STORE_TIMEOUT};
use crate::security::SecurityConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main admission configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Client identity derivation
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Quota per tier (unlisted tiers keep their defaults)
    #[serde(default)]
    pub tiers: HashMap<LimitTier, TierConfig>,
    /// Ordered path rules selecting a tier
    #[serde(default)]
    pub rules: Vec<TierRule>,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    /// CORS allow-policy
    #[serde(default)]
    pub cors: CorsConfig,
    /// Response hardening headers
    #[serde(default)]
    pub security: SecurityConfig,
    /// Downstream application admitted requests are forwarded to
    #[serde(default)]
    pub upstream: Option<UpstreamConfig>,
    /// Inspection/reset endpoints
    #[serde(default)]
    pub admin: AdminConfig,
    /// Prometheus endpoint
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Counter store backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Local,
    Redis,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Where counters live
    #[serde(default)]
    pub store: StoreKind,
    /// Redis configuration for distributed rate limiting
    #[serde(default)]
    pub redis: Option<RateLimitRedisConfig>,
    /// Bound on each counter store call, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// How often stale records are swept, in seconds
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,
    /// How long a record outlives its window before it may be swept, in seconds
    #[serde(default = "default_eviction_grace")]
    pub eviction_grace_secs: u64,
    /// Namespace of counter keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Redis configuration for rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRedisConfig {
    /// Redis connection URL
    pub url: String,
}

/// Downstream application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL admitted requests are forwarded to
    pub url: String,
}

/// Inspection/reset endpoint configuration
///
/// The endpoints share the client-facing listener, so they stay unmounted
/// unless `enabled` is set explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_admin_path")]
    pub path: String,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT.as_millis() as u64
}

fn default_eviction_interval() -> u64 {
    60
}

fn default_eviction_grace() -> u64 {
    60
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_admin_path() -> String {
    "/admin/rate-limit".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store: StoreKind::default(),
            redis: None,
            store_timeout_ms: default_store_timeout_ms(),
            eviction_interval_secs: default_eviction_interval(),
            eviction_grace_secs: default_eviction_grace(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl RateLimitingConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn eviction_grace(&self) -> Duration {
        Duration::from_secs(self.eviction_grace_secs)
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_admin_path(),
        }
    }
}

impl AdmissionConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AdmissionError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| AdmissionError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Quota of every tier, defaults filled in
    pub fn tier_configs(&self) -> HashMap<LimitTier, TierConfig> {
        LimitTier::ALL
            .iter()
            .map(|tier| {
                let config = self
                    .tiers
                    .get(tier)
                    .copied()
                    .unwrap_or_else(|| tier.default_config());
                (*tier, config)
            })
            .collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Validate tiers
        for (tier, config) in &self.tiers {
            if config.max_requests == 0 {
                return Err(AdmissionError::Config(format!(
                    "Rate limit max_requests must be > 0 for tier: {}",
                    tier
                )));
            }
            if config.window_ms == 0 {
                return Err(AdmissionError::Config(format!(
                    "Rate limit window must be > 0 for tier: {}",
                    tier
                )));
            }
        }

        // Validate rules
        for rule in &self.rules {
            if rule.pattern.is_empty() {
                return Err(AdmissionError::Config(
                    "Rule pattern cannot be empty".to_string(),
                ));
            }
            if !rule.pattern.starts_with('/') {
                return Err(AdmissionError::Config(format!(
                    "Rule pattern must start with '/': {}",
                    rule.pattern
                )));
            }
        }

        // Validate counter store
        let rate_limiting = &self.rate_limiting;
        if rate_limiting.store == StoreKind::Redis && rate_limiting.redis.is_none() {
            return Err(AdmissionError::Config(
                "Redis store selected but rate_limiting.redis.url is missing".to_string(),
            ));
        }
        if rate_limiting.store_timeout_ms == 0 {
            return Err(AdmissionError::Config(
                "Counter store timeout must be > 0".to_string(),
            ));
        }
        if rate_limiting.eviction_interval_secs == 0 {
            return Err(AdmissionError::Config(
                "Eviction interval must be > 0".to_string(),
            ));
        }

        self.cors.validate()?;

        // Validate upstream URL
        if let Some(upstream) = &self.upstream {
            if !upstream.url.starts_with("http://") && !upstream.url.starts_with("https://") {
                return Err(AdmissionError::Config(format!(
                    "Upstream URL must start with http:// or https://: {}",
                    upstream.url
                )));
            }
        }

        if self.admin.enabled && !self.admin.path.starts_with('/') {
            return Err(AdmissionError::Config(format!(
                "Admin path must start with '/': {}",
                self.admin.path
            )));
        }

        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            return Err(AdmissionError::Config(format!(
                "Metrics path must start with '/': {}",
                self.metrics.path
            )));
        }

        Ok(())
    }
}
