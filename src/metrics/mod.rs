use crate::error::{AdmissionError, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder and expose the endpoint
    #[serde(default)]
    pub enabled: bool,
    /// Path of the Prometheus text endpoint
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_metrics_path(),
        }
    }
}

/// Outcome of one pass through the admission layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Passed,
    Preflight,
    CorsRejected,
    RateLimited,
}

impl AdmissionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionOutcome::Passed => "passed",
            AdmissionOutcome::Preflight => "preflight",
            AdmissionOutcome::CorsRejected => "cors_rejected",
            AdmissionOutcome::RateLimited => "rate_limited",
        }
    }
}

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global recorder and create the service
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            AdmissionError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Create a service with its own recorder, leaving the global recorder untouched
    pub fn detached() -> Self {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "admission_requests_total",
            "Requests seen by the admission layer, by outcome"
        );
        describe_counter!(
            "admission_rate_limit_exceeded_total",
            "Requests rejected due to rate limiting, by tier"
        );
        describe_counter!(
            "admission_store_failures_total",
            "Counter store failures that were resolved by admitting the request"
        );
        describe_counter!(
            "admission_evicted_records_total",
            "Usage records removed by the background sweep"
        );
        describe_gauge!(
            "admission_usage_records",
            "Usage records currently held by the local counter store"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record the outcome of an admission decision
pub fn record_admission(outcome: AdmissionOutcome) {
    let labels = [("outcome", outcome.as_str().to_string())];
    counter!("admission_requests_total", &labels).increment(1);
}

/// Record rate limit exceeded
pub fn record_rate_limit_exceeded(tier: &str) {
    let labels = [("tier", tier.to_string())];
    counter!("admission_rate_limit_exceeded_total", &labels).increment(1);
}

/// Record a counter store failure
pub fn record_store_failure(operation: &str) {
    let labels = [("operation", operation.to_string())];
    counter!("admission_store_failures_total", &labels).increment(1);
}

/// Record records dropped by eviction
pub fn record_evicted_records(count: u64) {
    counter!("admission_evicted_records_total").increment(count);
}

/// Record the current number of usage records
pub fn record_usage_records(count: usize) {
    gauge!("admission_usage_records").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(AdmissionOutcome::Passed.as_str(), "passed");
        assert_eq!(AdmissionOutcome::CorsRejected.as_str(), "cors_rejected");
        assert_eq!(AdmissionOutcome::RateLimited.as_str(), "rate_limited");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_admission(AdmissionOutcome::Preflight);
        record_rate_limit_exceeded("strict");
        record_store_failure("check");
        record_evicted_records(3);
        record_usage_records(7);
    }

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.path, "/metrics");
    }
}
