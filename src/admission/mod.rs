//! Per-request admission pipeline.
//!
//! Order of evaluation:
//!
//! 1. Resolve the caller's identity
//! 2. CORS gate: reject disallowed origins, answer allowed preflights
//! 3. Select the tier for the path and check the rate limiter (429 on denial)
//! 4. Run the downstream handler
//! 5. Add hardening, rate limit and CORS headers to its response

use crate::config::{AdmissionConfig, StoreKind};
use crate::cors::{apply_cors_headers, CorsGate, GateOutcome};
use crate::error::{AdmissionError, Result};
use crate::identity::IdentityResolver;
use crate::metrics::{self, AdmissionOutcome};
use crate::policy::TierSelector;
use crate::rate_limit::{add_rate_limit_headers, create_rate_limit_response, RateLimiterService};
use crate::security::SecurityHeaders;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{
        header::{ACCESS_CONTROL_REQUEST_HEADERS, ORIGIN},
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared, immutable state of the admission layer
#[derive(Clone)]
pub struct AdmissionState {
    pub identity: Arc<IdentityResolver>,
    pub cors: Arc<CorsGate>,
    pub selector: Arc<TierSelector>,
    /// `None` when rate limiting is disabled
    pub limiter: Option<Arc<RateLimiterService>>,
    pub security: Arc<SecurityHeaders>,
}

impl AdmissionState {
    pub fn new(
        identity: IdentityResolver,
        cors: CorsGate,
        selector: TierSelector,
        limiter: Option<Arc<RateLimiterService>>,
        security: SecurityHeaders,
    ) -> Self {
        Self {
            identity: Arc::new(identity),
            cors: Arc::new(cors),
            selector: Arc::new(selector),
            limiter,
            security: Arc::new(security),
        }
    }

    /// Build every component from a validated configuration
    pub async fn from_config(config: &AdmissionConfig) -> Result<Self> {
        let cors = CorsGate::new(&config.cors)?;
        let selector = TierSelector::new(&config.rules)?;
        let security = SecurityHeaders::new(&config.security)?;
        let identity = IdentityResolver::new(config.identity.clone());

        let limiter = if config.rate_limiting.enabled {
            Some(Arc::new(build_limiter(config).await?))
        } else {
            info!("Rate limiting disabled");
            None
        };

        Ok(Self::new(identity, cors, selector, limiter, security))
    }
}

async fn build_limiter(config: &AdmissionConfig) -> Result<RateLimiterService> {
    let rate_limiting = &config.rate_limiting;
    let tiers = config.tier_configs();

    let service = match rate_limiting.store {
        StoreKind::Local => RateLimiterService::local_only(tiers),
        StoreKind::Redis => {
            let redis = rate_limiting.redis.as_ref().ok_or_else(|| {
                AdmissionError::Config("Redis store selected without a URL".to_string())
            })?;
            RateLimiterService::with_redis(tiers, &redis.url, rate_limiting.eviction_grace())
                .await
        }
    };

    Ok(service
        .with_store_timeout(rate_limiting.store_timeout())
        .with_key_prefix(rate_limiting.key_prefix.clone()))
}

/// Axum middleware running the admission pipeline
pub async fn admission_middleware(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = state.identity.resolve_request(peer, request.headers());

    let origin = request
        .headers()
        .get(ORIGIN)
        .map(|v| v.to_str().unwrap_or_default().to_string());
    let requested_headers = request
        .headers()
        .get(ACCESS_CONTROL_REQUEST_HEADERS)
        .and_then(|v| v.to_str().ok());

    let cors_headers = match state
        .cors
        .evaluate(origin.as_deref(), request.method(), requested_headers)
    {
        GateOutcome::Rejected => {
            metrics::record_admission(AdmissionOutcome::CorsRejected);
            let origin = origin.unwrap_or_default();
            return state
                .security
                .decorate_response(AdmissionError::OriginNotAllowed(origin).into_response());
        }
        GateOutcome::PreflightSatisfied(headers) => {
            metrics::record_admission(AdmissionOutcome::Preflight);
            return (StatusCode::OK, headers).into_response();
        }
        GateOutcome::PassThrough(headers) => headers,
    };

    let path = request.uri().path().to_string();
    let tier = state.selector.select_tier(&path);

    let decision = match &state.limiter {
        Some(limiter) => {
            let decision = limiter.check_limit(&identity, tier).await;
            if !decision.allowed {
                warn!(
                    identity = %identity,
                    tier = %tier,
                    path = %path,
                    retry_after = ?decision.retry_after,
                    "Request rejected by rate limiter"
                );
                metrics::record_admission(AdmissionOutcome::RateLimited);
                let mut response = create_rate_limit_response(&decision);
                state.security.decorate(response.headers_mut());
                apply_cors_headers(response.headers_mut(), &cors_headers);
                return response;
            }
            Some(decision)
        }
        None => None,
    };

    debug!(identity = %identity, tier = %tier, path = %path, "Request admitted");
    metrics::record_admission(AdmissionOutcome::Passed);

    let mut response = state.security.decorate_response(next.run(request).await);
    if let Some(decision) = &decision {
        response = add_rate_limit_headers(response, decision);
    }
    apply_cors_headers(response.headers_mut(), &cors_headers);
    response
}
