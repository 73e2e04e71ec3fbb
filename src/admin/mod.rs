//! Operator endpoints for inspecting and resetting rate limit counters.
//!
//! `GET {path}?identifier=..&level=..` returns the current snapshot,
//! `DELETE {path}?identifier=..&level=..` clears it. `level` defaults to
//! `normal`.

use crate::error::{AdmissionError, Result};
use crate::identity::ClientIdentity;
use crate::policy::LimitTier;
use crate::rate_limit::{AdmitDecision, RateLimiterService};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Query parameters of both admin endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitQuery {
    pub identifier: Option<String>,
    pub level: Option<String>,
}

impl LimitQuery {
    fn parse(self) -> Result<(ClientIdentity, LimitTier)> {
        let identifier = self
            .identifier
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(AdmissionError::MissingIdentifier)?;

        let tier = match self.level.as_deref().map(str::trim) {
            None | Some("") => LimitTier::default(),
            Some(level) => level.parse()?,
        };

        Ok((ClientIdentity::from(identifier), tier))
    }
}

/// Snapshot returned by the inspection endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitInfo {
    pub identifier: ClientIdentity,
    pub level: LimitTier,
    #[serde(flatten)]
    pub decision: AdmitDecision,
}

/// `GET` handler: current counter state without consuming quota
pub async fn limit_info(
    State(limiter): State<Arc<RateLimiterService>>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<LimitInfo>> {
    let (identifier, level) = query.parse()?;
    let decision = limiter.get_limit_info(&identifier, level).await;

    Ok(Json(LimitInfo {
        identifier,
        level,
        decision,
    }))
}

/// `DELETE` handler: forget the counter
pub async fn limit_reset(
    State(limiter): State<Arc<RateLimiterService>>,
    Query(query): Query<LimitQuery>,
) -> Result<StatusCode> {
    let (identifier, level) = query.parse()?;
    limiter.reset_limit(&identifier, level).await;
    info!(identifier = %identifier, level = %level, "Rate limit reset via admin endpoint");
    Ok(StatusCode::NO_CONTENT)
}

/// Routes for the admin endpoints mounted at `path`
pub fn admin_routes(path: &str, limiter: Arc<RateLimiterService>) -> Router {
    Router::new()
        .route(path, get(limit_info).delete(limit_reset))
        .with_state(limiter)
}
