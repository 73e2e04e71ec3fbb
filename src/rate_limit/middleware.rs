use super::types::AdmitDecision;
use axum::{
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Write the `X-RateLimit-*` headers of a decision
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &AdmitDecision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(decision.reset_after));
}

/// Add rate limit headers to a response
pub fn add_rate_limit_headers(mut response: Response, decision: &AdmitDecision) -> Response {
    apply_rate_limit_headers(response.headers_mut(), decision);
    response
}

/// Create a 429 Too Many Requests response with rate limit headers
pub fn create_rate_limit_response(decision: &AdmitDecision) -> Response {
    let retry_after = decision.retry_after.unwrap_or(decision.reset_after);

    let body = serde_json::json!({
        "error": "Rate limit exceeded",
        "status": 429,
        "limit": decision.limit,
        "remaining": decision.remaining,
        "reset_after": decision.reset_after,
        "retry_after": retry_after,
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, decision);
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
