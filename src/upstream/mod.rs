use crate::config::UpstreamConfig;
use crate::error::{AdmissionError, Result};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Method, Response, Uri},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Forwarding state for the downstream application
#[derive(Clone)]
pub struct UpstreamState {
    pub base_url: Arc<str>,
    pub client: reqwest::Client,
}

impl UpstreamState {
    pub fn new(config: &UpstreamConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdmissionError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: Arc::from(config.url.trim_end_matches('/')),
            client,
        })
    }

    /// Target URL for an incoming request URI
    pub fn target_url(&self, uri: &Uri) -> String {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        format!("{}{}", self.base_url, path_and_query)
    }
}

/// Fallback handler forwarding admitted requests upstream
pub async fn forward_handler(
    State(state): State<UpstreamState>,
    req: Request,
) -> Result<Response<Body>> {
    let target = state.target_url(req.uri());
    let (parts, body) = req.into_parts();

    let body_bytes = body
        .collect()
        .await
        .map_err(|e| AdmissionError::Internal(format!("Failed to read request body: {}", e)))?
        .to_bytes();

    debug!(method = %parts.method, target = %target, "Forwarding request upstream");
    send_request(&state.client, parts.method, &parts.headers, body_bytes, &target).await
}

/// Fallback handler used when no upstream is configured
pub async fn not_found_handler(uri: Uri) -> AdmissionError {
    AdmissionError::RouteNotFound(uri.path().to_string())
}

async fn send_request(
    client: &reqwest::Client,
    method: Method,
    headers: &HeaderMap,
    body_bytes: Bytes,
    target: &str,
) -> Result<Response<Body>> {
    let mut upstream_req = client.request(method, target).body(body_bytes);

    for (name, value) in headers.iter() {
        if !is_hop_by_hop_header(name.as_str()) && name != "host" {
            upstream_req = upstream_req.header(name, value);
        }
    }

    let upstream_response = upstream_req.send().await.map_err(|e| {
        if e.is_timeout() {
            AdmissionError::Timeout(format!("Upstream request timed out: {}", e))
        } else {
            AdmissionError::Upstream(format!("Upstream request failed: {}", e))
        }
    })?;

    let mut response_builder = Response::builder().status(upstream_response.status());
    for (name, value) in upstream_response.headers().iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            response_builder = response_builder.header(name, value);
        }
    }

    let body_bytes = upstream_response
        .bytes()
        .await
        .map_err(|e| AdmissionError::Upstream(format!("Failed to read upstream response: {}", e)))?;

    response_builder
        .body(Body::from(body_bytes))
        .map_err(|e| AdmissionError::Internal(format!("Failed to build response: {}", e)))
}

/// Headers scoped to a single connection
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
