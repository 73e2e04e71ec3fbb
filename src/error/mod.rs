use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for admission operations
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Admission error types
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Origin not allowed: {0}")]
    OriginNotAllowed(String),

    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Missing required parameter: identifier")]
    MissingIdentifier,

    #[error("Unknown rate limit level: {0}")]
    InvalidTier(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdmissionError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdmissionError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AdmissionError::OriginNotAllowed(_) => StatusCode::FORBIDDEN,
            AdmissionError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AdmissionError::MissingIdentifier => StatusCode::BAD_REQUEST,
            AdmissionError::InvalidTier(_) => StatusCode::BAD_REQUEST,
            AdmissionError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            AdmissionError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AdmissionError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AdmissionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AdmissionError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
