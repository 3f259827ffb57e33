use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::keys::ApiService;

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("Insufficient credits ({remaining} remaining)")]
    InsufficientCredits { remaining: u32, next_reset_at: u64 },

    #[error("No API keys available for {0}")]
    NoKeysAvailable(ApiService),

    #[error("Rate limit exceeded, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Deduction {0} was already refunded")]
    AlreadyRefunded(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl QuotaError {
    /// Stable machine-readable tag for this failure kind
    pub fn code(&self) -> &'static str {
        match self {
            QuotaError::InsufficientCredits { .. } => "insufficient_credits",
            QuotaError::NoKeysAvailable(_) => "no_keys_available",
            QuotaError::RateLimited { .. } => "rate_limited",
            QuotaError::UnknownService(_) => "unknown_service",
            QuotaError::InvalidRequest(_) => "invalid_request",
            QuotaError::NotFound(_) => "not_found",
            QuotaError::AlreadyRefunded(_) => "already_refunded",
            QuotaError::DatabaseError(_) => "database_error",
            QuotaError::ConfigError(_) => "configuration_error",
            QuotaError::IoError(_) => "exception",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            QuotaError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            QuotaError::NoKeysAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            QuotaError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            QuotaError::UnknownService(_) | QuotaError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            QuotaError::NotFound(_) => StatusCode::NOT_FOUND,
            QuotaError::AlreadyRefunded(_) => StatusCode::CONFLICT,
            QuotaError::DatabaseError(_) | QuotaError::ConfigError(_) | QuotaError::IoError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for QuotaError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "type": self.code(),
            "message": self.to_string(),
        });

        match &self {
            QuotaError::InsufficientCredits {
                remaining,
                next_reset_at,
            } => {
                error["creditsRemaining"] = json!(remaining);
                error["nextResetAt"] = json!(next_reset_at);
            }
            QuotaError::RateLimited { retry_after_ms } => {
                error["retryAfterMs"] = json!(retry_after_ms);
            }
            _ => {}
        }

        (self.status(), Json(json!({ "error": error }))).into_response()
    }
}
