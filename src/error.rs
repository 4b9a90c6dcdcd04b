use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::responses::{ApiResponse, ErrorResponse};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Idempotency-Key header is required for this operation")]
    MissingIdempotencyKey,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("A request with this idempotency key is already being processed")]
    ConcurrentInFlight,

    #[error("Idempotency key was already used for a different request")]
    IdempotencyKeyReused,

    #[error("Idempotency store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Reservation no longer held for key {0}")]
    ReservationLost(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingIdempotencyKey | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::ConcurrentInFlight => StatusCode::CONFLICT,
            AppError::IdempotencyKeyReused => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::StoreUnavailable(_) | AppError::Redis(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ReservationLost(_)
            | AppError::Config(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::MissingIdempotencyKey => "MISSING_IDEMPOTENCY_KEY",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::ConcurrentInFlight => "REQUEST_IN_FLIGHT",
            AppError::IdempotencyKeyReused => "IDEMPOTENCY_KEY_REUSED",
            AppError::StoreUnavailable(_) | AppError::Redis(_) => "STORE_UNAVAILABLE",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ReservationLost(_)
            | AppError::Config(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the caller may retry the same request later and expect it to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::ConcurrentInFlight | AppError::StoreUnavailable(_) | AppError::Redis(_)
        )
    }
}

/// Error half of handler results: status plus the error envelope.
pub type ApiError = (StatusCode, Json<ApiResponse<()>>);

impl AppError {
    pub fn into_api_error(self) -> ApiError {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal error: {}", self);
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(ApiResponse::<()>::error(ErrorResponse::new(self.code(), message))),
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_api_error().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::MissingIdempotencyKey.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::ConcurrentInFlight.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::StoreUnavailable("full".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::IdempotencyKeyReused.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_retryable() {
        assert!(AppError::ConcurrentInFlight.is_retryable());
        assert!(AppError::StoreUnavailable("capacity".into()).is_retryable());
        assert!(!AppError::MissingIdempotencyKey.is_retryable());
        assert!(!AppError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let (status, Json(body)) =
            AppError::Internal(anyhow::anyhow!("connection string leaked")).into_api_error();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let error = body.error.unwrap();
        assert_eq!(error.code, "INTERNAL_ERROR");
        assert_eq!(error.message, "An internal error occurred");
    }
}
