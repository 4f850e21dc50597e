use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::utils::sanitize::sanitize_error_message;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transient and timeout errors are candidates for retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transient(_) | AppError::Timeout(_))
    }

    /// Classify a gateway HTTP status into the error taxonomy.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            429 | 500..=599 => AppError::Transient(format!("{} {}", status, message)),
            _ => AppError::Upstream { status, message },
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict(db.message().to_string())
            }
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            AppError::Transient(err.to_string())
        } else {
            AppError::Internal(err.to_string())
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            AppError::Validation(msg) => {
                tracing::warn!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, "Validation", msg)
            }
            AppError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFound", msg)
            }
            AppError::Conflict(msg) => {
                tracing::warn!("Conflict: {}", msg);
                (StatusCode::CONFLICT, "Conflict", msg)
            }
            AppError::Transient(msg) => {
                tracing::error!("Transient error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Transient", msg)
            }
            AppError::Timeout(msg) => {
                tracing::error!("Timeout: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, "Timeout", msg)
            }
            AppError::Upstream { status, message } => {
                tracing::error!("Upstream error ({}): {}", status, message);
                (StatusCode::BAD_GATEWAY, "Upstream", message)
            }
            AppError::Integrity(msg) => {
                tracing::error!("Integrity error: {}", msg);
                (StatusCode::UNPROCESSABLE_ENTITY, "Integrity", msg)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal", msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message: sanitize_error_message(&message),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_transient() {
        assert!(AppError::from_status(429, "rate limited".into()).is_retryable());
        assert!(AppError::from_status(503, "unavailable".into()).is_retryable());
    }

    #[test]
    fn test_from_status_upstream() {
        let err = AppError::from_status(401, "unauthorized".into());
        assert!(!err.is_retryable());
        match err {
            AppError::Upstream { status, .. } => assert_eq!(status, 401),
            _ => panic!("Expected Upstream"),
        }
    }
}
