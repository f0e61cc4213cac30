use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Payment rail error: {0}")]
    Rail(#[from] RailError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Circle {0} has no members")]
    EmptyCircle(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Payment rail failures.
///
/// `Denied` is a risk/compliance decision and is never retried automatically;
/// everything else is transient and picked up again by the next batch run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RailError {
    #[error("Authorization denied: {reason_code}")]
    Denied { reason_code: String },

    #[error("Rail call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rail transport failure: {0}")]
    Transport(String),

    #[error("Rail rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl RailError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, RailError::Denied { .. })
    }

    /// Short label stored in transaction metadata
    pub fn kind(&self) -> &'static str {
        match self {
            RailError::Denied { .. } => "authorization_denied",
            RailError::Timeout(_) => "timeout",
            RailError::Transport(_) => "transport",
            RailError::Rejected { .. } => "rejected",
        }
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Permission(_) => (StatusCode::FORBIDDEN, "PERMISSION_DENIED"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::EmptyCircle(_) => (StatusCode::UNPROCESSABLE_ENTITY, "EMPTY_CIRCLE"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::Rail(RailError::Denied { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "RAIL_AUTHORIZATION_DENIED")
            }
            AppError::Rail(_) => (StatusCode::SERVICE_UNAVAILABLE, "RAIL_UNAVAILABLE"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Config(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();

        // Internal details stay in the logs
        let message = match &self {
            AppError::Database(_) => "A database error occurred".to_string(),
            AppError::Config(_) | AppError::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(ErrorResponse {
            success: false,
            error: message,
            error_code: error_code.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Validation(format!("Invalid JSON: {}", error))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let messages: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect::<Vec<String>>()
            .join("; ");

        AppError::Validation(message)
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_is_not_transient() {
        let denied = RailError::Denied {
            reason_code: "NSF".to_string(),
        };
        assert!(!denied.is_transient());
        assert!(RailError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(RailError::Transport("reset".to_string()).is_transient());
    }

    #[test]
    fn test_error_status_codes() {
        let cases = vec![
            (AppError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (AppError::Permission("x".into()), StatusCode::FORBIDDEN),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                AppError::Rail(RailError::Timeout(Duration::from_secs(1))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
