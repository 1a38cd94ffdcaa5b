use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors raised by the storage adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write (e.g. a duplicate secret).
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return StoreError::Conflict(constraint);
            }
        }
        StoreError::Database(err)
    }
}

/// Errors surfaced by the API key service.
///
/// An authorization *deny* is not an error: it is reported as
/// `Authorization { authorized: false, .. }`.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("api key not found")]
    NotFound,

    #[error("api key has expired")]
    Expired,

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("secret generation failed: {0}")]
    Generation(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl KeyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        KeyError::Validation(msg.into())
    }

    /// True for the outcomes callers treat as "deny access".
    pub fn is_unresolvable(&self) -> bool {
        matches!(self, KeyError::NotFound | KeyError::Expired)
    }
}

impl IntoResponse for KeyError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            KeyError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation_failed",
                reason.clone(),
            ),
            KeyError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "api_key_not_found",
                "api key not found".to_string(),
            ),
            KeyError::Expired => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "api_key_expired",
                "api key has expired".to_string(),
            ),
            KeyError::Timeout(after) => {
                tracing::error!("store call timed out after {:?}", after);
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    "timeout_error",
                    "store_timeout",
                    "storage did not respond in time".to_string(),
                )
            }
            KeyError::Generation(e) => {
                tracing::error!("Secret generation error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            KeyError::Store(e) => {
                tracing::error!("Storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        error_response(status, error_type, code, &msg)
    }
}

/// Builds the JSON error envelope shared by every endpoint.
pub fn error_response(status: StatusCode, error_type: &str, code: &str, msg: &str) -> Response {
    let body = Json(json!({
        "error": {
            "message": msg,
            "type": error_type,
            "code": code,
        }
    }));

    (status, body).into_response()
}
