//! Access service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! for server-side failures are generic; the real cause is logged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Why a single-use credential (login session or authorization code) was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OneTimeTokenError {
    #[error("not found")]
    NotFound,

    #[error("expired")]
    Expired,

    #[error("already used")]
    AlreadyUsed,
}

/// Access service error type.
///
/// Maps to HTTP status codes:
/// - Database, Crypto, Internal: 500
/// - BadRequest: 400
/// - Unauthorized, InvalidClient: 401
/// - OneTimeToken: 404 / 401 / 403 depending on the refusal
/// - Forbidden: 403
/// - NotFound: 404
/// - Conflict: 409
/// - ServiceUnavailable: 503
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid client credentials")]
    InvalidClient,

    #[error("Single-use token {0}")]
    OneTimeToken(#[from] OneTimeTokenError),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    Internal,
}

impl AccessError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            AccessError::Database(_) | AccessError::Crypto(_) | AccessError::Internal => 500,
            AccessError::BadRequest(_) => 400,
            AccessError::Unauthorized(_) | AccessError::InvalidClient => 401,
            AccessError::OneTimeToken(OneTimeTokenError::NotFound) => 404,
            AccessError::OneTimeToken(OneTimeTokenError::Expired) => 401,
            AccessError::OneTimeToken(OneTimeTokenError::AlreadyUsed) => 403,
            AccessError::Forbidden(_) => 403,
            AccessError::NotFound(_) => 404,
            AccessError::Conflict(_) => 409,
            AccessError::ServiceUnavailable(_) => 503,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AccessError::Database(err) => {
                tracing::error!(target: "access.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            AccessError::Crypto(err) => {
                tracing::error!(target: "access.crypto", error = %err, "Cryptographic operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CRYPTO_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            AccessError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            AccessError::Unauthorized(reason) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", reason.clone())
            }
            AccessError::InvalidClient => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CLIENT",
                "Invalid client credentials".to_string(),
            ),
            AccessError::OneTimeToken(reason) => {
                let (status, code) = match reason {
                    OneTimeTokenError::NotFound => (StatusCode::NOT_FOUND, "TOKEN_NOT_FOUND"),
                    OneTimeTokenError::Expired => (StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
                    OneTimeTokenError::AlreadyUsed => (StatusCode::FORBIDDEN, "TOKEN_ALREADY_USED"),
                };
                (status, code, format!("Token {}", reason))
            }
            AccessError::Forbidden(reason) => (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone()),
            AccessError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone())
            }
            AccessError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason.clone()),
            AccessError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "access.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    reason.clone(),
                )
            }
            AccessError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = "Bearer realm=\"hosting-access\"".parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

impl From<sqlx::Error> for AccessError {
    fn from(err: sqlx::Error) -> Self {
        AccessError::Database(err.to_string())
    }
}
