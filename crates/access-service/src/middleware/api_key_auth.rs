//! API key middleware for control-plane routes.
//!
//! Extracts the Bearer key from the Authorization header, checks it against
//! the stored key hashes, and injects the caller's identity into request
//! extensions.

use crate::errors::AccessError;
use crate::services::directory::{ApiKeyIdentity, ApiKeyValidator};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the API key middleware.
#[derive(Clone)]
pub struct ApiKeyAuthState {
    pub validator: Arc<dyn ApiKeyValidator>,
}

/// Reject requests that do not carry a valid, unrevoked API key.
///
/// ```text
/// Authorization: Bearer <api-key>
/// ```
#[instrument(skip_all, name = "access.middleware.api_key")]
pub async fn require_api_key(
    State(state): State<Arc<ApiKeyAuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AccessError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "access.middleware.api_key", "Missing Authorization header");
            AccessError::Unauthorized("Missing Authorization header".to_string())
        })?;

    let key = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            tracing::debug!(target: "access.middleware.api_key", "Invalid Authorization header format");
            AccessError::Unauthorized("Invalid Authorization header format".to_string())
        })?;

    let identity: ApiKeyIdentity = state
        .validator
        .validate(key)
        .await?
        .ok_or_else(|| AccessError::Unauthorized("Invalid API key".to_string()))?;

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
