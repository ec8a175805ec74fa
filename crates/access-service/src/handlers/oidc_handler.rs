//! OIDC provider endpoints.
//!
//! - `GET /.well-known/openid-configuration`
//! - `GET /oidc/jwks`
//! - `GET /oidc/authorize`
//! - `POST /oidc/token`

use crate::errors::AccessError;
use crate::models::{DiscoveryDocument, Jwks, TokenResponse};
use crate::routes::AppState;
use crate::services::oidc_service::{AuthorizeRequest, TokenRequest};
use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Query, State,
    },
    http::{
        header::{HeaderMap, HeaderValue, CACHE_CONTROL, LOCATION, PRAGMA},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Form, Json,
};
use std::sync::Arc;
use tracing::instrument;

/// GET /.well-known/openid-configuration
#[instrument(skip_all, name = "access.oidc.discovery")]
pub async fn discovery(State(state): State<Arc<AppState>>) -> Json<DiscoveryDocument> {
    Json(state.authorization_server.discovery())
}

/// GET /oidc/jwks
///
/// Creates the signing key on first use. Cacheable for an hour.
#[instrument(skip_all, name = "access.oidc.jwks")]
pub async fn jwks(
    State(state): State<Arc<AppState>>,
) -> Result<(HeaderMap, Json<Jwks>), AccessError> {
    let jwks = state.keys.public_jwks().await?;

    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=3600"));

    Ok((headers, Json(jwks)))
}

/// GET /oidc/authorize
///
/// Responds 302 to `redirect_uri` with `code` (and `state` when given).
#[instrument(skip_all, name = "access.oidc.authorize_handler")]
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    query: Result<Query<AuthorizeRequest>, QueryRejection>,
) -> Result<Response, AccessError> {
    let Query(request) = query.map_err(|e| AccessError::BadRequest(e.body_text()))?;

    let redirect = state.authorization_server.authorize(&request).await?;

    Ok((StatusCode::FOUND, [(LOCATION, redirect.to_string())]).into_response())
}

/// POST /oidc/token
///
/// Form-encoded `authorization_code` grant. The response must not be cached.
#[instrument(skip_all, name = "access.oidc.token_handler")]
pub async fn token(
    State(state): State<Arc<AppState>>,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<(HeaderMap, Json<TokenResponse>), AccessError> {
    let Form(request) = form.map_err(|e| AccessError::BadRequest(e.body_text()))?;

    let response = state.authorization_server.exchange_code(&request).await?;

    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    Ok((headers, Json(response)))
}
