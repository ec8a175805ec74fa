//! Passwordless OIDC authorization-code flow.
//!
//! `session-created -> code-issued -> token-issued`. Each arrow consumes the
//! previous single-use credential atomically, so replaying any step fails.

use crate::crypto::{self, IdTokenClaims};
use crate::errors::AccessError;
use crate::models::{classify_refusal, DiscoveryDocument, NewAuthorizationCode, TokenResponse};
use crate::observability::metrics;
use crate::repositories::{auth_codes, oidc_clients};
use crate::services::key_management_service::SigningKeyManager;
use crate::services::login_session_service::LoginSessionStore;
use chrono::{Duration, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;
use url::Url;

/// Lifetime of an authorization code.
pub const AUTH_CODE_TTL_SECONDS: i64 = 60;

/// Lifetime of an ID token.
pub const ID_TOKEN_TTL_SECONDS: i64 = 3600;

const DEFAULT_SCOPE: &str = "openid";
const GRANT_TYPE_AUTHORIZATION_CODE: &str = "authorization_code";

/// Query parameters of the authorization endpoint. All optional at the
/// extractor level so that missing values produce our own 400.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AuthorizeRequest {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub login_hint: Option<String>,
}

/// Form body of the token endpoint.
#[derive(Default, Clone, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, AccessError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AccessError::BadRequest(format!("{} is required", name)))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct AuthorizationServer {
    pool: PgPool,
    issuer_url: String,
    sessions: LoginSessionStore,
    keys: Arc<SigningKeyManager>,
}

impl AuthorizationServer {
    pub fn new(
        pool: PgPool,
        issuer_url: &str,
        sessions: LoginSessionStore,
        keys: Arc<SigningKeyManager>,
    ) -> Self {
        Self {
            pool,
            issuer_url: issuer_url.trim_end_matches('/').to_string(),
            sessions,
            keys,
        }
    }

    pub fn discovery(&self) -> DiscoveryDocument {
        DiscoveryDocument {
            issuer: self.issuer_url.clone(),
            authorization_endpoint: format!("{}/oidc/authorize", self.issuer_url),
            token_endpoint: format!("{}/oidc/token", self.issuer_url),
            jwks_uri: format!("{}/oidc/jwks", self.issuer_url),
            response_types_supported: vec!["code".to_string()],
            subject_types_supported: vec!["public".to_string()],
            id_token_signing_alg_values_supported: vec!["EdDSA".to_string()],
            scopes_supported: vec![DEFAULT_SCOPE.to_string()],
            grant_types_supported: vec![GRANT_TYPE_AUTHORIZATION_CODE.to_string()],
        }
    }

    /// Consume the login session named by `login_hint` and mint a code.
    ///
    /// Returns the URL to redirect the browser to.
    #[instrument(skip_all, name = "access.oidc.authorize")]
    pub async fn authorize(&self, request: &AuthorizeRequest) -> Result<Url, AccessError> {
        let start = Instant::now();
        let result = self.authorize_inner(request).await;
        metrics::record_authorize(
            if result.is_ok() { "success" } else { "error" },
            start.elapsed(),
        );
        result
    }

    async fn authorize_inner(&self, request: &AuthorizeRequest) -> Result<Url, AccessError> {
        let client_id = required(&request.client_id, "client_id")?;
        let redirect_uri = required(&request.redirect_uri, "redirect_uri")?;
        let login_hint = required(&request.login_hint, "login_hint")?;
        let scope = non_empty(&request.scope).unwrap_or(DEFAULT_SCOPE);

        // Parse before touching the session so a bad URI cannot burn it.
        let mut redirect = Url::parse(redirect_uri)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| AccessError::BadRequest("redirect_uri is malformed".to_string()))?;

        let session = self.sessions.validate(login_hint).await.map_err(|e| match e {
            AccessError::OneTimeToken(reason) => {
                AccessError::Unauthorized(format!("Login session {}", reason))
            }
            other => other,
        })?;

        let code = crypto::generate_opaque_token()?;
        let now = Utc::now();
        let nonce = non_empty(&request.nonce);

        auth_codes::create_auth_code(
            &self.pool,
            &NewAuthorizationCode {
                code: &code,
                login_session_id: &session.session_id,
                client_id,
                tenant_id: &session.tenant_id,
                redirect_uri,
                scope,
                nonce,
                created_at: now,
                expires_at: now + Duration::seconds(AUTH_CODE_TTL_SECONDS),
            },
        )
        .await?;

        set_authorization_params(&mut redirect, &code, non_empty(&request.state));

        tracing::info!(target: "access.oidc", client_id = %client_id, "Authorization code issued");
        Ok(redirect)
    }

    /// Exchange a code for an ID token.
    #[instrument(skip_all, name = "access.oidc.token")]
    pub async fn exchange_code(&self, request: &TokenRequest) -> Result<TokenResponse, AccessError> {
        let start = Instant::now();
        let result = self.exchange_code_inner(request).await;

        let category = match &result {
            Ok(_) => None,
            Err(AccessError::BadRequest(_)) => Some("invalid_request"),
            Err(AccessError::InvalidClient) => Some("invalid_client"),
            Err(AccessError::Unauthorized(_)) => Some("invalid_grant"),
            Err(_) => Some("server_error"),
        };
        metrics::record_token_exchange(
            if result.is_ok() { "success" } else { "error" },
            category,
            start.elapsed(),
        );

        result
    }

    async fn exchange_code_inner(
        &self,
        request: &TokenRequest,
    ) -> Result<TokenResponse, AccessError> {
        if request.grant_type.as_deref() != Some(GRANT_TYPE_AUTHORIZATION_CODE) {
            return Err(AccessError::BadRequest(
                "unsupported grant_type".to_string(),
            ));
        }

        let code = required(&request.code, "code")?;
        let client_id = required(&request.client_id, "client_id")?;
        let client_secret = required(&request.client_secret, "client_secret")?;
        let redirect_uri = non_empty(&request.redirect_uri);

        self.authenticate_client(client_id, client_secret, redirect_uri)
            .await?;

        let now = Utc::now();
        let Some(grant) =
            auth_codes::consume_auth_code(&self.pool, code, client_id, redirect_uri, now).await?
        else {
            let reason = match auth_codes::get_auth_code(&self.pool, code).await? {
                None => "not found".to_string(),
                Some(found) if found.client_id != client_id => {
                    "was issued to another client".to_string()
                }
                Some(found) if redirect_uri.is_some_and(|r| r != found.redirect_uri) => {
                    "redirect_uri mismatch".to_string()
                }
                Some(found) => classify_refusal(&found.status, found.expires_at, now).to_string(),
            };
            tracing::debug!(target: "access.oidc", reason = %reason, "Authorization code refused");
            return Err(AccessError::Unauthorized(format!(
                "Authorization code {}",
                reason
            )));
        };

        let claims = IdTokenClaims {
            iss: self.issuer_url.clone(),
            sub: grant.tenant_id.clone(),
            aud: grant.client_id.clone(),
            exp: now.timestamp() + ID_TOKEN_TTL_SECONDS,
            iat: now.timestamp(),
            nonce: grant.nonce.clone().filter(|n| !n.is_empty()),
            preferred_username: grant.tenant_id.clone(),
            groups: vec![grant.tenant_id.clone()],
        };
        let id_token = self.keys.sign(&claims).await?;

        tracing::info!(target: "access.oidc", client_id = %client_id, "ID token issued");

        Ok(TokenResponse {
            access_token: id_token.clone(),
            token_type: "Bearer".to_string(),
            id_token,
        })
    }

    async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: Option<&str>,
    ) -> Result<(), AccessError> {
        let Some(client) = oidc_clients::get_by_id(&self.pool, client_id).await? else {
            tracing::debug!(target: "access.oidc", "Unknown OIDC client");
            return Err(AccessError::InvalidClient);
        };

        // bcrypt is CPU-bound; keep it off the async workers.
        let secret = client_secret.to_string();
        let hash = client.secret_hash.clone();
        let valid = tokio::task::spawn_blocking(move || crypto::verify_client_secret(&secret, &hash))
            .await
            .map_err(|e| {
                tracing::error!(target: "access.oidc", error = %e, "Secret verification task failed");
                AccessError::Internal
            })?
            .unwrap_or(false);

        if !valid {
            return Err(AccessError::InvalidClient);
        }

        if let Some(uri) = redirect_uri {
            if !client.redirect_uris.iter().any(|registered| registered == uri) {
                tracing::debug!(target: "access.oidc", "redirect_uri not registered for client");
                return Err(AccessError::InvalidClient);
            }
        }

        Ok(())
    }
}

/// Put `code` (and `state`, when given) on the redirect, replacing any
/// values the registered URI already carries for them.
fn set_authorization_params(redirect: &mut Url, code: &str, state: Option<&str>) {
    let kept: Vec<(String, String)> = redirect
        .query_pairs()
        .filter(|(key, _)| key != "code" && !(state.is_some() && key == "state"))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut query = redirect.query_pairs_mut();
    query.clear();
    query.extend_pairs(kept);
    query.append_pair("code", code);
    if let Some(state) = state {
        query.append_pair("state", state);
    }
}
