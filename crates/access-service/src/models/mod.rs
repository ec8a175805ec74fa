use crate::errors::OneTimeTokenError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Lifecycle of a single-use credential. Exactly one field carries it, so a
/// half-consumed state cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLifecycle {
    Pending,
    Consumed,
}

impl TokenLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenLifecycle::Pending => "pending",
            TokenLifecycle::Consumed => "consumed",
        }
    }
}

impl std::str::FromStr for TokenLifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TokenLifecycle::Pending),
            "consumed" => Ok(TokenLifecycle::Consumed),
            _ => Err(format!("Unknown token status: {}", s)),
        }
    }
}

/// Classify why a single-use credential can no longer be consumed.
///
/// Consumption wins over expiry: a used credential always reports
/// `AlreadyUsed`, whatever the clock says.
pub fn classify_refusal(
    status: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> OneTimeTokenError {
    match status.parse::<TokenLifecycle>() {
        Ok(TokenLifecycle::Consumed) => OneTimeTokenError::AlreadyUsed,
        Ok(TokenLifecycle::Pending) if now >= expires_at => OneTimeTokenError::Expired,
        // Pending and unexpired, but the conditional update lost: someone
        // else consumed it between our update and this read.
        Ok(TokenLifecycle::Pending) => OneTimeTokenError::AlreadyUsed,
        Err(_) => OneTimeTokenError::NotFound,
    }
}

#[derive(Clone, FromRow)]
pub struct LoginSession {
    pub id: String,
    pub tenant_id: String,
    pub database_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for LoginSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginSession")
            .field("id", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .field("database_id", &self.database_id)
            .field("status", &self.status)
            .field("expires_at", &self.expires_at)
            .field("consumed_at", &self.consumed_at)
            .finish()
    }
}

/// Result of a successful login session validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSession {
    pub session_id: String,
    pub tenant_id: String,
    pub database_id: Option<String>,
}

#[derive(Clone, FromRow)]
pub struct AuthorizationCode {
    pub code: String,
    pub login_session_id: String,
    pub client_id: String,
    pub tenant_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub nonce: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationCode")
            .field("code", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("tenant_id", &self.tenant_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("status", &self.status)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Fields needed to mint a new authorization code.
#[derive(Debug, Clone)]
pub struct NewAuthorizationCode<'a> {
    pub code: &'a str,
    pub login_session_id: &'a str,
    pub client_id: &'a str,
    pub tenant_id: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
    pub nonce: Option<&'a str>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, FromRow)]
pub struct SigningKey {
    pub key_id: String,
    pub algorithm: String,
    pub public_key: String,
    pub private_key_encrypted: Vec<u8>,
    pub encryption_nonce: Vec<u8>,
    pub encryption_tag: Vec<u8>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("public_key", &self.public_key)
            .field("private_key_encrypted", &"[REDACTED]")
            .field("is_active", &self.is_active)
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Clone, FromRow)]
pub struct OidcClient {
    pub id: String,
    pub secret_hash: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
}

impl fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcClient")
            .field("id", &self.id)
            .field("secret_hash", &"[REDACTED]")
            .field("name", &self.name)
            .field("redirect_uris", &self.redirect_uris)
            .finish()
    }
}

/// Tenant as seen by the terminal bridge.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TenantRecord {
    pub id: String,
    pub ssh_enabled: bool,
    pub shard_id: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRecord {
    pub id: String,
}

/// Database connection details returned alongside a validated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConnectionInfo {
    pub database_name: String,
    pub host: String,
    pub port: u16,
}

/// JWKS (JSON Web Key Set) response format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<JsonWebKey>,
}

/// Ed25519 JWK (RFC 8037).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kid: String,
    pub kty: String,
    pub crv: String,
    pub x: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
}

/// OpenID provider metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub id_token: String,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("id_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginSessionResponse {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateSessionResponse {
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConnectionInfo>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}
