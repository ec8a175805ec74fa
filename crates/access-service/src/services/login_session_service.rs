//! Login sessions: opaque, single-use, five-minute handles that bind a
//! browser login to a tenant.

use crate::crypto;
use crate::errors::{AccessError, OneTimeTokenError};
use crate::models::{classify_refusal, LoginSession, ValidatedSession};
use crate::observability::metrics;
use crate::repositories::login_sessions;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::instrument;

/// Lifetime of a login session.
pub const LOGIN_SESSION_TTL_SECONDS: i64 = 300;

#[derive(Clone)]
pub struct LoginSessionStore {
    pool: PgPool,
}

impl LoginSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pending session for a tenant, optionally scoped to one of its databases.
    #[instrument(skip_all, name = "access.login_session.create")]
    pub async fn create(
        &self,
        tenant_id: &str,
        database_id: Option<&str>,
    ) -> Result<LoginSession, AccessError> {
        if tenant_id.is_empty() {
            return Err(AccessError::BadRequest("tenant_id is required".to_string()));
        }

        let id = crypto::generate_opaque_token()?;
        let now = Utc::now();
        let expires_at = now + Duration::seconds(LOGIN_SESSION_TTL_SECONDS);

        let session = login_sessions::create_login_session(
            &self.pool,
            &id,
            tenant_id,
            database_id.filter(|d| !d.is_empty()),
            now,
            expires_at,
        )
        .await?;

        metrics::record_login_session_created();
        tracing::debug!(
            target: "access.login_session",
            expires_at = %session.expires_at,
            "Login session created"
        );

        Ok(session)
    }

    /// Validate and consume a session in one step.
    #[instrument(skip_all, name = "access.login_session.validate")]
    pub async fn validate(&self, session_id: &str) -> Result<ValidatedSession, AccessError> {
        self.validate_at(session_id, Utc::now()).await
    }

    /// Validate against an explicit clock reading.
    pub async fn validate_at(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidatedSession, AccessError> {
        let result = self.consume(session_id, now).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(AccessError::OneTimeToken(OneTimeTokenError::NotFound)) => "not_found",
            Err(AccessError::OneTimeToken(OneTimeTokenError::Expired)) => "expired",
            Err(AccessError::OneTimeToken(OneTimeTokenError::AlreadyUsed)) => "already_used",
            Err(_) => "error",
        };
        metrics::record_login_session_validation(outcome);

        result
    }

    async fn consume(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidatedSession, AccessError> {
        if session_id.is_empty() {
            return Err(OneTimeTokenError::NotFound.into());
        }

        if let Some(session) =
            login_sessions::consume_login_session(&self.pool, session_id, now).await?
        {
            return Ok(ValidatedSession {
                session_id: session.id,
                tenant_id: session.tenant_id,
                database_id: session.database_id,
            });
        }

        // Read-only diagnosis of why the conditional update matched nothing.
        let refusal = match login_sessions::get_login_session(&self.pool, session_id).await? {
            None => OneTimeTokenError::NotFound,
            Some(session) => classify_refusal(&session.status, session.expires_at, now),
        };

        tracing::debug!(target: "access.login_session", reason = %refusal, "Login session refused");
        Err(refusal.into())
    }
}
