use crate::errors::AccessError;
use crate::models::{AuthorizationCode, NewAuthorizationCode};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Persist a new pending authorization code.
///
/// `login_session_id` is unique, so a session can back at most one code.
pub async fn create_auth_code(
    pool: &PgPool,
    new_code: &NewAuthorizationCode<'_>,
) -> Result<AuthorizationCode, AccessError> {
    let code = sqlx::query_as::<_, AuthorizationCode>(
        r#"
        INSERT INTO oidc_auth_codes (
            code, login_session_id, client_id, tenant_id, redirect_uri, scope, nonce,
            status, created_at, expires_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9)
        RETURNING
            code, login_session_id, client_id, tenant_id, redirect_uri, scope, nonce,
            status, created_at, expires_at, consumed_at
        "#,
    )
    .bind(new_code.code)
    .bind(new_code.login_session_id)
    .bind(new_code.client_id)
    .bind(new_code.tenant_id)
    .bind(new_code.redirect_uri)
    .bind(new_code.scope)
    .bind(new_code.nonce)
    .bind(new_code.created_at)
    .bind(new_code.expires_at)
    .fetch_one(pool)
    .await
    .map_err(|e| AccessError::Database(format!("Failed to create authorization code: {}", e)))?;

    Ok(code)
}

/// Atomically consume a pending, unexpired code issued to `client_id`.
///
/// When `redirect_uri` is given it must equal the Authorize-time value.
/// Returns `None` if any condition fails; the row is left untouched then.
pub async fn consume_auth_code(
    pool: &PgPool,
    code: &str,
    client_id: &str,
    redirect_uri: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<AuthorizationCode>, AccessError> {
    let consumed = sqlx::query_as::<_, AuthorizationCode>(
        r#"
        UPDATE oidc_auth_codes
        SET status = 'consumed', consumed_at = $4
        WHERE code = $1
            AND client_id = $2
            AND ($3::TEXT IS NULL OR redirect_uri = $3)
            AND status = 'pending'
            AND expires_at > $4
        RETURNING
            code, login_session_id, client_id, tenant_id, redirect_uri, scope, nonce,
            status, created_at, expires_at, consumed_at
        "#,
    )
    .bind(code)
    .bind(client_id)
    .bind(redirect_uri)
    .bind(now)
    .fetch_optional(pool)
    .await
    .map_err(|e| AccessError::Database(format!("Failed to consume authorization code: {}", e)))?;

    Ok(consumed)
}

pub async fn get_auth_code(
    pool: &PgPool,
    code: &str,
) -> Result<Option<AuthorizationCode>, AccessError> {
    let found = sqlx::query_as::<_, AuthorizationCode>(
        r#"
        SELECT
            code, login_session_id, client_id, tenant_id, redirect_uri, scope, nonce,
            status, created_at, expires_at, consumed_at
        FROM oidc_auth_codes
        WHERE code = $1
        "#,
    )
    .bind(code)
    .fetch_optional(pool)
    .await
    .map_err(|e| AccessError::Database(format!("Failed to fetch authorization code: {}", e)))?;

    Ok(found)
}
