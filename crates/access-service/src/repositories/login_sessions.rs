use crate::errors::AccessError;
use crate::models::LoginSession;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Persist a new pending login session.
pub async fn create_login_session(
    pool: &PgPool,
    id: &str,
    tenant_id: &str,
    database_id: Option<&str>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<LoginSession, AccessError> {
    let session = sqlx::query_as::<_, LoginSession>(
        r#"
        INSERT INTO oidc_login_sessions (id, tenant_id, database_id, status, created_at, expires_at)
        VALUES ($1, $2, $3, 'pending', $4, $5)
        RETURNING id, tenant_id, database_id, status, created_at, expires_at, consumed_at
        "#,
    )
    .bind(id)
    .bind(tenant_id)
    .bind(database_id)
    .bind(created_at)
    .bind(expires_at)
    .fetch_one(pool)
    .await
    .map_err(|e| AccessError::Database(format!("Failed to create login session: {}", e)))?;

    Ok(session)
}

/// Atomically flip a pending, unexpired session to consumed.
///
/// Returns `None` when the session is missing, expired, or already consumed.
/// Of any number of concurrent callers, at most one gets `Some`.
pub async fn consume_login_session(
    pool: &PgPool,
    id: &str,
    now: DateTime<Utc>,
) -> Result<Option<LoginSession>, AccessError> {
    let session = sqlx::query_as::<_, LoginSession>(
        r#"
        UPDATE oidc_login_sessions
        SET status = 'consumed', consumed_at = $2
        WHERE id = $1
            AND status = 'pending'
            AND expires_at > $2
        RETURNING id, tenant_id, database_id, status, created_at, expires_at, consumed_at
        "#,
    )
    .bind(id)
    .bind(now)
    .fetch_optional(pool)
    .await
    .map_err(|e| AccessError::Database(format!("Failed to consume login session: {}", e)))?;

    Ok(session)
}

pub async fn get_login_session(
    pool: &PgPool,
    id: &str,
) -> Result<Option<LoginSession>, AccessError> {
    let session = sqlx::query_as::<_, LoginSession>(
        r#"
        SELECT id, tenant_id, database_id, status, created_at, expires_at, consumed_at
        FROM oidc_login_sessions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(|e| AccessError::Database(format!("Failed to fetch login session: {}", e)))?;

    Ok(session)
}
