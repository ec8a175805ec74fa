use crate::errors::AccessError;
use crate::models::ApiKeyRecord;
use sqlx::PgPool;

/// Find an unrevoked API key by its SHA-256 hex digest.
pub async fn find_active_by_hash(
    pool: &PgPool,
    key_hash: &str,
) -> Result<Option<ApiKeyRecord>, AccessError> {
    let key = sqlx::query_as::<_, ApiKeyRecord>(
        r#"
        SELECT id
        FROM api_keys
        WHERE key_hash = $1
            AND revoked_at IS NULL
        "#,
    )
    .bind(key_hash)
    .fetch_optional(pool)
    .await
    .map_err(|e| AccessError::Database(format!("Failed to look up API key: {}", e)))?;

    Ok(key)
}
