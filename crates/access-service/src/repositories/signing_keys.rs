use crate::errors::AccessError;
use crate::models::SigningKey;
use sqlx::PgPool;

/// Insert a signing key unless an active one already exists.
///
/// The partial unique index on `is_active` makes this a compare-and-set:
/// `None` means another writer won and the caller must load theirs.
pub async fn insert_if_no_active(
    pool: &PgPool,
    key_id: &str,
    public_key: &str,
    private_key_encrypted: &[u8],
    encryption_nonce: &[u8],
    encryption_tag: &[u8],
) -> Result<Option<SigningKey>, AccessError> {
    let key = sqlx::query_as::<_, SigningKey>(
        r#"
        INSERT INTO oidc_signing_keys (
            key_id, algorithm, public_key, private_key_encrypted,
            encryption_nonce, encryption_tag, is_active
        )
        VALUES ($1, 'EdDSA', $2, $3, $4, $5, true)
        ON CONFLICT DO NOTHING
        RETURNING
            key_id, algorithm, public_key, private_key_encrypted,
            encryption_nonce, encryption_tag, is_active, created_at
        "#,
    )
    .bind(key_id)
    .bind(public_key)
    .bind(private_key_encrypted)
    .bind(encryption_nonce)
    .bind(encryption_tag)
    .fetch_optional(pool)
    .await
    .map_err(|e| AccessError::Database(format!("Failed to create signing key: {}", e)))?;

    Ok(key)
}

/// Get the active signing key, if one has been created.
pub async fn get_active_key(pool: &PgPool) -> Result<Option<SigningKey>, AccessError> {
    let key = sqlx::query_as::<_, SigningKey>(
        r#"
        SELECT
            key_id, algorithm, public_key, private_key_encrypted,
            encryption_nonce, encryption_tag, is_active, created_at
        FROM oidc_signing_keys
        WHERE is_active = true
        "#,
    )
    .fetch_optional(pool)
    .await
    .map_err(|e| AccessError::Database(format!("Failed to fetch active key: {}", e)))?;

    Ok(key)
}
