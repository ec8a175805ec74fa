use crate::errors::AccessError;
use crate::models::OidcClient;
use sqlx::PgPool;

/// Look up a registered OIDC client. Registration happens elsewhere.
pub async fn get_by_id(pool: &PgPool, client_id: &str) -> Result<Option<OidcClient>, AccessError> {
    let client = sqlx::query_as::<_, OidcClient>(
        r#"
        SELECT id, secret_hash, name, redirect_uris
        FROM oidc_clients
        WHERE id = $1
        "#,
    )
    .bind(client_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| AccessError::Database(format!("Failed to fetch OIDC client: {}", e)))?;

    Ok(client)
}
