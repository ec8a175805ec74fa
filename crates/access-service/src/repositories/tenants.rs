use crate::errors::AccessError;
use crate::models::TenantRecord;
use sqlx::PgPool;

pub async fn get_by_id(pool: &PgPool, tenant_id: &str) -> Result<Option<TenantRecord>, AccessError> {
    let tenant = sqlx::query_as::<_, TenantRecord>(
        r#"
        SELECT id, ssh_enabled, shard_id
        FROM tenants
        WHERE id = $1
        "#,
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| AccessError::Database(format!("Failed to fetch tenant: {}", e)))?;

    Ok(tenant)
}
