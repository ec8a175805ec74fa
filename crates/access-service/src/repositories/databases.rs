use crate::errors::AccessError;
use sqlx::PgPool;

/// Name and serving host of a tenant's database.
///
/// Filtered by tenant: a database belonging to someone else is `None`. The
/// host is the lowest-ID active node of the database's shard.
pub async fn get_connection_target(
    pool: &PgPool,
    database_id: &str,
    tenant_id: &str,
) -> Result<Option<(String, String)>, AccessError> {
    let row: Option<(String, String)> = sqlx::query_as(
        r#"
        SELECT d.name, host(node.ip_address)
        FROM databases d
        JOIN LATERAL (
            SELECT n.ip_address
            FROM nodes n
            JOIN node_shard_assignments nsa ON nsa.node_id = n.id
            WHERE nsa.shard_id = d.shard_id
                AND n.status = 'active'
                AND n.ip_address IS NOT NULL
            ORDER BY n.id
            LIMIT 1
        ) node ON true
        WHERE d.id = $1
            AND d.tenant_id = $2
        "#,
    )
    .bind(database_id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| AccessError::Database(format!("Failed to fetch database target: {}", e)))?;

    Ok(row)
}
