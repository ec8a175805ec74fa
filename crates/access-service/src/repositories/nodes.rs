use crate::errors::AccessError;
use sqlx::PgPool;

/// Address of the active node with the lowest ID in a shard.
///
/// Nodes without an address are skipped. The ordering is deterministic so
/// repeated resolutions land on the same node.
pub async fn first_active_address_in_shard(
    pool: &PgPool,
    shard_id: &str,
) -> Result<Option<String>, AccessError> {
    let address: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT host(n.ip_address)
        FROM nodes n
        JOIN node_shard_assignments nsa ON nsa.node_id = n.id
        WHERE nsa.shard_id = $1
            AND n.status = 'active'
            AND n.ip_address IS NOT NULL
        ORDER BY n.id
        LIMIT 1
        "#,
    )
    .bind(shard_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| AccessError::Database(format!("Failed to resolve shard node: {}", e)))?;

    Ok(address.map(|(ip,)| ip))
}
